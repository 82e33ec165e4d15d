// Text toxicity stage - scores every text item and classifies the scores.
//
// NO HTTP here: the scorer is injected, the policy is a static threshold set.

use crate::core::moderation::{
    aggregate_verdicts, annotate_item, ContentItem, ContentType, ModerationStage, StageType,
    ThresholdError, ThresholdPolicy, ToxicityScorer, Verdict,
};
use async_trait::async_trait;

use super::text_utils::markdown_to_plain_text;

pub struct TextToxicityStage<S: ToxicityScorer> {
    scorer: S,
    policy: ThresholdPolicy,
    consume_queue: String,
    queue_rkey: String,
}

impl<S: ToxicityScorer> TextToxicityStage<S> {
    /// Create the stage with the Detoxify threshold policy.
    pub fn new(
        scorer: S,
        consume_queue: impl Into<String>,
        queue_rkey: impl Into<String>,
    ) -> Result<Self, ThresholdError> {
        Ok(Self {
            scorer,
            policy: ThresholdPolicy::detoxify_toxicity()?,
            consume_queue: consume_queue.into(),
            queue_rkey: queue_rkey.into(),
        })
    }

    /// Score one (already normalised) text and turn the scores into a verdict.
    async fn evaluate_text(&self, text: &str) -> Verdict {
        let scores = match self.scorer.score(text).await {
            Ok(scores) => scores,
            Err(err) => {
                tracing::warn!(error = %err, "Toxicity scoring failed, setting Need_Manual");
                return Verdict::NeedManual;
            }
        };

        if scores.is_empty() {
            tracing::debug!("Toxicity scorer returned no scores, setting Need_Manual");
            return Verdict::NeedManual;
        }

        let verdicts: Vec<Verdict> = scores
            .iter()
            .map(|score| {
                self.policy.match_score(*score).unwrap_or_else(|| {
                    tracing::warn!(
                        score,
                        policy = self.policy.name(),
                        "Score matched no threshold, setting Need_Manual"
                    );
                    Verdict::NeedManual
                })
            })
            .collect();
        tracing::debug!(?scores, ?verdicts, "Toxicity scores classified");

        aggregate_verdicts(verdicts)
    }
}

#[async_trait]
impl<S: ToxicityScorer> ModerationStage for TextToxicityStage<S> {
    fn stage_type(&self) -> StageType {
        StageType::TextToxicity
    }

    fn content_type(&self) -> ContentType {
        ContentType::Text
    }

    fn consume_queue(&self) -> &str {
        &self.consume_queue
    }

    fn queue_rkey(&self) -> &str {
        &self.queue_rkey
    }

    fn name(&self) -> &'static str {
        "TextToxicityStage"
    }

    async fn analyze(&self, items: &mut [ContentItem]) -> Verdict {
        let mut verdicts = Vec::with_capacity(items.len());

        for item in items.iter_mut() {
            item.value = markdown_to_plain_text(&item.value);
            let verdict = self.evaluate_text(&item.value).await;
            annotate_item(self.stage_type(), item, verdict, None);
            verdicts.push(verdict);
        }

        aggregate_verdicts(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::EvaluatorError;
    use dashmap::DashMap;

    /// Scorer that answers from a fixed table keyed by text.
    struct MockScorer {
        answers: DashMap<String, Vec<f64>>,
        seen: DashMap<String, usize>,
    }

    impl MockScorer {
        fn new(answers: &[(&str, Vec<f64>)]) -> Self {
            let map = DashMap::new();
            for (text, scores) in answers {
                map.insert(text.to_string(), scores.clone());
            }
            Self {
                answers: map,
                seen: DashMap::new(),
            }
        }
    }

    #[async_trait]
    impl ToxicityScorer for MockScorer {
        async fn score(&self, text: &str) -> Result<Vec<f64>, EvaluatorError> {
            *self.seen.entry(text.to_string()).or_insert(0) += 1;
            self.answers
                .get(text)
                .map(|scores| scores.clone())
                .ok_or(EvaluatorError::Timeout)
        }
    }

    fn stage(answers: &[(&str, Vec<f64>)]) -> TextToxicityStage<MockScorer> {
        TextToxicityStage::new(MockScorer::new(answers), "text-queue", "to.text").unwrap()
    }

    fn items(values: &[&str]) -> Vec<ContentItem> {
        values
            .iter()
            .map(|v| ContentItem::new(ContentType::Text, *v))
            .collect()
    }

    #[tokio::test]
    async fn test_clean_text_passes() {
        let stage = stage(&[("This is fine.", vec![0.1])]);
        let mut items = items(&["This is fine."]);

        let verdict = stage.analyze(&mut items).await;

        assert_eq!(verdict, Verdict::Pass);
        assert!(items[0].rejected_reasons.is_empty());
    }

    #[tokio::test]
    async fn test_toxic_text_fails_with_reason() {
        let stage = stage(&[("You are awful", vec![0.9])]);
        let mut items = items(&["You are awful"]);

        let verdict = stage.analyze(&mut items).await;

        assert_eq!(verdict, Verdict::Failed);
        assert_eq!(items[0].rejected_reasons.len(), 1);
        assert!(items[0].rejected_reasons[0].contains("[Failed]"));
    }

    #[tokio::test]
    async fn test_worst_segment_decides() {
        let stage = stage(&[("Two sentences. One is rude.", vec![0.05, 0.4])]);
        let mut items = items(&["Two sentences. One is rude."]);

        assert_eq!(stage.analyze(&mut items).await, Verdict::NeedManual);
    }

    #[tokio::test]
    async fn test_markdown_is_stripped_before_scoring() {
        let stage = stage(&[("Hello world", vec![0.0])]);
        let mut items = items(&["**Hello** _world_"]);

        let verdict = stage.analyze(&mut items).await;

        assert_eq!(verdict, Verdict::Pass);
        assert_eq!(items[0].value, "Hello world");
        assert_eq!(stage.scorer.seen.get("Hello world").map(|c| *c), Some(1));
    }

    #[tokio::test]
    async fn test_text_inside_html_is_still_scored() {
        let stage = stage(&[("you are a worthless idiot", vec![0.95])]);
        let mut items = items(&["<div>you are a worthless idiot</div>"]);

        let verdict = stage.analyze(&mut items).await;

        assert_eq!(verdict, Verdict::Failed);
        assert_eq!(items[0].value, "you are a worthless idiot");
    }

    #[tokio::test]
    async fn test_empty_scores_need_manual() {
        let stage = stage(&[("quiet", vec![])]);
        let mut items = items(&["quiet"]);

        assert_eq!(stage.analyze(&mut items).await, Verdict::NeedManual);
        assert!(items[0].rejected_reasons[0].contains("[Need_Manual]"));
    }

    #[tokio::test]
    async fn test_scorer_fault_needs_manual_never_fails() {
        let stage = stage(&[]);
        let mut items = items(&["unreachable scorer"]);

        assert_eq!(stage.analyze(&mut items).await, Verdict::NeedManual);
    }

    #[tokio::test]
    async fn test_negative_score_matches_no_rule() {
        let stage = stage(&[("odd", vec![-0.5])]);
        let mut items = items(&["odd"]);

        assert_eq!(stage.analyze(&mut items).await, Verdict::NeedManual);
    }

    #[tokio::test]
    async fn test_only_failing_items_get_reasons() {
        let stage = stage(&[("nice", vec![0.0]), ("nasty", vec![0.8])]);
        let mut items = items(&["nice", "nasty"]);

        assert_eq!(stage.analyze(&mut items).await, Verdict::Failed);
        assert!(items[0].rejected_reasons.is_empty());
        assert_eq!(items[1].rejected_reasons.len(), 1);
    }
}
