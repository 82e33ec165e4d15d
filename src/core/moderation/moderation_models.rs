// Moderation domain models - the message envelope that travels between stages.
//
// These are pure domain types with no broker or HTTP dependencies.
// Every hop deserializes a fresh `ModerationMessage`, mutates it and
// serializes it again for the next queue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Verdict of a single item or of a whole stage.
///
/// Priority, high to low: `Failed` > `NeedManual` > `Pass` > `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Verdict {
    #[default]
    Pending,
    Pass,
    #[serde(rename = "Need_Manual")]
    NeedManual,
    Failed,
}

impl Verdict {
    /// Wire spelling, also used in history lines and rejection reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pending => "Pending",
            Verdict::Pass => "Pass",
            Verdict::NeedManual => "Need_Manual",
            Verdict::Failed => "Failed",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a message once its route is exhausted.
///
/// Derived from the route verdicts, never set directly by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Disposition {
    #[default]
    Pending,
    Accepted,
    #[serde(rename = "Manual_Pending")]
    ManualPending,
    Rejected,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Pending => write!(f, "Pending"),
            Disposition::Accepted => write!(f, "Accepted"),
            Disposition::ManualPending => write!(f, "Manual_Pending"),
            Disposition::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Kind of content a stage is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Text,
    Url,
}

/// One moderation category. Each has its own queue and classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageType {
    #[serde(rename = "Text_Toxicity")]
    TextToxicity,
    #[serde(rename = "Url_Validation")]
    UrlValidation,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageType::TextToxicity => write!(f, "Text_Toxicity"),
            StageType::UrlValidation => write!(f, "Url_Validation"),
        }
    }
}

/// A single moderated unit (a text or a URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub value: String,
    #[serde(default)]
    pub rejected_reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
}

#[cfg(test)]
impl ContentItem {
    pub fn new(content_type: ContentType, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            rejected_reasons: Vec::new(),
            content_type: Some(content_type),
        }
    }
}

/// One step of a message's route and the verdict its stage wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub stage_type: StageType,
    #[serde(default)]
    pub verdict: Verdict,
}

#[cfg(test)]
impl RouteEntry {
    pub fn pending(stage_type: StageType) -> Self {
        Self {
            stage_type,
            verdict: Verdict::Pending,
        }
    }
}

/// The envelope every stage consumes and publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationMessage {
    pub id: String,
    #[serde(default)]
    pub content: BTreeMap<ContentType, Vec<ContentItem>>,
    /// Ordered once upstream; stages only advance through it.
    #[serde(default)]
    pub route: Vec<RouteEntry>,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub disposition: Disposition,
}

impl ModerationMessage {
    /// Mutable slice of the items a stage for `content_type` must look at.
    pub fn items_mut(&mut self, content_type: ContentType) -> &mut [ContentItem] {
        match self.content.get_mut(&content_type) {
            Some(items) => items.as_mut_slice(),
            None => &mut [],
        }
    }

    pub fn route_verdicts(&self) -> Vec<Verdict> {
        self.route.iter().map(|entry| entry.verdict).collect()
    }
}

// Builders and lookups for tests; real messages arrive as JSON.
#[cfg(test)]
impl ModerationMessage {
    /// Create a message with a pending entry for every stage of `route`.
    pub fn new(id: impl Into<String>, route: &[StageType]) -> Self {
        Self {
            id: id.into(),
            content: BTreeMap::new(),
            route: route.iter().copied().map(RouteEntry::pending).collect(),
            history: Vec::new(),
            disposition: Disposition::Pending,
        }
    }

    pub fn with_content(mut self, content_type: ContentType, values: &[&str]) -> Self {
        let items = self.content.entry(content_type).or_default();
        items.extend(values.iter().map(|v| ContentItem::new(content_type, *v)));
        self
    }

    pub fn items(&self, content_type: ContentType) -> &[ContentItem] {
        self.content
            .get(&content_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn verdict_of(&self, stage_type: StageType) -> Option<Verdict> {
        self.route
            .iter()
            .find(|entry| entry.stage_type == stage_type)
            .map(|entry| entry.verdict)
    }
}
