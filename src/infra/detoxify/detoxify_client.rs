use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::core::moderation::{EvaluatorError, ToxicityScorer};

/// Client for a Detoxify scoring service (`GET <service>?text=...`).
pub struct DetoxifyClient {
    client: Client,
    service_url: String,
}

impl DetoxifyClient {
    pub fn new(service_url: impl Into<String>, timeout: Duration) -> Result<Self, EvaluatorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvaluatorError::Request(e.to_string()))?;

        Ok(Self {
            client,
            service_url: service_url.into(),
        })
    }

    /// Pull the `toxicity` metric out of a Detoxify response.
    ///
    /// Accepts a flat metric map (`{"toxicity": 0.1, "insult": 0.0}`) or a map
    /// of segment to metric map (`{"Hi there.": {"toxicity": 0.1}}`).
    pub fn parse_scores(body: &Value) -> Result<Vec<f64>, EvaluatorError> {
        let map = body
            .as_object()
            .ok_or_else(|| EvaluatorError::Malformed("expected a JSON object".to_string()))?;

        if let Some(score) = map.get("toxicity").and_then(Value::as_f64) {
            return Ok(vec![score]);
        }

        map.iter()
            .map(|(segment, metrics)| {
                metrics
                    .get("toxicity")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        EvaluatorError::Malformed(format!("no toxicity score for segment '{segment}'"))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl ToxicityScorer for DetoxifyClient {
    async fn score(&self, text: &str) -> Result<Vec<f64>, EvaluatorError> {
        tracing::debug!(service = %self.service_url, text, "Asking Detoxify for scores");

        let response = self
            .client
            .get(&self.service_url)
            .query(&[("text", text)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EvaluatorError::Timeout
                } else {
                    EvaluatorError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EvaluatorError::Status(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                EvaluatorError::Timeout
            } else {
                EvaluatorError::Malformed(e.to_string())
            }
        })?;

        Self::parse_scores(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response on a random local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}/predict")
    }

    #[test]
    fn test_parse_flat_metrics() {
        let body = json!({"toxicity": 0.1, "insult": 0.02});
        assert_eq!(DetoxifyClient::parse_scores(&body).unwrap(), vec![0.1]);
    }

    #[test]
    fn test_parse_segmented_metrics() {
        let body = json!({
            "Hello.": {"toxicity": 0.01, "obscene": 0.0},
            "Go away.": {"toxicity": 0.6}
        });
        let mut scores = DetoxifyClient::parse_scores(&body).unwrap();
        scores.sort_by(f64::total_cmp);
        assert_eq!(scores, vec![0.01, 0.6]);
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert!(DetoxifyClient::parse_scores(&json!({})).unwrap().is_empty());
        assert!(matches!(
            DetoxifyClient::parse_scores(&json!([0.1])),
            Err(EvaluatorError::Malformed(_))
        ));
        assert!(matches!(
            DetoxifyClient::parse_scores(&json!({"Hello.": {"insult": 0.2}})),
            Err(EvaluatorError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_score_over_http() {
        let url = serve_once("200 OK", r#"{"toxicity": 0.9}"#).await;
        let client = DetoxifyClient::new(url, Duration::from_secs(5)).unwrap();

        assert_eq!(client.score("you are awful").await.unwrap(), vec![0.9]);
    }

    #[tokio::test]
    async fn test_error_status_is_evaluator_fault() {
        let url = serve_once("503 Service Unavailable", "{}").await;
        let client = DetoxifyClient::new(url, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            client.score("anything").await,
            Err(EvaluatorError::Status(503))
        ));
    }

    #[tokio::test]
    async fn test_silent_service_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let client =
            DetoxifyClient::new(format!("http://{addr}/predict"), Duration::from_millis(200))
                .unwrap();

        assert!(matches!(
            client.score("anything").await,
            Err(EvaluatorError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let url = serve_once("200 OK", "not json").await;
        let client = DetoxifyClient::new(url, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            client.score("anything").await,
            Err(EvaluatorError::Malformed(_))
        ));
    }
}
