use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;

use crate::core::moderation::{ProbeOutcome, ReachabilityProbe};

/// HEAD-based reachability probe. Redirects are followed by reqwest's
/// default policy.
pub struct HttpReachabilityProbe {
    client: Client,
}

impl HttpReachabilityProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("automoderation-url-check/0.2")
            .build()?;
        Ok(Self { client })
    }

    /// After a connect error, tell "host does not resolve" apart from
    /// "host resolves but refused us".
    async fn classify_connect_error(url: &Url) -> ProbeOutcome {
        let Some(host) = url.host_str() else {
            return ProbeOutcome::HostNotFound;
        };
        let port = url.port_or_known_default().unwrap_or(80);

        let resolves = match tokio::net::lookup_host((host, port)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(_) => false,
        };

        if resolves {
            ProbeOutcome::ConnectionFailed
        } else {
            tracing::info!(host, "Could not resolve host");
            ProbeOutcome::HostNotFound
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return ProbeOutcome::RequestError(e.to_string()),
        };

        match self.client.head(parsed.clone()).send().await {
            Ok(response) => ProbeOutcome::Status(response.status().as_u16()),
            Err(e) if e.is_timeout() => ProbeOutcome::TimedOut,
            Err(e) if e.is_connect() => Self::classify_connect_error(&parsed).await,
            Err(e) => ProbeOutcome::RequestError(e.to_string()),
        }
    }
}
