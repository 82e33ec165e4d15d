// Runtime configuration, read from the environment (and `.env` via dotenv).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Queue and routing-key names on the shared moderation exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub exchange: String,
    pub handling_queue: String,
    pub handling_rkey: String,
    pub text_toxicity_queue: String,
    pub text_toxicity_rkey: String,
    pub url_validation_queue: String,
    pub url_validation_rkey: String,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            exchange: "moderation".to_string(),
            handling_queue: "moderation-handling".to_string(),
            handling_rkey: "moderation.handling".to_string(),
            text_toxicity_queue: "automoderation-text-toxicity".to_string(),
            text_toxicity_rkey: "moderation.auto.text_toxicity".to_string(),
            url_validation_queue: "automoderation-url-validation".to_string(),
            url_validation_rkey: "moderation.auto.url_validation".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomodConfig {
    pub detoxify_service_url: String,
    pub detoxify_timeout: Duration,
    pub url_check_timeout: Duration,
    /// Most submitted messages allowed inside the pipeline at once.
    pub max_in_flight: usize,
    pub topology: QueueTopology,
}

impl AutomodConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let detoxify_service_url = lookup("DETOXIFY_SERVICE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingEnvVar("DETOXIFY_SERVICE_URL"))?;

        let defaults = QueueTopology::default();
        // Blank names would bind an unusable queue, so they fall back too.
        let string_or = |key: &str, default: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };

        let topology = QueueTopology {
            exchange: string_or("MODERATION_EXCHANGE", defaults.exchange),
            handling_queue: string_or("HANDLING_QUEUE", defaults.handling_queue),
            handling_rkey: string_or("HANDLING_RKEY", defaults.handling_rkey),
            text_toxicity_queue: string_or("TEXT_TOXICITY_QUEUE", defaults.text_toxicity_queue),
            text_toxicity_rkey: string_or("TEXT_TOXICITY_RKEY", defaults.text_toxicity_rkey),
            url_validation_queue: string_or("URL_VALIDATION_QUEUE", defaults.url_validation_queue),
            url_validation_rkey: string_or("URL_VALIDATION_RKEY", defaults.url_validation_rkey),
        };

        Ok(Self {
            detoxify_service_url,
            detoxify_timeout: Duration::from_secs(parse_or(&lookup, "DETOXIFY_TIMEOUT_SECS", 30)?),
            url_check_timeout: Duration::from_secs(parse_or(&lookup, "URL_CHECK_TIMEOUT_SECS", 2)?),
            max_in_flight: parse_or(&lookup, "MAX_IN_FLIGHT", 1024)?,
            topology,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
