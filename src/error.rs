use thiserror::Error;

use crate::translate::FallbackReason;

#[derive(Error, Debug)]
pub enum SubtransError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Throttled by provider: {0}")]
    Throttled(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("No valid subtitles found")]
    EmptyInput,

    #[error("Too many subtitle entries: {count} (max {max})")]
    TooManyUnits { count: usize, max: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl SubtransError {
    /// Classify a `reqwest` failure into the timeout / transport split used by the retry loops.
    /// The request URL is stripped: query-string credentials must not reach the logs.
    pub fn from_request(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }

    /// Classify a provider-reported error message by its text.
    pub fn from_provider_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
            Self::Throttled(message.to_string())
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(message.to_string())
        } else {
            Self::Provider(message.to_string())
        }
    }

    /// Whether the AI batch loop should retry after this error.
    pub fn is_rate_limit_or_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Throttled(_))
    }

    /// The reason recorded on a unit that falls back after this error.
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            Self::Timeout(_) => FallbackReason::Timeout,
            Self::Throttled(_) => FallbackReason::Throttled,
            Self::MalformedResponse(_) | Self::Json(_) => FallbackReason::MalformedResponse,
            Self::Provider(_) => FallbackReason::Provider,
            Self::Http(e) if e.is_timeout() => FallbackReason::Timeout,
            _ => FallbackReason::Transport,
        }
    }
}

pub type Result<T> = std::result::Result<T, SubtransError>;
