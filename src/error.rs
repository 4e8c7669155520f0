//! Error types for dispatch, ranking and provider calls.

use std::time::Duration;

/// Maximum length of a provider error body carried into an error message.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while dispatching or ranking generations.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// Batch submission rejected (empty prompt, empty selection, unknown provider...).
    #[error("invalid batch: {0}")]
    Validation(String),

    /// Ranking requested over a batch that still has running tasks.
    #[error("batch not ready: {0}")]
    NotReady(String),

    /// Ranking session was already submitted.
    #[error("ranking session is closed")]
    ClosedSession,

    /// Slot label not present in the ranking session.
    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    /// API key missing or invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider-attributed error message.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Delay suggested by the provider.
        retry_after: Option<Duration>,
    },

    /// Operation timed out (e.g., Replicate polling).
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Provider rejected the request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider answered with a shape we cannot use (no image, empty output).
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ArenaError {
    /// Returns true if this error is likely transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::Timeout(_) => Some(Duration::from_secs(1)),
            Self::Network(_) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// Maps a non-success HTTP response from a provider to an error.
    ///
    /// `provider` prefixes API errors so a failure message is attributable
    /// once it lands in a result slot.
    pub fn from_response(
        provider: &str,
        status: u16,
        text: &str,
        headers: &reqwest::header::HeaderMap,
    ) -> Self {
        let text = sanitize_error_message(text);
        match status {
            401 | 403 => return Self::Auth(format!("{provider}: {text}")),
            429 => {
                let retry_after = parse_retry_after(headers).map(Duration::from_secs);
                return Self::RateLimited { retry_after };
            }
            _ => {}
        }

        let lower = text.to_lowercase();
        if lower.contains("safety")
            || lower.contains("content_policy")
            || lower.contains("moderat")
            || lower.contains("nsfw")
        {
            return Self::ContentBlocked(text);
        }
        if status == 400 || status == 422 {
            return Self::InvalidRequest(format!("{provider}: {text}"));
        }
        Self::Api {
            status,
            message: format!("{provider} API error: {text}"),
        }
    }
}

/// Parses a `Retry-After` header expressed in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Collapses whitespace and truncates a provider error body.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "<empty body>".into();
    }
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    format!("{truncated}...")
}

/// Result type alias for arena operations.
pub type Result<T> = std::result::Result<T, ArenaError>;
