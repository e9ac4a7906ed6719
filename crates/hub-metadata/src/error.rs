//! Error types for hub metadata lookups

use thiserror::Error;

/// Errors that can occur while querying the model hub.
///
/// Values are `Clone` so a failed lookup can be memoized and handed to every
/// caller that asks for the same key during a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Transport-level failure (DNS, TLS, connection reset)
    #[error("HTTP error: {0}")]
    Http(String),

    /// The hub answered with a non-success status
    #[error("hub returned status {status} for {url}")]
    Status { url: String, status: u16 },

    /// Response body could not be decoded
    #[error("Invalid hub response: {0}")]
    Decode(String),

    /// A single attempt exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The source is deliberately disconnected (offline mode)
    #[error("metadata source is offline")]
    Offline,
}

impl HubError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HubError::Http(_) | HubError::Timeout { .. } => true,
            HubError::Status { status, .. } => *status == 429 || *status >= 500,
            HubError::Decode(_) | HubError::Offline => false,
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            HubError::Decode(err.to_string())
        } else {
            HubError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Decode(err.to_string())
    }
}
