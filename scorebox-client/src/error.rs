//! Error types for the Scorebox client

use std::time::Duration;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to a scoring service
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The service did not accept a file for scoring
    #[error("Submission to {url} failed: {message}")]
    Submission {
        /// Endpoint the file was posted to
        url: String,
        /// What went wrong
        message: String,
    },

    /// No result was ready before the scoring deadline
    #[error("Scoring did not complete within {limit:?} (waited {elapsed:?})")]
    ScoringTimeout {
        /// Time spent polling
        elapsed: Duration,
        /// Configured limit
        limit: Duration,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create a submission error for an endpoint
    pub fn submission(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Submission {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a scoring deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ScoringTimeout { .. })
    }
}
