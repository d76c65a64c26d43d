use std::fmt::Display;

use thiserror::Error;

/// Application-wide error types for pagewatch.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration file missing, unreadable or invalid. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Headless rendering failed.
    #[error("Render error: {0}")]
    RenderError(String),

    /// Every retrieval path for a target failed.
    #[error("Retrieval failed for {url}: {message}")]
    Retrieval { url: String, message: String },

    /// Snapshot, diff, state or event file operation failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Change notification could not be delivered.
    #[error("Notifier error: {0}")]
    NotifierError(String),

    /// Summarization API call failed.
    #[error("Summarizer error (HTTP {status_code}): {message}")]
    SummarizerError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::SummarizerError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error must terminate the process.
    ///
    /// Only configuration problems are fatal; everything else is isolated
    /// to the target or side effect that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Configuration(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

/// Side effects whose failure is recorded but never propagated.
///
/// Store-side housekeeping (retention, index files, publishing, event
/// feed) favours availability: a failure is logged as a warning and the
/// cycle carries on.
pub trait BestEffort<T> {
    fn best_effort(self, what: &str) -> Option<T>;
}

impl<T, E: Display> BestEffort<T> for Result<T, E> {
    fn best_effort(self, what: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{what} failed");
                None
            }
        }
    }
}
