//! Inference error types.

use thiserror::Error;

pub type InferenceResult<T> = Result<T, InferenceError>;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Backend not ready: {0}")]
    NotReady(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error(
        "Context length of '{budget}' for model '{model}' is too small to summarize inputs of length '{length}'"
    )]
    ContextTooSmall {
        budget: usize,
        length: usize,
        model: String,
    },

    #[error("Summary reduction did not converge after {0} passes")]
    ReductionStalled(u32),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InferenceError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::ServiceUnavailable(_)
                | InferenceError::NotReady(_)
                | InferenceError::Timeout(_)
                | InferenceError::Network(_)
                | InferenceError::InvalidResponse(_)
        )
    }

    /// Configuration-level failures that abort a stage and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InferenceError::ContextTooSmall { .. } | InferenceError::ReductionStalled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_too_small_is_fatal() {
        let err = InferenceError::ContextTooSmall {
            budget: 100,
            length: 250,
            model: "m".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("'100'"));
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(InferenceError::Timeout(30).is_retryable());
        assert!(InferenceError::not_ready("discovery").is_retryable());
        assert!(!InferenceError::request_failed("400").is_retryable());
    }
}
