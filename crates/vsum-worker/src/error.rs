//! Worker error types.

use thiserror::Error;

use vsum_inference::InferenceError;
use vsum_models::StateId;
use vsum_queue::QueueError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Invalid windowing parameters for a state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowingError {
    #[error("Window size {window_size} with overlap {overlap} gives a non-positive stride")]
    NonPositiveStride { window_size: u32, overlap: u32 },

    #[error("Window size must be at least one frame")]
    ZeroWindowSize,

    #[error("Sampling step must be at least one frame")]
    ZeroStep,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("State not found: {0}")]
    StateNotFound(StateId),

    #[error("State already exists: {0}")]
    StateExists(StateId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Windowing error: {0}")]
    Windowing(#[from] WindowingError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Self::ChannelClosed(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Inference(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }

    /// Configuration-level failures that end a state's pipeline.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Windowing(_) | WorkerError::ConfigError(_) => true,
            WorkerError::Inference(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for WorkerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        WorkerError::InvalidRequest(errors.to_string())
    }
}
