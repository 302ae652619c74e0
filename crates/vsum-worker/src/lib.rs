//! Video summarization pipeline worker.
//!
//! This crate provides:
//! - Per-video pipeline state with update publishing and checkpoints
//! - Frame windowing for caption requests
//! - Caption and summary dispatch through bounded worker pools
//! - The audio transcription trigger
//! - The coordinator state machine tying the stages together
//! - A JSON-lines producer adapter and graceful shutdown

pub mod audio;
pub mod caption;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod retry;
pub mod store;
pub mod summary;
pub mod windowing;

pub use audio::AudioTrigger;
pub use caption::CaptionHandler;
pub use command::PipelineCommand;
pub use config::WorkerConfig;
pub use coordinator::Coordinator;
pub use error::{WindowingError, WorkerError, WorkerResult};
pub use logging::{Stage, StateLogger};
pub use pipeline::{Backends, Pipeline, PipelineSettings, Sinks};
pub use producer::{run_producer, ProducerMessage};
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryResult};
pub use store::{InferenceStage, StateStore};
pub use summary::SummaryHandler;
pub use windowing::{frame_windows, windows_for};
