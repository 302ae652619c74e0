//! Shared data models for the video summarization pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Per-video pipeline state (frames, chunks, caption windows, audio)
//! - Stage statuses and caption status counts
//! - Producer chunk messages and transcription wire types
//! - Observer update schemas

pub mod audio;
pub mod frame;
pub mod ids;
pub mod pipeline;
pub mod state;
pub mod status;
pub mod update;
pub mod window;

// Re-export common types
pub use audio::{render_transcript, AudioBlock, AudioDevice, TranscriptLine, TranscriptionRequest, TranscriptionResponse};
pub use frame::{ChunkFrame, ChunkMessage, ChunkRecord, DetectedObject, Detection, FrameMetadata, FrameRecord};
pub use ids::StateId;
pub use pipeline::{InferenceConfig, ModelInfo, PipelineRequest, PromptConfig, SamplingParams, VideoRef};
pub use state::{PipelineState, StageStatus};
pub use status::{ActionStatus, StatusCounts};
pub use update::{PipelineUpdate, PipelineUpdateType};
pub use window::{window_key, CaptionQueueItem, SummaryQueueItem, WindowSummary};
