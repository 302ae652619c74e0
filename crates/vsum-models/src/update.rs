//! Observer update messages.
//!
//! Incremental state pushed to observers (UI sockets, log tailers) as the
//! pipeline advances.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::StateId;
use crate::pipeline::InferenceConfig;
use crate::status::{ActionStatus, StatusCounts};
use crate::window::WindowSummary;

/// Update kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineUpdateType {
    StatusSync,
    FramesSync,
    WindowSync,
    ConfigSync,
    SummaryChunk,
    SummaryComplete,
    Error,
}

impl PipelineUpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineUpdateType::StatusSync => "status_sync",
            PipelineUpdateType::FramesSync => "frames_sync",
            PipelineUpdateType::WindowSync => "window_sync",
            PipelineUpdateType::ConfigSync => "config_sync",
            PipelineUpdateType::SummaryChunk => "summary_chunk",
            PipelineUpdateType::SummaryComplete => "summary_complete",
            PipelineUpdateType::Error => "error",
        }
    }
}

/// Update envelope published for a state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineUpdate {
    /// Stage statuses plus the caption status count vector
    StatusSync {
        state_id: StateId,
        chunking: ActionStatus,
        summarizing: ActionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<ActionStatus>,
        captions: StatusCounts,
    },

    /// Frames recorded from a producer chunk
    FramesSync {
        state_id: StateId,
        chunk_id: u64,
        total_frames: usize,
    },

    /// A caption window changed
    WindowSync {
        state_id: StateId,
        window: WindowSummary,
    },

    /// Inference models recorded for the state
    ConfigSync {
        state_id: StateId,
        inference_config: InferenceConfig,
    },

    /// Streamed piece of the final summary
    SummaryChunk { state_id: StateId, chunk: String },

    /// Final summary text
    SummaryComplete { state_id: StateId, summary: String },

    /// Fatal pipeline error for the state
    Error {
        state_id: StateId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineUpdate {
    /// Create an error update.
    pub fn error(state_id: StateId, message: impl Into<String>) -> Self {
        PipelineUpdate::Error {
            state_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// State the update belongs to.
    pub fn state_id(&self) -> &StateId {
        match self {
            PipelineUpdate::StatusSync { state_id, .. }
            | PipelineUpdate::FramesSync { state_id, .. }
            | PipelineUpdate::WindowSync { state_id, .. }
            | PipelineUpdate::ConfigSync { state_id, .. }
            | PipelineUpdate::SummaryChunk { state_id, .. }
            | PipelineUpdate::SummaryComplete { state_id, .. }
            | PipelineUpdate::Error { state_id, .. } => state_id,
        }
    }

    pub fn update_type(&self) -> PipelineUpdateType {
        match self {
            PipelineUpdate::StatusSync { .. } => PipelineUpdateType::StatusSync,
            PipelineUpdate::FramesSync { .. } => PipelineUpdateType::FramesSync,
            PipelineUpdate::WindowSync { .. } => PipelineUpdateType::WindowSync,
            PipelineUpdate::ConfigSync { .. } => PipelineUpdateType::ConfigSync,
            PipelineUpdate::SummaryChunk { .. } => PipelineUpdateType::SummaryChunk,
            PipelineUpdate::SummaryComplete { .. } => PipelineUpdateType::SummaryComplete,
            PipelineUpdate::Error { .. } => PipelineUpdateType::Error,
        }
    }
}
