//! Commands driving the pipeline coordinator.

use vsum_models::{ChunkMessage, ModelInfo, StateId};

/// Closed set of transitions the coordinator reacts to.
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Chunking started for a registered state
    Start {
        state_id: StateId,
        object_detection: Option<ModelInfo>,
    },

    /// Frames delivered by the producer
    ChunkReceived(ChunkMessage),

    /// The producer has delivered every chunk of a state
    ChunkingFinished { state_id: StateId },

    /// Re-evaluate whether chunking can complete for these states
    CheckQueueStatus { state_ids: Vec<StateId> },

    /// Every caption window of a state reached a terminal status
    CaptionsDrained { state_id: StateId },

    SummaryProcessing { state_id: StateId },

    SummaryComplete { state_id: StateId, summary: String },

    SummaryFailed { state_id: StateId, error: String },

    /// A state was dropped; forget its producer and audio bookkeeping
    Remove { state_id: StateId },
}

impl PipelineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineCommand::Start { .. } => "start",
            PipelineCommand::ChunkReceived(_) => "chunk_received",
            PipelineCommand::ChunkingFinished { .. } => "chunking_finished",
            PipelineCommand::CheckQueueStatus { .. } => "check_queue_status",
            PipelineCommand::CaptionsDrained { .. } => "captions_drained",
            PipelineCommand::SummaryProcessing { .. } => "summary_processing",
            PipelineCommand::SummaryComplete { .. } => "summary_complete",
            PipelineCommand::SummaryFailed { .. } => "summary_failed",
            PipelineCommand::Remove { .. } => "remove",
        }
    }
}
