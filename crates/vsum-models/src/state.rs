//! Per-video pipeline state.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::audio::AudioBlock;
use crate::frame::{ChunkMessage, ChunkRecord, FrameRecord};
use crate::ids::StateId;
use crate::pipeline::{InferenceConfig, PipelineRequest, PromptConfig, SamplingParams, VideoRef};
use crate::status::{ActionStatus, StatusCounts};
use crate::window::WindowSummary;

/// Coordinator-level stage statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct StageStatus {
    /// NA -> IN_PROGRESS -> COMPLETE (or FAILED)
    pub chunking: ActionStatus,
    /// NA -> READY -> IN_PROGRESS -> COMPLETE (or FAILED)
    pub summarizing: ActionStatus,
}

/// All state tracked for one video's summarization.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineState {
    pub state_id: StateId,
    pub title: String,
    pub video: VideoRef,
    pub sampling: SamplingParams,
    pub prompts: PromptConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_model: Option<String>,
    /// Frames keyed by frame id; iteration order is numeric
    #[serde(default)]
    pub frames: BTreeMap<u64, FrameRecord>,
    #[serde(default)]
    pub chunks: BTreeMap<u64, ChunkRecord>,
    /// Caption windows keyed by window key
    #[serde(default)]
    pub windows: BTreeMap<String, WindowSummary>,
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioBlock>,
    /// Running summary text; streamed tokens are appended here
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub inference_config: InferenceConfig,
    /// Last fatal error recorded for this state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// Create a fresh state for a request.
    pub fn new(state_id: StateId, request: PipelineRequest) -> Self {
        let now = Utc::now();
        Self {
            state_id,
            title: request.title,
            video: request.video,
            sampling: request.sampling,
            prompts: request.prompts,
            audio_model: request.audio_model,
            frames: BTreeMap::new(),
            chunks: BTreeMap::new(),
            windows: BTreeMap::new(),
            status: StageStatus::default(),
            audio: None,
            summary: String::new(),
            inference_config: InferenceConfig::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record a producer chunk.
    ///
    /// Re-delivery of a known chunk id replaces that chunk's frames: frames
    /// the earlier delivery added and the new one lacks are dropped, the rest
    /// are overwritten by frame id.
    pub fn upsert_chunk(&mut self, message: &ChunkMessage) {
        let now = Utc::now();

        if let Some(previous) = self.chunks.get(&message.chunk_id) {
            for frame_id in &previous.frame_ids {
                let owned_by_chunk = self
                    .frames
                    .get(frame_id)
                    .is_some_and(|f| f.chunk_id == message.chunk_id);
                if owned_by_chunk {
                    self.frames.remove(frame_id);
                }
            }
        }

        let mut frame_ids = Vec::with_capacity(message.frames.len());
        for frame in &message.frames {
            frame_ids.push(frame.frame_id);
            self.frames.insert(
                frame.frame_id,
                FrameRecord::from_chunk_frame(message.chunk_id, frame, now),
            );
        }

        self.chunks.insert(
            message.chunk_id,
            ChunkRecord {
                chunk_id: message.chunk_id,
                frame_ids,
                received_at: now,
            },
        );
        self.updated_at = now;
    }

    /// Frame ids in ascending numeric order.
    pub fn sorted_frame_ids(&self) -> Vec<u64> {
        self.frames.keys().copied().collect()
    }

    pub fn frame(&self, frame_id: u64) -> Option<&FrameRecord> {
        self.frames.get(&frame_id)
    }

    /// Status count vector over all caption windows.
    pub fn caption_counts(&self) -> StatusCounts {
        StatusCounts::from_statuses(self.windows.values().map(|w| w.status))
    }

    /// Completed captions ordered by first frame id.
    pub fn captions_in_order(&self) -> Vec<String> {
        let mut windows: Vec<&WindowSummary> = self
            .windows
            .values()
            .filter(|w| w.status == ActionStatus::Complete && !w.caption.is_empty())
            .collect();
        windows.sort_by_key(|w| (w.start_frame, w.end_frame));
        windows.into_iter().map(|w| w.caption.clone()).collect()
    }
}
