//! Caption windows and dispatch work items.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::StateId;
use crate::status::ActionStatus;

/// Build the window key for an ordered list of frame ids.
pub fn window_key(frame_ids: &[u64]) -> String {
    frame_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("#")
}

/// Caption result for one window of frames.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WindowSummary {
    pub window_key: String,
    /// Member frame ids in window order
    pub frames: Vec<u64>,
    /// Smallest member frame id
    pub start_frame: u64,
    /// Largest member frame id
    pub end_frame: u64,
    pub status: ActionStatus,
    /// Caption text, empty until the window completes
    #[serde(default)]
    pub caption: String,
}

impl WindowSummary {
    /// Create a READY window for the given frames. Returns `None` for an empty slice.
    pub fn ready(frames: Vec<u64>) -> Option<Self> {
        let start_frame = *frames.iter().min()?;
        let end_frame = *frames.iter().max()?;
        Some(Self {
            window_key: window_key(&frames),
            frames,
            start_frame,
            end_frame,
            status: ActionStatus::Ready,
            caption: String::new(),
        })
    }
}

/// Unit of work for the caption dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CaptionQueueItem {
    pub state_id: StateId,
    pub frames: Vec<u64>,
    pub window_key: String,
}

impl CaptionQueueItem {
    pub fn new(state_id: StateId, frames: Vec<u64>) -> Self {
        let window_key = window_key(&frames);
        Self {
            state_id,
            frames,
            window_key,
        }
    }
}

/// Unit of work for the summary dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SummaryQueueItem {
    pub state_id: StateId,
}
