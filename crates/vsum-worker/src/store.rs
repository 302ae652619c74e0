//! Pipeline state store.
//!
//! Keyed registry of per-video [`PipelineState`]s. Each state sits behind its
//! own async mutex; the registry lock is only held to look an entry up, so
//! work on different videos never contends. Every mutation that observers
//! care about is published through the configured [`UpdateSink`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use validator::Validate;

use vsum_models::{
    ActionStatus, AudioBlock, CaptionQueueItem, ChunkMessage, ModelInfo, PipelineRequest,
    PipelineState, PipelineUpdate, StateId, TranscriptLine, WindowSummary,
};
use vsum_queue::{CheckpointStore, UpdateSink};

use crate::error::{WorkerError, WorkerResult};

type Entry = Arc<Mutex<PipelineState>>;

/// Inference stage whose model is recorded on a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceStage {
    ObjectDetection,
    ImageInference,
    TextInference,
}

/// Registry of pipeline states with per-state locking.
pub struct StateStore {
    states: RwLock<HashMap<StateId, Entry>>,
    updates: Arc<dyn UpdateSink>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl StateStore {
    pub fn new(updates: Arc<dyn UpdateSink>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            updates,
            checkpoints,
        }
    }

    /// Validate a request and register a fresh state for it.
    pub fn create(&self, state_id: StateId, request: PipelineRequest) -> WorkerResult<()> {
        request.validate()?;

        let mut states = self.states.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if states.contains_key(&state_id) {
            return Err(WorkerError::StateExists(state_id));
        }

        debug!(state_id = %state_id, title = %request.title, "Registered pipeline state");
        let state = PipelineState::new(state_id.clone(), request);
        states.insert(state_id, Arc::new(Mutex::new(state)));
        Ok(())
    }

    /// Register a previously checkpointed state, if one exists.
    pub async fn restore(&self, state_id: &StateId) -> WorkerResult<bool> {
        let Some(snapshot) = self.checkpoints.load(state_id).await? else {
            return Ok(false);
        };

        let mut states = self.states.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if states.contains_key(state_id) {
            return Err(WorkerError::StateExists(state_id.clone()));
        }
        states.insert(state_id.clone(), Arc::new(Mutex::new(snapshot)));
        Ok(true)
    }

    fn entry(&self, state_id: &StateId) -> WorkerResult<Entry> {
        self.states
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(state_id)
            .cloned()
            .ok_or_else(|| WorkerError::StateNotFound(state_id.clone()))
    }

    pub fn contains(&self, state_id: &StateId) -> bool {
        self.states
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(state_id)
    }

    pub fn ids(&self) -> Vec<StateId> {
        let mut ids: Vec<StateId> = self
            .states
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Drop a state from memory. Checkpoints are left in place.
    pub fn remove(&self, state_id: &StateId) -> bool {
        self.states
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(state_id)
            .is_some()
    }

    /// Run a read-only closure against a state.
    pub async fn read<R>(&self, state_id: &StateId, f: impl FnOnce(&PipelineState) -> R) -> WorkerResult<R> {
        let entry = self.entry(state_id)?;
        let state = entry.lock().await;
        Ok(f(&state))
    }

    /// Run a mutating closure against a state and bump its timestamp.
    pub async fn update<R>(
        &self,
        state_id: &StateId,
        f: impl FnOnce(&mut PipelineState) -> R,
    ) -> WorkerResult<R> {
        let entry = self.entry(state_id)?;
        let mut state = entry.lock().await;
        let result = f(&mut state);
        state.touch();
        Ok(result)
    }

    /// Clone of the current state.
    pub async fn snapshot(&self, state_id: &StateId) -> WorkerResult<PipelineState> {
        self.read(state_id, PipelineState::clone).await
    }

    /// Publish an update. Delivery failures are logged, never propagated.
    pub async fn publish(&self, update: PipelineUpdate) {
        if let Err(e) = self.updates.publish(&update).await {
            warn!(
                state_id = %update.state_id(),
                update = update.update_type().as_str(),
                "Failed to publish update: {}", e
            );
        }
    }

    /// Publish the stage statuses and caption counts of a state.
    pub async fn publish_status(&self, state_id: &StateId) -> WorkerResult<()> {
        let update = self
            .read(state_id, |state| PipelineUpdate::StatusSync {
                state_id: state.state_id.clone(),
                chunking: state.status.chunking,
                summarizing: state.status.summarizing,
                audio: state.audio.as_ref().map(|a| a.status),
                captions: state.caption_counts(),
            })
            .await?;
        self.publish(update).await;
        Ok(())
    }

    /// Persist the current snapshot of a state.
    pub async fn checkpoint(&self, state_id: &StateId) -> WorkerResult<()> {
        let snapshot = self.snapshot(state_id).await?;
        self.checkpoints.upsert(state_id, &snapshot).await?;
        debug!(state_id = %state_id, "Checkpointed state");
        Ok(())
    }

    /// Record a producer chunk. Returns the state's frame count afterwards.
    pub async fn add_chunk(&self, message: &ChunkMessage) -> WorkerResult<usize> {
        let state_id = StateId::from_string(message.video_identifier.clone());
        let total_frames = self
            .update(&state_id, |state| {
                state.upsert_chunk(message);
                state.frames.len()
            })
            .await?;

        self.publish(PipelineUpdate::FramesSync {
            state_id,
            chunk_id: message.chunk_id,
            total_frames,
        })
        .await;
        Ok(total_frames)
    }

    pub async fn set_chunking_status(&self, state_id: &StateId, status: ActionStatus) -> WorkerResult<()> {
        self.update(state_id, |state| state.status.chunking = status).await?;
        self.publish_status(state_id).await
    }

    pub async fn set_summary_status(&self, state_id: &StateId, status: ActionStatus) -> WorkerResult<()> {
        self.update(state_id, |state| state.status.summarizing = status).await?;
        self.publish_status(state_id).await
    }

    /// Register READY windows and return the queue items for them.
    ///
    /// A window whose key is already known is reset to READY.
    pub async fn register_windows(
        &self,
        state_id: &StateId,
        windows: Vec<Vec<u64>>,
    ) -> WorkerResult<Vec<CaptionQueueItem>> {
        let items = self
            .update(state_id, |state| {
                windows
                    .into_iter()
                    .filter_map(WindowSummary::ready)
                    .map(|window| {
                        let item = CaptionQueueItem::new(state.state_id.clone(), window.frames.clone());
                        state.windows.insert(window.window_key.clone(), window);
                        item
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

        self.publish_status(state_id).await?;
        Ok(items)
    }

    /// Move a window to a new status, storing the caption when one is given.
    ///
    /// Returns `false` when the state has no window with that key.
    pub async fn set_window_status(
        &self,
        state_id: &StateId,
        window_key: &str,
        status: ActionStatus,
        caption: Option<String>,
    ) -> WorkerResult<bool> {
        let window = self
            .update(state_id, |state| {
                let window = state.windows.get_mut(window_key)?;
                window.status = status;
                if let Some(caption) = caption {
                    window.caption = caption;
                }
                Some(window.clone())
            })
            .await?;

        let Some(window) = window else {
            warn!(state_id = %state_id, window = %window_key, "Unknown caption window");
            return Ok(false);
        };

        self.publish(PipelineUpdate::WindowSync {
            state_id: state_id.clone(),
            window,
        })
        .await;
        self.publish_status(state_id).await?;
        Ok(true)
    }

    /// Record the model used by a stage, once per state and stage.
    ///
    /// Returns `true` if this call recorded it.
    pub async fn record_inference(
        &self,
        state_id: &StateId,
        stage: InferenceStage,
        info: ModelInfo,
    ) -> WorkerResult<bool> {
        let recorded = self
            .update(state_id, |state| {
                let slot = match stage {
                    InferenceStage::ObjectDetection => &mut state.inference_config.object_detection,
                    InferenceStage::ImageInference => &mut state.inference_config.image_inference,
                    InferenceStage::TextInference => &mut state.inference_config.text_inference,
                };
                if slot.is_some() {
                    return None;
                }
                *slot = Some(info);
                Some(state.inference_config.clone())
            })
            .await?;

        match recorded {
            Some(inference_config) => {
                self.publish(PipelineUpdate::ConfigSync {
                    state_id: state_id.clone(),
                    inference_config,
                })
                .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Mark the audio stage as sent to the transcription service.
    pub async fn audio_started(&self, state_id: &StateId, block: AudioBlock) -> WorkerResult<()> {
        self.update(state_id, |state| state.audio = Some(block)).await?;
        self.publish_status(state_id).await
    }

    /// Store a parsed transcript and mark the audio stage complete.
    pub async fn audio_complete(
        &self,
        state_id: &StateId,
        transcript_path: String,
        transcript: Vec<TranscriptLine>,
    ) -> WorkerResult<()> {
        self.update(state_id, |state| {
            if let Some(audio) = state.audio.as_mut() {
                audio.status = ActionStatus::Complete;
                audio.transcript_path = Some(transcript_path);
                audio.transcript = transcript;
            }
        })
        .await?;
        self.publish_status(state_id).await
    }

    pub async fn audio_failed(&self, state_id: &StateId) -> WorkerResult<()> {
        self.update(state_id, |state| {
            if let Some(audio) = state.audio.as_mut() {
                audio.status = ActionStatus::Failed;
            }
        })
        .await?;
        self.publish_status(state_id).await
    }

    /// Append a streamed piece of the summary and republish it.
    pub async fn append_summary(&self, state_id: &StateId, chunk: String) -> WorkerResult<()> {
        self.update(state_id, |state| state.summary.push_str(&chunk)).await?;
        self.publish(PipelineUpdate::SummaryChunk {
            state_id: state_id.clone(),
            chunk,
        })
        .await;
        Ok(())
    }

    /// Finalize the summary text and mark the summary stage complete.
    pub async fn complete_summary(&self, state_id: &StateId, summary: String) -> WorkerResult<()> {
        self.update(state_id, |state| {
            state.summary = summary.clone();
            state.status.summarizing = ActionStatus::Complete;
        })
        .await?;

        self.publish(PipelineUpdate::SummaryComplete {
            state_id: state_id.clone(),
            summary,
        })
        .await;
        self.publish_status(state_id).await
    }

    /// Record a fatal error, applying `mark` to set the failed stage.
    pub async fn fail(
        &self,
        state_id: &StateId,
        message: &str,
        mark: impl FnOnce(&mut PipelineState),
    ) -> WorkerResult<()> {
        self.update(state_id, |state| {
            mark(state);
            state.error = Some(message.to_string());
        })
        .await?;

        self.publish(PipelineUpdate::error(state_id.clone(), message)).await;
        self.publish_status(state_id).await
    }
}
