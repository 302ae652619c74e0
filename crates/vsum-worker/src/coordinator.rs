//! Pipeline coordinator.
//!
//! Single-owner task that applies [`PipelineCommand`]s to the state store and
//! moves work between the stages:
//!
//! ```text
//! chunking:      NA -> IN_PROGRESS -> COMPLETE | FAILED
//! video summary: NA -> READY -> IN_PROGRESS -> COMPLETE | FAILED
//! ```
//!
//! Chunking completes once neither the producer nor the audio trigger is
//! still working on a state; completion enumerates the caption windows.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use vsum_models::{
    ActionStatus, CaptionQueueItem, ChunkMessage, ModelInfo, StateId, SummaryQueueItem,
};
use vsum_queue::DispatchQueue;

use crate::audio::AudioTrigger;
use crate::command::PipelineCommand;
use crate::error::WorkerResult;
use crate::logging::{Stage, StateLogger};
use crate::metrics;
use crate::store::{InferenceStage, StateStore};
use crate::windowing::windows_for;

pub struct Coordinator {
    store: Arc<StateStore>,
    captions: Arc<DispatchQueue<CaptionQueueItem>>,
    summaries: Arc<DispatchQueue<SummaryQueueItem>>,
    audio: Option<Arc<AudioTrigger>>,
    /// States whose producer has not reported the last chunk yet
    chunking: HashSet<StateId>,
}

impl Coordinator {
    pub fn new(
        store: Arc<StateStore>,
        captions: Arc<DispatchQueue<CaptionQueueItem>>,
        summaries: Arc<DispatchQueue<SummaryQueueItem>>,
        audio: Option<Arc<AudioTrigger>>,
    ) -> Self {
        Self {
            store,
            captions,
            summaries,
            audio,
            chunking: HashSet::new(),
        }
    }

    /// Apply one command.
    pub async fn handle(&mut self, command: PipelineCommand) -> WorkerResult<()> {
        match command {
            PipelineCommand::Start {
                state_id,
                object_detection,
            } => self.start(state_id, object_detection).await,
            PipelineCommand::ChunkReceived(message) => self.chunk_received(&message).await,
            PipelineCommand::ChunkingFinished { state_id } => {
                self.chunking.remove(&state_id);
                self.check_queue_status(vec![state_id]).await
            }
            PipelineCommand::CheckQueueStatus { state_ids } => self.check_queue_status(state_ids).await,
            PipelineCommand::CaptionsDrained { state_id } => self.captions_drained(&state_id).await,
            PipelineCommand::SummaryProcessing { state_id } => {
                self.store
                    .set_summary_status(&state_id, ActionStatus::InProgress)
                    .await
            }
            PipelineCommand::SummaryComplete { state_id, summary } => {
                self.store.complete_summary(&state_id, summary).await?;
                self.store.checkpoint(&state_id).await
            }
            PipelineCommand::SummaryFailed { state_id, error } => {
                self.store
                    .fail(&state_id, &error, |state| {
                        state.status.summarizing = ActionStatus::Failed
                    })
                    .await?;
                self.store.checkpoint(&state_id).await
            }
            PipelineCommand::Remove { state_id } => {
                self.remove(&state_id);
                Ok(())
            }
        }
    }

    /// Process commands until the channel closes or shutdown is signalled.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<PipelineCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting pipeline coordinator");

        loop {
            // Pending commands are applied before a shutdown request.
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    let name = command.name();
                    match self.handle(command).await {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => error!(command = name, "Pipeline command failed: {}", e),
                        Err(e) => warn!(command = name, "Pipeline command failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(producers = self.chunking.len(), "Pipeline coordinator stopped");
    }

    async fn start(&mut self, state_id: StateId, object_detection: Option<ModelInfo>) -> WorkerResult<()> {
        let logger = StateLogger::new(&state_id, Stage::Chunking);

        if let Some(info) = object_detection {
            self.store
                .record_inference(&state_id, InferenceStage::ObjectDetection, info)
                .await?;
        }

        self.store
            .set_chunking_status(&state_id, ActionStatus::InProgress)
            .await?;
        self.chunking.insert(state_id.clone());
        logger.log_start("waiting for frames");

        let wants_audio = self
            .store
            .read(&state_id, |state| state.audio_model.is_some())
            .await?;
        if wants_audio {
            match &self.audio {
                Some(trigger) => {
                    if !trigger.fire(&state_id) {
                        logger.log_warning("transcription already fired, not requesting again");
                    }
                }
                None => logger.log_warning("audio model requested but no transcription service configured"),
            }
        }
        Ok(())
    }

    fn remove(&mut self, state_id: &StateId) {
        let producing = self.chunking.remove(state_id);
        let audio = self
            .audio
            .as_ref()
            .is_some_and(|trigger| trigger.forget(state_id));
        debug!(state_id = %state_id, producing, audio, "Forgot removed state");
    }

    async fn chunk_received(&mut self, message: &ChunkMessage) -> WorkerResult<()> {
        let state_id = StateId::from_string(message.video_identifier.clone());
        let chunking = self
            .store
            .read(&state_id, |state| state.status.chunking)
            .await?;

        if chunking.is_terminal() {
            warn!(
                state_id = %state_id,
                chunk_id = message.chunk_id,
                "Ignoring chunk received after chunking ended"
            );
            return Ok(());
        }

        let total = self.store.add_chunk(message).await?;
        metrics::record_chunk_received(message.frames.len());
        debug!(
            state_id = %state_id,
            chunk_id = message.chunk_id,
            total_frames = total,
            "Recorded chunk"
        );
        Ok(())
    }

    async fn check_queue_status(&mut self, state_ids: Vec<StateId>) -> WorkerResult<()> {
        for state_id in state_ids {
            let producing = self.chunking.contains(&state_id);
            let transcribing = self
                .audio
                .as_ref()
                .is_some_and(|trigger| trigger.is_processing(&state_id));

            if producing || transcribing {
                debug!(state_id = %state_id, producing, transcribing, "Chunking still in progress");
                continue;
            }

            if let Err(e) = self.complete_chunking(&state_id).await {
                warn!(state_id = %state_id, "Failed to complete chunking: {}", e);
            }
        }
        Ok(())
    }

    async fn complete_chunking(&mut self, state_id: &StateId) -> WorkerResult<()> {
        let logger = StateLogger::new(state_id, Stage::Chunking);

        let (status, frame_ids, sampling) = self
            .store
            .read(state_id, |state| {
                (state.status.chunking, state.sorted_frame_ids(), state.sampling.clone())
            })
            .await?;

        if status != ActionStatus::InProgress {
            debug!(state_id = %state_id, status = status.as_str(), "Chunking already resolved");
            return Ok(());
        }

        let windows = match windows_for(&frame_ids, &sampling) {
            Ok(windows) => windows,
            Err(e) => {
                logger.log_error(&e.to_string());
                metrics::record_pipeline_error(Stage::Chunking.as_str());
                self.store
                    .fail(state_id, &e.to_string(), |state| {
                        state.status.chunking = ActionStatus::Failed
                    })
                    .await?;
                return self.store.checkpoint(state_id).await;
            }
        };

        self.store
            .set_chunking_status(state_id, ActionStatus::Complete)
            .await?;

        if windows.is_empty() {
            logger.log_warning("no frames received");
            self.store
                .fail(state_id, "no frames received", |state| {
                    state.status.summarizing = ActionStatus::Failed
                })
                .await?;
            return self.store.checkpoint(state_id).await;
        }

        let items = self.store.register_windows(state_id, windows).await?;
        let count = self.captions.push_all(items);
        metrics::record_windows_enqueued(count);
        metrics::set_queue_depth(
            self.captions.name(),
            self.captions.waiting_len(),
            self.captions.processing_len(),
        );
        logger.log_completion(&format!("{} frames in {} windows", frame_ids.len(), count));
        Ok(())
    }

    async fn captions_drained(&mut self, state_id: &StateId) -> WorkerResult<()> {
        let (counts, summarizing) = self
            .store
            .read(state_id, |state| (state.caption_counts(), state.status.summarizing))
            .await?;

        if !counts.is_drained() {
            debug!(
                state_id = %state_id,
                outstanding = counts.outstanding(),
                "Caption drain with windows outstanding"
            );
            return Ok(());
        }
        if summarizing != ActionStatus::Na {
            debug!(state_id = %state_id, status = summarizing.as_str(), "Summary already scheduled");
            return Ok(());
        }

        self.store
            .set_summary_status(state_id, ActionStatus::Ready)
            .await?;
        self.summaries.push(SummaryQueueItem {
            state_id: state_id.clone(),
        });
        metrics::set_queue_depth(
            self.summaries.name(),
            self.summaries.waiting_len(),
            self.summaries.processing_len(),
        );

        StateLogger::new(state_id, Stage::Summary).log_progress(&format!(
            "queued with {} of {} windows captioned, {} failed",
            counts.complete,
            counts.total(),
            counts.failed
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use vsum_models::{ChunkFrame, PipelineRequest, PromptConfig, SamplingParams, VideoRef};
    use vsum_queue::{BroadcastSink, CheckpointStore, MemoryCheckpointStore};

    struct Fixture {
        coordinator: Coordinator,
        store: Arc<StateStore>,
        captions: Arc<DispatchQueue<CaptionQueueItem>>,
        summaries: Arc<DispatchQueue<SummaryQueueItem>>,
        checkpoints: Arc<MemoryCheckpointStore>,
    }

    fn fixture() -> Fixture {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let store = Arc::new(StateStore::new(Arc::new(BroadcastSink::new(256)), checkpoints.clone()));
        let captions = Arc::new(DispatchQueue::new("captions", 2));
        let summaries = Arc::new(DispatchQueue::new("summaries", 1));
        Fixture {
            coordinator: Coordinator::new(store.clone(), captions.clone(), summaries.clone(), None),
            store,
            captions,
            summaries,
            checkpoints,
        }
    }

    fn request(multi_frame: u32, frame_overlap: u32) -> PipelineRequest {
        PipelineRequest {
            title: "Yard".into(),
            video: VideoRef {
                video_id: "video-1".into(),
                object_name: None,
                file_name: None,
            },
            sampling: SamplingParams {
                multi_frame,
                frame_overlap,
                sampling_frame: 3,
                chunk_duration: 10.0,
            },
            prompts: PromptConfig::default(),
            audio_model: None,
        }
    }

    fn chunk(state: &str, chunk_id: u64, frames: &[u64]) -> PipelineCommand {
        PipelineCommand::ChunkReceived(ChunkMessage {
            video_identifier: state.into(),
            chunk_id,
            frames: frames
                .iter()
                .map(|id| ChunkFrame {
                    frame_id: *id,
                    image_uri: format!("{id}.jpg"),
                    image_base64: None,
                    metadata: None,
                })
                .collect(),
        })
    }

    fn id() -> StateId {
        StateId::from("s1")
    }

    async fn start_with_frames(f: &mut Fixture, frames: &[u64]) {
        f.coordinator
            .handle(PipelineCommand::Start {
                state_id: id(),
                object_detection: None,
            })
            .await
            .unwrap();
        if !frames.is_empty() {
            f.coordinator.handle(chunk("s1", 1, frames)).await.unwrap();
        }
        f.coordinator
            .handle(PipelineCommand::ChunkingFinished { state_id: id() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_chunking_enqueues_windows_once() {
        let mut f = fixture();
        f.store.create(id(), request(3, 1)).unwrap();
        start_with_frames(&mut f, &[1, 2, 3, 4, 5, 6]).await;

        let state = f.store.snapshot(&id()).await.unwrap();
        assert_eq!(state.status.chunking, ActionStatus::Complete);
        let keys: Vec<&str> = state.windows.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["1#2#3", "3#4#5", "5#6"]);
        assert_eq!(f.captions.waiting_len(), 3);

        f.coordinator
            .handle(PipelineCommand::CheckQueueStatus { state_ids: vec![id()] })
            .await
            .unwrap();
        assert_eq!(f.captions.waiting_len(), 3);
    }

    #[tokio::test]
    async fn test_chunk_after_completion_ignored() {
        let mut f = fixture();
        f.store.create(id(), request(3, 1)).unwrap();
        start_with_frames(&mut f, &[1, 2, 3]).await;

        f.coordinator.handle(chunk("s1", 2, &[4, 5])).await.unwrap();
        assert_eq!(f.store.read(&id(), |s| s.frames.len()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_state_chunk_is_error() {
        let mut f = fixture();
        assert!(f.coordinator.handle(chunk("nope", 1, &[1])).await.is_err());
    }

    #[tokio::test]
    async fn test_windowing_misconfiguration_fails_chunking() {
        let mut f = fixture();
        f.store.create(id(), request(2, 2)).unwrap();
        start_with_frames(&mut f, &[1, 2, 3]).await;

        let state = f.store.snapshot(&id()).await.unwrap();
        assert_eq!(state.status.chunking, ActionStatus::Failed);
        assert!(state.error.unwrap().contains("non-positive stride"));
        assert!(state.windows.is_empty());
        assert_eq!(f.captions.waiting_len(), 0);
        assert!(f.checkpoints.load(&id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_frames_fails_summary() {
        let mut f = fixture();
        f.store.create(id(), request(3, 0)).unwrap();
        start_with_frames(&mut f, &[]).await;

        let state = f.store.snapshot(&id()).await.unwrap();
        assert_eq!(state.status.chunking, ActionStatus::Complete);
        assert_eq!(state.status.summarizing, ActionStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("no frames received"));
    }

    #[tokio::test]
    async fn test_summary_queued_only_when_drained() {
        let mut f = fixture();
        f.store.create(id(), request(2, 0)).unwrap();
        start_with_frames(&mut f, &[1, 2, 3, 4]).await;

        f.store
            .set_window_status(&id(), "1#2", ActionStatus::Complete, Some("a".into()))
            .await
            .unwrap();
        f.coordinator
            .handle(PipelineCommand::CaptionsDrained { state_id: id() })
            .await
            .unwrap();
        assert_eq!(f.summaries.waiting_len(), 0);

        f.store
            .set_window_status(&id(), "3#4", ActionStatus::Failed, None)
            .await
            .unwrap();
        for _ in 0..2 {
            f.coordinator
                .handle(PipelineCommand::CaptionsDrained { state_id: id() })
                .await
                .unwrap();
        }
        assert_eq!(f.summaries.waiting_len(), 1);
        let status = f.store.read(&id(), |s| s.status.summarizing).await.unwrap();
        assert_eq!(status, ActionStatus::Ready);
    }

    #[tokio::test]
    async fn test_summary_outcomes_are_checkpointed() {
        let mut f = fixture();
        f.store.create(id(), request(2, 0)).unwrap();
        f.store.create(StateId::from("s2"), request(2, 0)).unwrap();

        f.coordinator
            .handle(PipelineCommand::SummaryProcessing { state_id: id() })
            .await
            .unwrap();
        f.coordinator
            .handle(PipelineCommand::SummaryComplete {
                state_id: id(),
                summary: "Done.".into(),
            })
            .await
            .unwrap();
        f.coordinator
            .handle(PipelineCommand::SummaryFailed {
                state_id: StateId::from("s2"),
                error: "context too small".into(),
            })
            .await
            .unwrap();

        let done = f.checkpoints.load(&id()).await.unwrap().unwrap();
        assert_eq!(done.status.summarizing, ActionStatus::Complete);
        assert_eq!(done.summary, "Done.");

        let failed = f.checkpoints.load(&StateId::from("s2")).await.unwrap().unwrap();
        assert_eq!(failed.status.summarizing, ActionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("context too small"));
    }

    #[tokio::test]
    async fn test_remove_forgets_open_producer() {
        let mut f = fixture();
        f.store.create(id(), request(2, 0)).unwrap();
        f.coordinator
            .handle(PipelineCommand::Start {
                state_id: id(),
                object_detection: None,
            })
            .await
            .unwrap();
        assert!(f.coordinator.chunking.contains(&id()));

        f.store.remove(&id());
        f.coordinator
            .handle(PipelineCommand::Remove { state_id: id() })
            .await
            .unwrap();
        assert!(f.coordinator.chunking.is_empty());

        // Resubmitted under the same id, chunking starts from scratch.
        f.store.create(id(), request(2, 0)).unwrap();
        start_with_frames(&mut f, &[1, 2]).await;
        let state = f.store.snapshot(&id()).await.unwrap();
        assert_eq!(state.status.chunking, ActionStatus::Complete);
        assert_eq!(f.captions.waiting_len(), 1);
    }

    #[tokio::test]
    async fn test_object_detection_model_recorded() {
        let mut f = fixture();
        f.store.create(id(), request(2, 0)).unwrap();
        f.coordinator
            .handle(PipelineCommand::Start {
                state_id: id(),
                object_detection: Some(ModelInfo {
                    model: "yolo".into(),
                    device: "GPU".into(),
                    pipeline: Some("object_detection".into()),
                }),
            })
            .await
            .unwrap();

        let state = f.store.snapshot(&id()).await.unwrap();
        assert_eq!(state.status.chunking, ActionStatus::InProgress);
        assert_eq!(state.inference_config.object_detection.unwrap().model, "yolo");
    }
}
