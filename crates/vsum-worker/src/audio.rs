//! Audio transcription trigger.
//!
//! Fires the transcription of a video at most once, independently of the
//! caption stage, and reports back through `CheckQueueStatus` whatever the
//! outcome so chunking can complete.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn, Instrument};

use vsum_inference::{parse_srt, TranscriptionBackend};
use vsum_models::{AudioBlock, StateId, TranscriptLine};

use crate::command::PipelineCommand;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{Stage, StateLogger};
use crate::metrics;
use crate::store::StateStore;

pub struct AudioTrigger {
    backend: Arc<dyn TranscriptionBackend>,
    store: Arc<StateStore>,
    commands: mpsc::Sender<PipelineCommand>,
    fired: Mutex<HashSet<StateId>>,
    /// Outstanding transcriptions keyed by state, valued by run number
    in_flight: Mutex<HashMap<StateId, u64>>,
    next_run: AtomicU64,
}

impl AudioTrigger {
    pub fn new(
        backend: Arc<dyn TranscriptionBackend>,
        store: Arc<StateStore>,
        commands: mpsc::Sender<PipelineCommand>,
    ) -> Self {
        Self {
            backend,
            store,
            commands,
            fired: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(0),
        }
    }

    /// Start transcribing a state's video in the background.
    ///
    /// Returns `false` if audio was already fired for the state. The state is
    /// reported as processing from the moment this returns `true`.
    pub fn fire(self: &Arc<Self>, state_id: &StateId) -> bool {
        let first = self
            .fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(state_id.clone());
        if !first {
            return false;
        }

        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(state_id.clone(), run);

        let trigger = Arc::clone(self);
        let state_id = state_id.clone();
        tokio::spawn(async move {
            trigger.run(state_id, run).await;
        });
        true
    }

    /// Whether a transcription for the state is still outstanding.
    pub fn is_processing(&self, state_id: &StateId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(state_id)
    }

    /// Drop everything known about a removed state so a later submission
    /// under the same id transcribes again.
    ///
    /// A transcription still running for the state finishes without
    /// touching the store. Returns `true` if audio had been fired.
    pub fn forget(&self, state_id: &StateId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(state_id);
        self.fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(state_id)
    }

    /// Clear the in-flight marker if it still belongs to `run`.
    fn finish(&self, state_id: &StateId, run: u64) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if in_flight.get(state_id) == Some(&run) {
            in_flight.remove(state_id);
            true
        } else {
            false
        }
    }

    async fn run(&self, state_id: StateId, run: u64) {
        let logger = StateLogger::new(&state_id, Stage::Audio);
        logger.log_start("requesting transcript");

        let result = self.transcribe(&state_id).instrument(logger.span()).await;
        if !self.finish(&state_id, run) {
            debug!(state_id = %state_id, run, "Dropping transcription of a removed state");
            return;
        }

        let recorded = match result {
            Ok((transcript_path, lines)) => {
                let count = lines.len();
                self.store
                    .audio_complete(&state_id, transcript_path, lines)
                    .await
                    .map(|()| count)
            }
            Err(e) => Err(e),
        };

        match recorded {
            Ok(count) => {
                metrics::record_transcription("complete");
                logger.log_completion(&format!("{} transcript lines", count));
            }
            Err(e) => {
                metrics::record_transcription("failed");
                metrics::record_pipeline_error(Stage::Audio.as_str());
                logger.log_error(&e.to_string());
                if let Err(e) = self.store.audio_failed(&state_id).await {
                    logger.log_warning(&format!("could not record audio failure: {}", e));
                }
            }
        }

        let check = PipelineCommand::CheckQueueStatus {
            state_ids: vec![state_id],
        };
        if self.commands.send(check).await.is_err() {
            warn!("Coordinator stopped, dropping audio status check");
        }
    }

    async fn transcribe(&self, state_id: &StateId) -> WorkerResult<(String, Vec<TranscriptLine>)> {
        let (video, model) = self
            .store
            .read(state_id, |state| (state.video.clone(), state.audio_model.clone()))
            .await?;
        let model = model.ok_or_else(|| WorkerError::invalid_request("no audio model configured"))?;

        let request = self.backend.request_for(&video, &model);
        self.store
            .audio_started(state_id, AudioBlock::in_progress(request.device, model.as_str()))
            .await?;

        let response = self.backend.transcribe(&request).await?;
        let srt = self
            .backend
            .fetch_transcript(&video.video_id, &response.transcript_path)
            .await?;
        let lines = parse_srt(&srt)?;
        Ok((response.transcript_path, lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use vsum_inference::{InferenceError, InferenceResult};
    use vsum_models::{
        ActionStatus, AudioDevice, PipelineRequest, PromptConfig, SamplingParams,
        TranscriptionRequest, TranscriptionResponse, VideoRef,
    };
    use vsum_queue::{BroadcastSink, MemoryCheckpointStore};

    const SRT: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello there.\n\n2\n00:00:03,000 --> 00:00:04,000\nGeneral.\n";

    struct FakeTranscriber {
        fail: bool,
    }

    #[async_trait]
    impl TranscriptionBackend for FakeTranscriber {
        fn request_for(&self, video: &VideoRef, model: &str) -> TranscriptionRequest {
            TranscriptionRequest {
                device: AudioDevice::Cpu,
                model_name: model.to_string(),
                include_timestamps: true,
                bucket: "videos".into(),
                video_id: video.video_id.clone(),
                video_name: video.video_id.clone(),
            }
        }

        async fn transcribe(&self, request: &TranscriptionRequest) -> InferenceResult<TranscriptionResponse> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                return Err(InferenceError::ServiceUnavailable("503".into()));
            }
            Ok(TranscriptionResponse {
                job_id: "job-1".into(),
                message: String::new(),
                status: "completed".into(),
                transcript_path: format!("transcripts/{}.srt", request.video_id),
                video_duration: 4.0,
                video_name: request.video_name.clone(),
            })
        }

        async fn fetch_transcript(&self, video_id: &str, transcript_path: &str) -> InferenceResult<String> {
            assert_eq!(video_id, "video-1");
            assert!(transcript_path.ends_with(".srt"));
            Ok(SRT.to_string())
        }
    }

    fn setup(fail: bool) -> (Arc<AudioTrigger>, Arc<StateStore>, mpsc::Receiver<PipelineCommand>) {
        let store = Arc::new(StateStore::new(
            Arc::new(BroadcastSink::new(64)),
            Arc::new(MemoryCheckpointStore::new()),
        ));
        store
            .create(
                StateId::from("s1"),
                PipelineRequest {
                    title: "Interview".into(),
                    video: VideoRef {
                        video_id: "video-1".into(),
                        object_name: None,
                        file_name: None,
                    },
                    sampling: SamplingParams::default(),
                    prompts: PromptConfig::default(),
                    audio_model: Some("small".into()),
                },
            )
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        let trigger = Arc::new(AudioTrigger::new(Arc::new(FakeTranscriber { fail }), store.clone(), tx));
        (trigger, store, rx)
    }

    #[tokio::test]
    async fn test_transcript_stored_then_check_emitted() {
        let (trigger, store, mut rx) = setup(false);
        let id = StateId::from("s1");

        assert!(trigger.fire(&id));
        assert!(trigger.is_processing(&id));
        assert!(!trigger.fire(&id));

        let command = rx.recv().await.unwrap();
        assert!(matches!(command, PipelineCommand::CheckQueueStatus { ref state_ids } if state_ids == &[id.clone()]));
        assert!(!trigger.is_processing(&id));

        let audio = store.read(&id, |s| s.audio.clone()).await.unwrap().unwrap();
        assert_eq!(audio.status, ActionStatus::Complete);
        assert_eq!(audio.transcript.len(), 2);
        assert_eq!(audio.transcript[0].text, "Hello there.");
        assert_eq!(audio.transcript_path.as_deref(), Some("transcripts/video-1.srt"));
    }

    #[tokio::test]
    async fn test_failure_still_emits_check() {
        let (trigger, store, mut rx) = setup(true);
        let id = StateId::from("s1");

        assert!(trigger.fire(&id));
        assert!(matches!(rx.recv().await, Some(PipelineCommand::CheckQueueStatus { .. })));
        assert!(!trigger.is_processing(&id));

        let status = store.read(&id, |s| s.audio.as_ref().map(|a| a.status)).await.unwrap();
        assert_eq!(status, Some(ActionStatus::Failed));
    }

    #[tokio::test]
    async fn test_forget_allows_refire() {
        let (trigger, store, mut rx) = setup(false);
        let id = StateId::from("s1");

        assert!(trigger.fire(&id));
        assert!(trigger.forget(&id));
        assert!(!trigger.is_processing(&id));
        assert!(!trigger.forget(&id));

        assert!(trigger.fire(&id));
        assert!(trigger.is_processing(&id));

        // Only the second run reports back.
        assert!(matches!(rx.recv().await, Some(PipelineCommand::CheckQueueStatus { .. })));
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        assert!(!trigger.is_processing(&id));

        let audio = store.read(&id, |s| s.audio.clone()).await.unwrap().unwrap();
        assert_eq!(audio.status, ActionStatus::Complete);
    }
}
