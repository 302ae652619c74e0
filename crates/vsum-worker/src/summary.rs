//! Summary dispatch handler.
//!
//! Runs the map-reduce summarizer over a state's captions, streams the final
//! pass into the state's running summary and reports the outcome to the
//! coordinator.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use vsum_inference::template::add_video_transcript;
use vsum_inference::{MapReduceSummarizer, SummarizerConfig, SummaryPrompts, TextBackend};
use vsum_models::{render_transcript, AudioBlock, StateId, SummaryQueueItem};
use vsum_queue::DispatchHandler;

use crate::command::PipelineCommand;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{Stage, StateLogger};
use crate::metrics;
use crate::store::{InferenceStage, StateStore};

pub struct SummaryHandler {
    summarizer: MapReduceSummarizer<dyn TextBackend>,
    store: Arc<StateStore>,
    commands: mpsc::Sender<PipelineCommand>,
    stream_buffer: usize,
}

impl SummaryHandler {
    pub fn new(
        backend: Arc<dyn TextBackend>,
        config: SummarizerConfig,
        store: Arc<StateStore>,
        commands: mpsc::Sender<PipelineCommand>,
        stream_buffer: usize,
    ) -> Self {
        Self {
            summarizer: MapReduceSummarizer::new(backend, config),
            store,
            commands,
            stream_buffer: stream_buffer.max(1),
        }
    }

    async fn send(&self, command: PipelineCommand) {
        let name = command.name();
        if self.commands.send(command).await.is_err() {
            warn!(command = name, "Coordinator stopped, dropping summary command");
        }
    }

    async fn summarize(&self, state_id: &StateId, logger: &StateLogger) -> WorkerResult<String> {
        let (captions, prompts, transcript) = self
            .store
            .update(state_id, |state| {
                state.summary.clear();
                let transcript = state
                    .audio
                    .as_ref()
                    .and_then(AudioBlock::usable_transcript)
                    .map(|lines| render_transcript(lines));
                (state.captions_in_order(), state.prompts.clone(), transcript)
            })
            .await?;

        if captions.is_empty() {
            return Err(WorkerError::invalid_request("no completed captions to summarize"));
        }

        if let Some(info) = self.summarizer.backend().model_info() {
            self.store
                .record_inference(state_id, InferenceStage::TextInference, info)
                .await?;
        }

        let map_prompt = match transcript {
            Some(transcript) => add_video_transcript(&prompts.summary_map_prompt, &transcript),
            None => prompts.summary_map_prompt.clone(),
        };
        let summary_prompts = SummaryPrompts {
            map: &map_prompt,
            reduce: &prompts.summary_reduce_prompt,
            single_reduce: &prompts.summary_single_prompt,
        };

        logger.log_progress(&format!("summarizing {} captions", captions.len()));

        let (tx, mut rx) = mpsc::channel::<String>(self.stream_buffer);
        let summarizer = &self.summarizer;
        let run = async move {
            let result = summarizer.summarize(captions, &summary_prompts, &tx).await;
            drop(tx);
            result
        };
        let forward = async {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = self.store.append_summary(state_id, chunk).await {
                    logger.log_warning(&format!("could not append summary chunk: {}", e));
                }
            }
        };

        let (result, ()) = tokio::join!(run, forward);
        result.map_err(WorkerError::from)
    }
}

#[async_trait]
impl DispatchHandler<SummaryQueueItem> for SummaryHandler {
    fn is_ready(&self) -> bool {
        self.summarizer.backend().is_ready()
    }

    async fn handle(&self, item: SummaryQueueItem) {
        let state_id = item.state_id;
        let logger = StateLogger::new(&state_id, Stage::Summary);
        let started = Instant::now();

        self.send(PipelineCommand::SummaryProcessing {
            state_id: state_id.clone(),
        })
        .await;
        logger.log_start("summary dispatched");

        let command = match self.summarize(&state_id, &logger).await {
            Ok(summary) => {
                metrics::record_summary("complete", started.elapsed().as_secs_f64());
                logger.log_completion(&format!("{} characters", summary.chars().count()));
                PipelineCommand::SummaryComplete { state_id, summary }
            }
            Err(e) => {
                metrics::record_summary("failed", started.elapsed().as_secs_f64());
                metrics::record_pipeline_error(Stage::Summary.as_str());
                logger.log_error(&e.to_string());
                PipelineCommand::SummaryFailed {
                    state_id,
                    error: e.to_string(),
                }
            }
        };

        self.send(command).await;
    }

    async fn on_aborted(&self, item: SummaryQueueItem) {
        metrics::record_pipeline_error(Stage::Summary.as_str());
        StateLogger::new(&item.state_id, Stage::Summary).log_error("summary aborted");
        self.send(PipelineCommand::SummaryFailed {
            state_id: item.state_id,
            error: "summary aborted".into(),
        })
        .await;
    }
}
