//! Caption dispatch handler.
//!
//! Turns one caption window into a prompt plus frame URLs, calls the
//! captioning backend with retries and records the outcome on the window.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use vsum_inference::template::{add_audio_transcript, add_detected_objects};
use vsum_inference::{CaptionBackend, InferenceError};
use vsum_models::{
    render_transcript, ActionStatus, AudioBlock, CaptionQueueItem, PipelineState, StateId,
};
use vsum_queue::DispatchHandler;

use crate::command::PipelineCommand;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{Stage, StateLogger};
use crate::metrics;
use crate::retry::{retry_async, RetryConfig, RetryResult};
use crate::store::{InferenceStage, StateStore};

/// Prompt and frame URIs for one caption call.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionInput {
    pub prompt: String,
    pub frame_uris: Vec<String>,
}

/// Build the caption call for a window of a state.
///
/// Frames the state does not know are skipped. Detected object labels are
/// deduplicated in first-seen order; transcript cues are included when their
/// time range intersects the window's estimated span.
pub fn caption_input(state: &PipelineState, frame_ids: &[u64]) -> CaptionInput {
    let records: Vec<_> = frame_ids.iter().filter_map(|id| state.frame(*id)).collect();

    let mut labels: Vec<&str> = Vec::new();
    for metadata in records.iter().filter_map(|r| r.metadata.as_ref()) {
        for label in metadata.labels() {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
    }

    let mut prompt = state.prompts.frame_prompt.clone();
    if !labels.is_empty() {
        prompt = add_detected_objects(&prompt, &labels);
    }

    let transcript = state.audio.as_ref().and_then(AudioBlock::usable_transcript);
    let span = frame_ids.iter().min().zip(frame_ids.iter().max());
    if let (Some(lines), Some((first, last))) = (transcript, span) {
        // Span is estimated from frame ids only, not from chunk boundaries.
        let start = state.sampling.frame_seconds(*first);
        let end = state.sampling.frame_seconds(*last);
        let text = render_transcript(lines.iter().filter(|line| line.overlaps(start, end)));
        if !text.is_empty() {
            prompt = add_audio_transcript(&prompt, &text);
        }
    }

    CaptionInput {
        prompt,
        frame_uris: records.iter().map(|r| r.frame_uri.clone()).collect(),
    }
}

/// Resolve a frame URI against the frame base URL when it is relative.
pub fn resolve_frame_url(base: Option<&Url>, uri: &str) -> String {
    if Url::parse(uri).is_ok() {
        return uri.to_string();
    }
    match base.map(|b| b.join(uri)) {
        Some(Ok(url)) => url.to_string(),
        _ => uri.to_string(),
    }
}

/// Caption stage handler for the caption worker pool.
pub struct CaptionHandler {
    backend: Arc<dyn CaptionBackend>,
    store: Arc<StateStore>,
    commands: mpsc::Sender<PipelineCommand>,
    retry: RetryConfig,
    frame_base: Option<Url>,
}

impl CaptionHandler {
    pub fn new(
        backend: Arc<dyn CaptionBackend>,
        store: Arc<StateStore>,
        commands: mpsc::Sender<PipelineCommand>,
        config: &WorkerConfig,
    ) -> WorkerResult<Self> {
        let frame_base = config
            .frame_base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| WorkerError::config_error(format!("invalid frame base URL: {}", e)))?;

        let retry = RetryConfig::new("caption")
            .with_max_retries(config.caption_retries)
            .with_base_delay(config.caption_retry_delay);

        Ok(Self {
            backend,
            store,
            commands,
            retry,
            frame_base,
        })
    }

    async fn caption_window(&self, item: &CaptionQueueItem, logger: &StateLogger) -> WorkerResult<String> {
        let input = self
            .store
            .read(&item.state_id, |state| caption_input(state, &item.frames))
            .await?;

        if input.frame_uris.is_empty() {
            return Err(WorkerError::invalid_request(format!(
                "no frames recorded for window {}",
                item.window_key
            )));
        }

        let urls: Vec<String> = input
            .frame_uris
            .iter()
            .map(|uri| resolve_frame_url(self.frame_base.as_ref(), uri))
            .collect();

        debug!(
            state_id = %item.state_id,
            window = %item.window_key,
            frames = urls.len(),
            "Captioning window"
        );

        match retry_async(&self.retry, InferenceError::is_retryable, || {
            self.backend.caption(&input.prompt, &urls)
        })
        .await
        {
            RetryResult::Success(caption) => Ok(caption),
            RetryResult::Failed { error, attempts } => {
                logger.log_warning(&format!(
                    "window {} gave up after {} attempt(s)",
                    item.window_key, attempts
                ));
                Err(error.into())
            }
        }
    }
}

#[async_trait]
impl DispatchHandler<CaptionQueueItem> for CaptionHandler {
    fn is_ready(&self) -> bool {
        self.backend.is_ready()
    }

    async fn handle(&self, item: CaptionQueueItem) {
        let logger = StateLogger::new(&item.state_id, Stage::Captioning);
        let started = Instant::now();

        match self
            .store
            .set_window_status(&item.state_id, &item.window_key, ActionStatus::InProgress, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                logger.log_warning(&format!("dropping window {}: {}", item.window_key, e));
                return;
            }
        }

        if let Some(info) = self.backend.model_info() {
            if let Err(e) = self
                .store
                .record_inference(&item.state_id, InferenceStage::ImageInference, info)
                .await
            {
                warn!(state_id = %item.state_id, "Failed to record caption model: {}", e);
            }
        }

        let (status, caption) = match self.caption_window(&item, &logger).await {
            Ok(caption) => (ActionStatus::Complete, Some(caption)),
            Err(e) => {
                logger.log_error(&format!("window {}: {}", item.window_key, e));
                metrics::record_pipeline_error(Stage::Captioning.as_str());
                (ActionStatus::Failed, None)
            }
        };

        metrics::record_caption(
            if status == ActionStatus::Complete { "complete" } else { "failed" },
            started.elapsed().as_secs_f64(),
        );

        if let Err(e) = self
            .store
            .set_window_status(&item.state_id, &item.window_key, status, caption)
            .await
        {
            logger.log_warning(&format!("could not record window {}: {}", item.window_key, e));
        }
    }

    async fn on_aborted(&self, item: CaptionQueueItem) {
        let logger = StateLogger::new(&item.state_id, Stage::Captioning);
        logger.log_error(&format!("window {} aborted", item.window_key));
        metrics::record_pipeline_error(Stage::Captioning.as_str());

        if let Err(e) = self
            .store
            .set_window_status(&item.state_id, &item.window_key, ActionStatus::Failed, None)
            .await
        {
            logger.log_warning(&format!("could not record window {}: {}", item.window_key, e));
        }
    }

    async fn on_drained(&self, state_id: StateId) {
        if self
            .commands
            .send(PipelineCommand::CaptionsDrained { state_id })
            .await
            .is_err()
        {
            warn!("Coordinator stopped, dropping caption drain signal");
        }
    }
}
