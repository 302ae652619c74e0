//! Pipeline assembly and lifecycle.
//!
//! Wires the state store, both dispatch queues with their worker pools, the
//! audio trigger and the coordinator task together, and exposes the
//! operations a producer needs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vsum_inference::{CaptionBackend, SummarizerConfig, TextBackend, TranscriptionBackend};
use vsum_models::{CaptionQueueItem, ModelInfo, PipelineRequest, StateId, SummaryQueueItem};
use vsum_queue::{CheckpointStore, DispatchQueue, QueueConfig, UpdateSink, WorkerPool};

use crate::audio::AudioTrigger;
use crate::caption::CaptionHandler;
use crate::command::PipelineCommand;
use crate::config::WorkerConfig;
use crate::coordinator::Coordinator;
use crate::error::{WorkerError, WorkerResult};
use crate::store::StateStore;
use crate::summary::SummaryHandler;

type CaptionPool = WorkerPool<CaptionQueueItem, CaptionHandler>;
type SummaryPool = WorkerPool<SummaryQueueItem, SummaryHandler>;

/// Inference services used by the pipeline.
pub struct Backends {
    pub captioner: Arc<dyn CaptionBackend>,
    pub text: Arc<dyn TextBackend>,
    /// Audio is skipped for every state when absent
    pub transcriber: Option<Arc<dyn TranscriptionBackend>>,
}

/// Where state updates and checkpoints go.
pub struct Sinks {
    pub updates: Arc<dyn UpdateSink>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

/// Settings the pipeline is started with.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub summarizer: SummarizerConfig,
}

/// A running pipeline.
pub struct Pipeline {
    store: Arc<StateStore>,
    commands: mpsc::Sender<PipelineCommand>,
    captions: Arc<CaptionPool>,
    summaries: Arc<SummaryPool>,
    dispatch_stop: watch::Sender<bool>,
    coordinator_stop: watch::Sender<bool>,
    pool_tasks: Vec<JoinHandle<()>>,
    coordinator_task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl Pipeline {
    /// Build every component and spawn the coordinator and pool tasks.
    pub fn start(settings: PipelineSettings, backends: Backends, sinks: Sinks) -> WorkerResult<Self> {
        let PipelineSettings {
            worker,
            queue,
            summarizer,
        } = settings;

        let store = Arc::new(StateStore::new(sinks.updates, sinks.checkpoints));
        let (commands, command_rx) = mpsc::channel(worker.command_buffer.max(1));

        let caption_queue = Arc::new(DispatchQueue::new("captions", queue.caption_concurrency));
        let summary_queue = Arc::new(DispatchQueue::new("summaries", queue.summary_concurrency));

        let caption_handler = CaptionHandler::new(
            backends.captioner,
            Arc::clone(&store),
            commands.clone(),
            &worker,
        )?;
        let summary_handler = SummaryHandler::new(
            backends.text,
            summarizer,
            Arc::clone(&store),
            commands.clone(),
            worker.summary_stream_buffer,
        );

        let audio = backends.transcriber.map(|backend| {
            Arc::new(AudioTrigger::new(backend, Arc::clone(&store), commands.clone()))
        });

        let captions = Arc::new(WorkerPool::new(Arc::clone(&caption_queue), Arc::new(caption_handler)));
        let summaries = Arc::new(WorkerPool::new(Arc::clone(&summary_queue), Arc::new(summary_handler)));

        let (dispatch_stop, dispatch_rx) = watch::channel(false);
        let (coordinator_stop, coordinator_rx) = watch::channel(false);

        let coordinator = Coordinator::new(Arc::clone(&store), caption_queue, summary_queue, audio);
        let coordinator_task = tokio::spawn(coordinator.run(command_rx, coordinator_rx));

        let interval = queue.tick_interval;
        let pool_tasks = vec![
            {
                let pool = Arc::clone(&captions);
                let stop = dispatch_rx.clone();
                tokio::spawn(async move { pool.run(interval, stop).await })
            },
            {
                let pool = Arc::clone(&summaries);
                tokio::spawn(async move { pool.run(interval, dispatch_rx).await })
            },
        ];

        info!(
            caption_concurrency = captions.queue().max_concurrent(),
            summary_concurrency = summaries.queue().max_concurrent(),
            tick_ms = interval.as_millis() as u64,
            "Pipeline started"
        );

        Ok(Self {
            store,
            commands,
            captions,
            summaries,
            dispatch_stop,
            coordinator_stop,
            pool_tasks,
            coordinator_task,
            shutdown_timeout: worker.shutdown_timeout,
        })
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Send a command to the coordinator.
    pub async fn send(&self, command: PipelineCommand) -> WorkerResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|e| WorkerError::channel_closed(format!("coordinator stopped before {}", e.0.name())))
    }

    /// Register a summarization request and start chunking it.
    ///
    /// A fresh id is generated when none is given.
    pub async fn submit(
        &self,
        request: PipelineRequest,
        state_id: Option<StateId>,
        object_detection: Option<ModelInfo>,
    ) -> WorkerResult<StateId> {
        let state_id = state_id.unwrap_or_default();
        self.store.create(state_id.clone(), request)?;
        self.send(PipelineCommand::Start {
            state_id: state_id.clone(),
            object_detection,
        })
        .await?;
        Ok(state_id)
    }

    /// Dispatch from both queues now instead of waiting for the next tick.
    pub fn tick(&self) -> usize {
        self.captions.tick() + self.summaries.tick()
    }

    /// Drop a state from memory, discarding its queued work.
    ///
    /// The coordinator is told to forget the state as well, so the id can be
    /// submitted again. Returns `false` if the state was unknown.
    pub async fn remove(&self, state_id: &StateId) -> WorkerResult<bool> {
        let discarded = self.captions.queue().discard_waiting(state_id)
            + self.summaries.queue().discard_waiting(state_id);
        if discarded > 0 {
            info!(state_id = %state_id, discarded, "Discarded queued work for removed state");
        }
        let removed = self.store.remove(state_id);
        self.send(PipelineCommand::Remove {
            state_id: state_id.clone(),
        })
        .await?;
        Ok(removed)
    }

    fn in_flight(&self) -> usize {
        self.captions.queue().processing_len() + self.summaries.queue().processing_len()
    }

    /// Stop dispatching, let in-flight calls finish within the shutdown
    /// timeout, then stop the coordinator.
    pub async fn shutdown(mut self) {
        let _ = self.dispatch_stop.send(true);
        for task in std::mem::take(&mut self.pool_tasks) {
            if let Err(e) = task.await {
                warn!("Worker pool task ended abnormally: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(in_flight = self.in_flight(), "Shutdown timeout reached with calls in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let _ = self.coordinator_stop.send(true);
        if let Err(e) = self.coordinator_task.await {
            warn!("Coordinator task ended abnormally: {}", e);
        }
        info!("Pipeline stopped");
    }
}
