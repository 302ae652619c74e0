//! Video summarization worker binary.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vsum_inference::{
    AudioClientConfig, OpenAiClient, OpenAiConfig, SummarizerConfig, TranscriptionBackend,
    TranscriptionClient,
};
use vsum_queue::{
    BroadcastSink, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, QueueConfig,
    RedisCheckpointStore, UpdateChannel, UpdateSink,
};
use vsum_worker::discovery::run_discovery;
use vsum_worker::{metrics, run_producer, Backends, Pipeline, PipelineSettings, Sinks, WorkerConfig};

fn build_sinks(queue: &QueueConfig, worker: &WorkerConfig) -> Result<Sinks, vsum_queue::QueueError> {
    if let Some(url) = &queue.redis_url {
        let updates = UpdateChannel::new(url, queue.key_prefix.clone())?;
        let checkpoints = RedisCheckpointStore::new(url, queue.key_prefix.clone(), queue.checkpoint_ttl)?;
        info!("Publishing updates and checkpoints to Redis");
        return Ok(Sinks {
            updates: Arc::new(updates),
            checkpoints: Arc::new(checkpoints),
        });
    }

    let updates: Arc<dyn UpdateSink> = Arc::new(BroadcastSink::new(worker.update_buffer));
    let checkpoints: Arc<dyn CheckpointStore> = match &queue.checkpoint_dir {
        Some(dir) => {
            info!(dir = %dir, "Writing checkpoints to disk");
            Arc::new(FileCheckpointStore::new(dir)) as Arc<dyn CheckpointStore>
        }
        None => {
            warn!("No REDIS_URL or CHECKPOINT_DIR set, checkpoints are kept in memory");
            Arc::new(MemoryCheckpointStore::new())
        }
    };
    Ok(Sinks {
        updates,
        checkpoints,
    })
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vsum=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vsum-worker");

    // Load configuration
    let worker = WorkerConfig::from_env();
    let queue = QueueConfig::from_env();
    let summarizer = SummarizerConfig::from_env();
    info!("Worker config: {:?}", worker);
    info!("Queue config: {:?}", queue);

    if let Some(addr) = worker.metrics_addr {
        if let Err(e) = metrics::init_metrics(addr) {
            error!("Failed to start metrics exporter: {}", e);
            std::process::exit(1);
        }
    }

    // Inference backends
    let captioner = match OpenAiClient::new(OpenAiConfig::captioning_from_env()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to create captioning client: {}", e);
            std::process::exit(1);
        }
    };
    let text = match OpenAiClient::new(OpenAiConfig::summarization_from_env()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to create summarization client: {}", e);
            std::process::exit(1);
        }
    };

    // Audio is optional: without a configured service, requests that name an
    // audio model are summarized from captions alone.
    let transcriber: Option<Arc<dyn TranscriptionBackend>> = match std::env::var("AUDIO_HOST") {
        Ok(host) if !host.trim().is_empty() => match TranscriptionClient::new(AudioClientConfig::from_env()) {
            Ok(client) => {
                info!(host = %host, "Audio transcription enabled");
                Some(Arc::new(client) as Arc<dyn TranscriptionBackend>)
            }
            Err(e) => {
                error!("Failed to create transcription client: {}", e);
                std::process::exit(1);
            }
        },
        _ => {
            info!("AUDIO_HOST not set, audio transcription disabled");
            None
        }
    };

    let sinks = match build_sinks(&queue, &worker) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create update sinks: {}", e);
            std::process::exit(1);
        }
    };

    let discovery_interval = worker.discovery_interval;
    let settings = PipelineSettings {
        worker,
        queue,
        summarizer,
    };
    let backends = Backends {
        captioner: captioner.clone(),
        text: text.clone(),
        transcriber,
    };

    let pipeline = match Pipeline::start(settings, backends, sinks) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to start pipeline: {}", e);
            std::process::exit(1);
        }
    };

    // Setup signal handlers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let discovery = tokio::spawn(run_discovery(
        vec![captioner, text],
        discovery_interval,
        shutdown_rx.clone(),
    ));
    let signal_handle = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    // Feed producer messages from stdin
    let reader = BufReader::new(tokio::io::stdin());
    match run_producer(reader, &pipeline, shutdown_rx.clone()).await {
        Ok(accepted) => info!(accepted, "Producer finished"),
        Err(e) => error!("Producer error: {}", e),
    }

    // Keep serving queued work after stdin closes until a shutdown signal
    let mut shutdown_rx = shutdown_rx;
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    pipeline.shutdown().await;
    discovery.await.ok();
    signal_handle.await.ok();

    info!("Worker shutdown complete");
}
