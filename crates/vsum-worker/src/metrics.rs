//! Prometheus metrics for the pipeline worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("failed to install metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Producer metrics
    pub const CHUNKS_RECEIVED_TOTAL: &str = "vsum_chunks_received_total";
    pub const FRAMES_RECEIVED_TOTAL: &str = "vsum_frames_received_total";

    // Caption metrics
    pub const WINDOWS_ENQUEUED_TOTAL: &str = "vsum_windows_enqueued_total";
    pub const CAPTIONS_TOTAL: &str = "vsum_captions_total";
    pub const CAPTION_DURATION_SECONDS: &str = "vsum_caption_duration_seconds";

    // Queue metrics
    pub const QUEUE_WAITING: &str = "vsum_queue_waiting";
    pub const QUEUE_IN_FLIGHT: &str = "vsum_queue_in_flight";

    // Audio metrics
    pub const TRANSCRIPTIONS_TOTAL: &str = "vsum_transcriptions_total";

    // Summary metrics
    pub const SUMMARIES_TOTAL: &str = "vsum_summaries_total";
    pub const SUMMARY_DURATION_SECONDS: &str = "vsum_summary_duration_seconds";

    // Pipeline metrics
    pub const PIPELINE_ERRORS_TOTAL: &str = "vsum_pipeline_errors_total";
    pub const BACKEND_READY: &str = "vsum_backend_ready";
}

/// Record a producer chunk and its frames.
pub fn record_chunk_received(frames: usize) {
    counter!(names::CHUNKS_RECEIVED_TOTAL).increment(1);
    counter!(names::FRAMES_RECEIVED_TOTAL).increment(frames as u64);
}

pub fn record_windows_enqueued(count: usize) {
    counter!(names::WINDOWS_ENQUEUED_TOTAL).increment(count as u64);
}

/// Record a finished caption call.
pub fn record_caption(status: &str, duration_secs: f64) {
    let labels = [("status", status.to_string())];
    counter!(names::CAPTIONS_TOTAL, &labels).increment(1);
    histogram!(names::CAPTION_DURATION_SECONDS).record(duration_secs);
}

/// Update queue depth gauges.
pub fn set_queue_depth(queue: &str, waiting: usize, in_flight: usize) {
    let labels = [("queue", queue.to_string())];
    gauge!(names::QUEUE_WAITING, &labels).set(waiting as f64);
    gauge!(names::QUEUE_IN_FLIGHT, &labels).set(in_flight as f64);
}

pub fn record_transcription(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::TRANSCRIPTIONS_TOTAL, &labels).increment(1);
}

/// Record a finished summary run.
pub fn record_summary(status: &str, duration_secs: f64) {
    let labels = [("status", status.to_string())];
    counter!(names::SUMMARIES_TOTAL, &labels).increment(1);
    histogram!(names::SUMMARY_DURATION_SECONDS).record(duration_secs);
}

pub fn record_pipeline_error(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::PIPELINE_ERRORS_TOTAL, &labels).increment(1);
}

pub fn set_backend_ready(backend: &str, ready: bool) {
    let labels = [("backend", backend.to_string())];
    gauge!(names::BACKEND_READY, &labels).set(if ready { 1.0 } else { 0.0 });
}
