//! Model discovery loop for the inference backends.
//!
//! A backend stays out of dispatch until discovery succeeds. Backends that
//! are not ready are probed again on every interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use vsum_inference::OpenAiClient;

use crate::metrics;
use crate::retry::FailureTracker;

/// Number of consecutive discovery failures logged per backend before suppression.
const MAX_LOGGED_FAILURES: u32 = 5;

/// Probe one backend if it is not ready. Returns its readiness afterwards.
pub async fn probe(client: &OpenAiClient, tracker: &mut FailureTracker) -> bool {
    if client.is_ready() {
        return true;
    }

    let name = client.config().name.as_str();
    match client.discover_model().await {
        Ok(model) => {
            tracker.record_success();
            metrics::set_backend_ready(name, true);
            info!(backend = %name, model = %model, "Backend available");
            true
        }
        Err(e) => {
            metrics::set_backend_ready(name, false);
            if tracker.record_failure() {
                warn!(
                    backend = %name,
                    failures = tracker.failure_count(),
                    "Backend not ready: {}", e
                );
            }
            false
        }
    }
}

/// Keep probing backends until shutdown is signalled.
pub async fn run_discovery(
    clients: Vec<Arc<OpenAiClient>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut trackers: Vec<FailureTracker> = clients
        .iter()
        .map(|_| FailureTracker::new(MAX_LOGGED_FAILURES))
        .collect();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                for (client, tracker) in clients.iter().zip(trackers.iter_mut()) {
                    probe(client, tracker).await;
                }
            }
        }
    }
}
