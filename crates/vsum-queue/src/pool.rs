//! Tick-driven worker pool over a [`DispatchQueue`].
//!
//! One pool type serves every dispatch stage: the work item type and the
//! handler are the only things that differ between the caption and summary
//! schedulers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use vsum_models::StateId;

use crate::dispatch::{DispatchQueue, WorkItem};

/// Stage-specific processing for a worker pool.
#[async_trait]
pub trait DispatchHandler<T: WorkItem>: Send + Sync + 'static {
    /// Whether the backend can accept work. Nothing is dispatched while false.
    fn is_ready(&self) -> bool {
        true
    }

    /// Process one in-flight item, recording success or failure itself.
    ///
    /// The item leaves the in-flight set once this returns.
    async fn handle(&self, item: T);

    /// Called when [`DispatchHandler::handle`] panicked, before the item
    /// leaves the in-flight set. Must leave the item in a terminal state.
    async fn on_aborted(&self, _item: T) {}

    /// Called once when the last waiting or in-flight item of a state resolves.
    async fn on_drained(&self, _state_id: StateId) {}
}

/// Bounded-concurrency worker pool.
pub struct WorkerPool<T: WorkItem, H: DispatchHandler<T>> {
    queue: Arc<DispatchQueue<T>>,
    handler: Arc<H>,
}

impl<T: WorkItem, H: DispatchHandler<T>> WorkerPool<T, H> {
    pub fn new(queue: Arc<DispatchQueue<T>>, handler: Arc<H>) -> Self {
        Self { queue, handler }
    }

    pub fn queue(&self) -> &Arc<DispatchQueue<T>> {
        &self.queue
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Dispatch as many waiting items as capacity allows. Returns the number dispatched.
    pub fn tick(&self) -> usize {
        if !self.handler.is_ready() {
            if self.queue.waiting_len() > 0 {
                debug!(queue = %self.queue.name(), "Backend not ready, holding queue");
            }
            return 0;
        }

        let items = self.queue.take_ready();
        let dispatched = items.len();

        for item in items {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                Self::run_item(queue, handler, item).await;
            });
        }

        dispatched
    }

    async fn run_item(queue: Arc<DispatchQueue<T>>, handler: Arc<H>, item: T) {
        let state_id = item.state_id().clone();
        let key = item.key().to_string();

        // Run the handler in its own task so a panic still frees the slot.
        let worker = Arc::clone(&handler);
        let attempt = item.clone();
        if let Err(e) = tokio::spawn(async move { worker.handle(attempt).await }).await {
            error!(
                queue = %queue.name(),
                state_id = %state_id,
                key = %key,
                "Dispatch handler aborted: {}", e
            );
            handler.on_aborted(item).await;
        }

        let completion = queue.complete(&state_id, &key);
        if completion.drained {
            debug!(queue = %queue.name(), state_id = %state_id, "State drained");
            handler.on_drained(state_id).await;
        }
    }

    /// Tick on a fixed interval until shutdown is signalled.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue.name(),
            max_concurrent = self.queue.max_concurrent(),
            "Starting worker pool"
        );

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
                    self.tick();
                }
            }
        }

        info!(
            queue = %self.queue.name(),
            in_flight = self.queue.processing_len(),
            "Worker pool stopped"
        );
    }

    /// Keep ticking until the queue holds nothing waiting or in flight.
    pub async fn wait_idle(&self, poll: Duration) {
        while !self.queue.is_idle() {
            self.tick();
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use vsum_models::CaptionQueueItem;

    struct RecordingHandler {
        ready: AtomicBool,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
        drained: Mutex<Vec<StateId>>,
        aborted: Mutex<Vec<String>>,
        panic_on: Option<String>,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                ready: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
                drained: Mutex::new(Vec::new()),
                aborted: Mutex::new(Vec::new()),
                panic_on: None,
            }
        }
    }

    #[async_trait]
    impl DispatchHandler<CaptionQueueItem> for RecordingHandler {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn handle(&self, item: CaptionQueueItem) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
            if self.panic_on.as_deref() == Some(item.window_key.as_str()) {
                panic!("handler failure");
            }
        }

        async fn on_aborted(&self, item: CaptionQueueItem) {
            self.aborted.lock().unwrap().push(item.window_key);
        }

        async fn on_drained(&self, state_id: StateId) {
            self.drained.lock().unwrap().push(state_id);
        }
    }

    fn queue_with(items: &[(&str, u64)], limit: usize) -> Arc<DispatchQueue<CaptionQueueItem>> {
        let queue = Arc::new(DispatchQueue::new("captions", limit));
        for (state, frame) in items {
            queue.push(CaptionQueueItem::new(StateId::from(*state), vec![*frame]));
        }
        queue
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_and_drains_each_state_once() {
        let queue = queue_with(&[("a", 1), ("a", 2), ("b", 1), ("a", 3), ("b", 2)], 2);
        let handler = Arc::new(RecordingHandler::new());
        let pool = WorkerPool::new(queue, Arc::clone(&handler));

        pool.wait_idle(Duration::from_millis(1)).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 5);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);

        let mut drained = handler.drained.lock().unwrap().clone();
        drained.sort();
        assert_eq!(drained, vec![StateId::from("a"), StateId::from("b")]);
    }

    #[tokio::test]
    async fn test_pool_holds_work_while_not_ready() {
        let queue = queue_with(&[("a", 1)], 2);
        let handler = Arc::new(RecordingHandler::new());
        handler.ready.store(false, Ordering::SeqCst);
        let pool = WorkerPool::new(queue, Arc::clone(&handler));

        assert_eq!(pool.tick(), 0);
        assert_eq!(pool.queue().waiting_len(), 1);

        handler.ready.store(true, Ordering::SeqCst);
        assert_eq!(pool.tick(), 1);
        pool.wait_idle(Duration::from_millis(1)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_frees_slot() {
        let queue = queue_with(&[("a", 1), ("a", 2)], 1);
        let mut handler = RecordingHandler::new();
        handler.panic_on = Some("1".to_string());
        let handler = Arc::new(handler);
        let pool = WorkerPool::new(queue, Arc::clone(&handler));

        pool.wait_idle(Duration::from_millis(1)).await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
        assert_eq!(handler.drained.lock().unwrap().len(), 1);
        assert_eq!(*handler.aborted.lock().unwrap(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = queue_with(&[("a", 1)], 1);
        let handler = Arc::new(RecordingHandler::new());
        let pool = Arc::new(WorkerPool::new(queue, Arc::clone(&handler)));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(Duration::from_millis(1), rx).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("pool did not stop")
            .unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }
}
