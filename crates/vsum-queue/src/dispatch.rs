//! FIFO dispatch queue with a bounded in-flight set.
//!
//! The queue is shared by every video: `max_concurrent` bounds the number of
//! items in `processing` across all states, not per state. Items are matched
//! on completion by `(state_id, key)`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use vsum_models::{CaptionQueueItem, StateId, SummaryQueueItem};

/// A unit of work that can be dispatched.
pub trait WorkItem: Clone + Send + Sync + 'static {
    /// State the item belongs to.
    fn state_id(&self) -> &StateId;

    /// Key identifying the item within its state.
    fn key(&self) -> &str;
}

impl WorkItem for CaptionQueueItem {
    fn state_id(&self) -> &StateId {
        &self.state_id
    }

    fn key(&self) -> &str {
        &self.window_key
    }
}

impl WorkItem for SummaryQueueItem {
    fn state_id(&self) -> &StateId {
        &self.state_id
    }

    fn key(&self) -> &str {
        self.state_id.as_str()
    }
}

/// Outcome of removing an item from the in-flight set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// An in-flight item matched and was removed
    pub removed: bool,
    /// The removal left the state with nothing waiting or in flight
    pub drained: bool,
}

struct QueueInner<T> {
    waiting: VecDeque<T>,
    processing: Vec<T>,
}

/// Bounded FIFO dispatch queue.
pub struct DispatchQueue<T> {
    name: String,
    max_concurrent: usize,
    inner: Mutex<QueueInner<T>>,
}

impl<T: WorkItem> DispatchQueue<T> {
    /// Create a queue. A limit of zero is raised to one.
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        let name = name.into();
        if max_concurrent == 0 {
            warn!(queue = %name, "max_concurrent of 0 would never dispatch, using 1");
        }
        Self {
            name,
            max_concurrent: max_concurrent.max(1),
            inner: Mutex::new(QueueInner {
                waiting: VecDeque::new(),
                processing: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Append an item to the waiting list. Duplicates are not collapsed.
    pub fn push(&self, item: T) {
        debug!(
            queue = %self.name,
            state_id = %item.state_id(),
            key = %item.key(),
            "Queued item"
        );
        self.lock().waiting.push_back(item);
    }

    /// Append several items under one lock, so no tick sees a partial batch.
    pub fn push_all(&self, items: impl IntoIterator<Item = T>) -> usize {
        let mut inner = self.lock();
        let before = inner.waiting.len();
        inner.waiting.extend(items);
        let added = inner.waiting.len() - before;
        debug!(queue = %self.name, added, "Queued batch");
        added
    }

    /// Move items from the head of `waiting` into `processing` while capacity allows.
    ///
    /// Returned items are now in flight and must each be passed to
    /// [`DispatchQueue::complete`] once resolved.
    pub fn take_ready(&self) -> Vec<T> {
        let mut inner = self.lock();
        let mut ready = Vec::new();

        while inner.processing.len() < self.max_concurrent {
            let Some(item) = inner.waiting.pop_front() else {
                break;
            };
            inner.processing.push(item.clone());
            ready.push(item);
        }

        ready
    }

    /// Remove an in-flight item by `(state_id, key)`.
    ///
    /// `drained` is only reported when an item was actually removed, so a
    /// state sees at most one drain per emptying of its work.
    pub fn complete(&self, state_id: &StateId, key: &str) -> Completion {
        let mut inner = self.lock();

        let position = inner
            .processing
            .iter()
            .position(|item| item.state_id() == state_id && item.key() == key);

        let Some(index) = position else {
            warn!(
                queue = %self.name,
                state_id = %state_id,
                key = %key,
                "Completion for an item that is not in flight"
            );
            return Completion {
                removed: false,
                drained: false,
            };
        };

        inner.processing.remove(index);
        let drained = !Self::pending_locked(&inner, state_id);

        Completion {
            removed: true,
            drained,
        }
    }

    fn pending_locked(inner: &QueueInner<T>, state_id: &StateId) -> bool {
        inner.waiting.iter().any(|item| item.state_id() == state_id)
            || inner.processing.iter().any(|item| item.state_id() == state_id)
    }

    /// Whether a state has items waiting or in flight.
    pub fn has_pending(&self, state_id: &StateId) -> bool {
        Self::pending_locked(&self.lock(), state_id)
    }

    /// Drop a state's waiting items. In-flight items are left to resolve.
    pub fn discard_waiting(&self, state_id: &StateId) -> usize {
        let mut inner = self.lock();
        let before = inner.waiting.len();
        inner.waiting.retain(|item| item.state_id() != state_id);
        before - inner.waiting.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn processing_len(&self) -> usize {
        self.lock().processing.len()
    }

    /// True when nothing is waiting or in flight for any state.
    pub fn is_idle(&self) -> bool {
        let inner = self.lock();
        inner.waiting.is_empty() && inner.processing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(state: &str, frames: Vec<u64>) -> CaptionQueueItem {
        CaptionQueueItem::new(StateId::from(state), frames)
    }

    #[test]
    fn test_take_ready_respects_limit_and_fifo() {
        let queue = DispatchQueue::new("captions", 2);
        queue.push(item("a", vec![1, 2]));
        queue.push(item("b", vec![1, 2]));
        queue.push(item("a", vec![3, 4]));

        let first = queue.take_ready();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].state_id.as_str(), "a");
        assert_eq!(first[1].state_id.as_str(), "b");
        assert_eq!(queue.processing_len(), 2);

        assert!(queue.take_ready().is_empty());

        queue.complete(&StateId::from("b"), "1#2");
        let next = queue.take_ready();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].window_key, "3#4");
    }

    #[test]
    fn test_processing_never_exceeds_limit() {
        let queue = DispatchQueue::new("captions", 3);
        for i in 0..20u64 {
            queue.push(item(if i % 2 == 0 { "a" } else { "b" }, vec![i]));
        }

        let mut in_flight: Vec<CaptionQueueItem> = Vec::new();
        for round in 0..20 {
            in_flight.extend(queue.take_ready());
            assert!(queue.processing_len() <= 3);
            if round % 2 == 0 {
                if let Some(done) = in_flight.pop() {
                    queue.complete(&done.state_id, &done.window_key);
                }
            }
        }
    }

    #[test]
    fn test_completion_matches_state_and_key() {
        let queue = DispatchQueue::new("captions", 4);
        queue.push(item("a", vec![1, 2]));
        queue.push(item("b", vec![1, 2]));
        queue.take_ready();

        let completion = queue.complete(&StateId::from("b"), "1#2");
        assert!(completion.removed);
        assert!(completion.drained);
        assert!(queue.has_pending(&StateId::from("a")));
        assert!(!queue.has_pending(&StateId::from("b")));
    }

    #[test]
    fn test_drain_reported_once() {
        let queue = DispatchQueue::new("captions", 4);
        queue.push(item("a", vec![1]));
        queue.push(item("a", vec![2]));
        queue.take_ready();

        let first = queue.complete(&StateId::from("a"), "1");
        assert!(first.removed);
        assert!(!first.drained);

        let second = queue.complete(&StateId::from("a"), "2");
        assert!(second.drained);

        let stray = queue.complete(&StateId::from("a"), "2");
        assert!(!stray.removed);
        assert!(!stray.drained);
    }

    #[test]
    fn test_waiting_items_block_drain() {
        let queue = DispatchQueue::new("captions", 1);
        queue.push(item("a", vec![1]));
        queue.push(item("a", vec![2]));
        queue.take_ready();

        let completion = queue.complete(&StateId::from("a"), "1");
        assert!(!completion.drained);
        assert_eq!(queue.waiting_len(), 1);
    }

    #[test]
    fn test_duplicate_keys_are_both_dispatched() {
        let queue = DispatchQueue::new("captions", 4);
        queue.push(item("a", vec![1, 2]));
        queue.push(item("a", vec![1, 2]));
        assert_eq!(queue.take_ready().len(), 2);

        assert!(!queue.complete(&StateId::from("a"), "1#2").drained);
        assert!(queue.complete(&StateId::from("a"), "1#2").drained);
    }

    #[test]
    fn test_push_all_keeps_order() {
        let queue = DispatchQueue::new("captions", 2);
        queue.push(item("b", vec![9]));
        let added = queue.push_all(vec![item("a", vec![1]), item("a", vec![2]), item("a", vec![3])]);
        assert_eq!(added, 3);

        let keys: Vec<String> = queue.take_ready().into_iter().map(|i| i.window_key).collect();
        assert_eq!(keys, vec!["9", "1"]);
        assert_eq!(queue.waiting_len(), 2);
    }

    #[test]
    fn test_zero_limit_is_raised() {
        let queue: DispatchQueue<SummaryQueueItem> = DispatchQueue::new("summaries", 0);
        assert_eq!(queue.max_concurrent(), 1);
    }

    #[test]
    fn test_discard_waiting() {
        let queue = DispatchQueue::new("captions", 1);
        queue.push(item("a", vec![1]));
        queue.push(item("a", vec![2]));
        queue.push(item("b", vec![1]));
        queue.take_ready();

        assert_eq!(queue.discard_waiting(&StateId::from("a")), 1);
        assert_eq!(queue.waiting_len(), 1);
        assert!(queue.has_pending(&StateId::from("a")));
    }
}
