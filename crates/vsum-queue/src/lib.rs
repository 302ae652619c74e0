//! Bounded dispatch queues, update publishing and state checkpoints.
//!
//! This crate provides:
//! - A FIFO dispatch queue with a bounded in-flight set
//! - A tick-driven worker pool generic over work item and handler
//! - Observer update sinks (Redis Pub/Sub, in-process broadcast)
//! - Checkpoint sinks for pipeline state snapshots (Redis, JSON files, memory)

pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod updates;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RedisCheckpointStore};
pub use config::QueueConfig;
pub use dispatch::{Completion, DispatchQueue, WorkItem};
pub use error::{QueueError, QueueResult};
pub use pool::{DispatchHandler, WorkerPool};
pub use updates::{BroadcastSink, UpdateChannel, UpdateSink};
