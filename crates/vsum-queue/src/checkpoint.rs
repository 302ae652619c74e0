//! Pipeline state checkpoints.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use vsum_models::{PipelineState, StateId};

use crate::error::{QueueError, QueueResult};

/// Persistence sink for state snapshots.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace the snapshot for a state.
    async fn upsert(&self, state_id: &StateId, snapshot: &PipelineState) -> QueueResult<()>;

    /// Load the latest snapshot for a state.
    async fn load(&self, state_id: &StateId) -> QueueResult<Option<PipelineState>>;
}

/// Checkpoints stored as JSON strings in Redis.
pub struct RedisCheckpointStore {
    client: redis::Client,
    prefix: String,
    ttl: Duration,
}

impl RedisCheckpointStore {
    /// Create a store. A zero `ttl` keeps checkpoints without expiry.
    pub fn new(redis_url: &str, prefix: impl Into<String>, ttl: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            ttl,
        })
    }

    pub fn key(&self, state_id: &StateId) -> String {
        format!("{}:state:{}", self.prefix, state_id)
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn upsert(&self, state_id: &StateId, snapshot: &PipelineState) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(state_id);
        let payload = serde_json::to_string(snapshot)?;

        if self.ttl.is_zero() {
            conn.set::<_, _, ()>(&key, payload).await?;
        } else {
            conn.set_ex::<_, _, ()>(&key, payload, self.ttl.as_secs().max(1)).await?;
        }

        debug!(state_id = %state_id, "Checkpointed state to {}", key);
        Ok(())
    }

    async fn load(&self, state_id: &StateId) -> QueueResult<Option<PipelineState>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(self.key(state_id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(QueueError::from))
            .transpose()
    }
}

/// Checkpoints written as one JSON file per state.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, state_id: &StateId) -> QueueResult<PathBuf> {
        let id = state_id.as_str();
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(QueueError::checkpoint_failed(format!(
                "state id '{}' is not usable as a file name",
                id
            )));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn upsert(&self, state_id: &StateId, snapshot: &PipelineState) -> QueueResult<()> {
        let path = self.path_for(state_id)?;
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(snapshot)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(state_id = %state_id, "Checkpointed state to {}", path.display());
        Ok(())
    }

    async fn load(&self, state_id: &StateId) -> QueueResult<Option<PipelineState>> {
        let path = self.path_for(state_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory checkpoints, mainly for tests and dry runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    snapshots: Mutex<HashMap<StateId, PipelineState>>,
    writes: Mutex<Vec<StateId>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// State ids in the order checkpoints were written.
    pub fn writes(&self) -> Vec<StateId> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn upsert(&self, state_id: &StateId, snapshot: &PipelineState) -> QueueResult<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(state_id.clone(), snapshot.clone());
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(state_id.clone());
        Ok(())
    }

    async fn load(&self, state_id: &StateId) -> QueueResult<Option<PipelineState>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(state_id)
            .cloned())
    }
}
