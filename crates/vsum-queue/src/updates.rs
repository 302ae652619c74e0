//! Observer update publishing.

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::debug;

use vsum_models::{PipelineUpdate, StateId};

use crate::error::QueueResult;

/// Destination for incremental pipeline updates.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn publish(&self, update: &PipelineUpdate) -> QueueResult<()>;
}

/// Channel for publishing/subscribing to pipeline updates via Redis Pub/Sub.
pub struct UpdateChannel {
    client: redis::Client,
    prefix: String,
}

impl UpdateChannel {
    /// Create a new update channel.
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    /// Get the channel name for a state.
    pub fn channel_name(&self, state_id: &StateId) -> String {
        format!("{}:updates:{}", self.prefix, state_id)
    }

    /// Subscribe to updates for a state.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        state_id: &StateId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = PipelineUpdate> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = self.channel_name(state_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl UpdateSink for UpdateChannel {
    async fn publish(&self, update: &PipelineUpdate) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = self.channel_name(update.state_id());
        let payload = serde_json::to_string(update)?;

        debug!("Publishing {} update to {}", update.update_type().as_str(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }
}

/// In-process update fan-out over a tokio broadcast channel.
///
/// Publishing never fails: with no subscribers the update is dropped.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<PipelineUpdate>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl UpdateSink for BroadcastSink {
    async fn publish(&self, update: &PipelineUpdate) -> QueueResult<()> {
        // Err only means nobody is listening
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}
