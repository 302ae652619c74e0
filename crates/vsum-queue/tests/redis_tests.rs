//! Redis sink integration tests.

use std::time::Duration;

use futures_util::StreamExt;
use vsum_models::{PipelineRequest, PipelineState, PipelineUpdate, PromptConfig, SamplingParams, StateId, VideoRef};
use vsum_queue::{CheckpointStore, QueueConfig, RedisCheckpointStore, UpdateChannel, UpdateSink};

fn redis_url() -> String {
    dotenvy::dotenv().ok();
    QueueConfig::from_env()
        .redis_url
        .unwrap_or_else(|| "redis://localhost:6379".to_string())
}

/// Test that a published update reaches a subscriber.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_update_publish_subscribe() {
    let channel = UpdateChannel::new(&redis_url(), "vsum-test").expect("Failed to create channel");
    let state_id = StateId::new();

    let mut stream = channel.subscribe(&state_id).await.expect("Failed to subscribe");

    channel
        .publish(&PipelineUpdate::SummaryChunk {
            state_id: state_id.clone(),
            chunk: "A truck arrives".into(),
        })
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("Timed out waiting for update")
        .expect("Stream ended");

    assert_eq!(received.state_id(), &state_id);
}

/// Test checkpoint write and read back.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_checkpoint_roundtrip() {
    let store = RedisCheckpointStore::new(&redis_url(), "vsum-test", Duration::from_secs(60))
        .expect("Failed to create store");
    let state_id = StateId::new();

    let mut state = PipelineState::new(
        state_id.clone(),
        PipelineRequest {
            title: "Redis checkpoint".into(),
            video: VideoRef {
                video_id: "video-1".into(),
                object_name: None,
                file_name: None,
            },
            sampling: SamplingParams::default(),
            prompts: PromptConfig::default(),
            audio_model: None,
        },
    );
    state.summary = "Final summary".into();

    store.upsert(&state_id, &state).await.expect("Failed to checkpoint");
    let loaded = store
        .load(&state_id)
        .await
        .expect("Failed to load")
        .expect("Checkpoint missing");

    assert_eq!(loaded.summary, "Final summary");
}
