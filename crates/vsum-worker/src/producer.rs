//! JSON-lines producer adapter.
//!
//! Reads control and chunk messages, one JSON object per line, and feeds
//! them to a running [`Pipeline`].

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{info, warn};

use vsum_models::{ChunkMessage, ModelInfo, PipelineRequest, StateId};

use crate::command::PipelineCommand;
use crate::error::WorkerResult;
use crate::pipeline::Pipeline;

/// Message accepted on the producer input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProducerMessage {
    /// Register a video and start chunking it
    Start {
        #[serde(default)]
        state_id: Option<StateId>,
        request: PipelineRequest,
        #[serde(default)]
        object_detection: Option<ModelInfo>,
    },

    /// Frames for a started video
    Chunk(ChunkMessage),

    /// The producer delivered every chunk of a video
    ChunkingFinished { state_id: StateId },
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> WorkerResult<Option<ProducerMessage>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

async fn dispatch(pipeline: &Pipeline, message: ProducerMessage) -> WorkerResult<()> {
    match message {
        ProducerMessage::Start {
            state_id,
            request,
            object_detection,
        } => {
            let state_id = pipeline.submit(request, state_id, object_detection).await?;
            info!(state_id = %state_id, "Summarization requested");
            Ok(())
        }
        ProducerMessage::Chunk(chunk) => pipeline.send(PipelineCommand::ChunkReceived(chunk)).await,
        ProducerMessage::ChunkingFinished { state_id } => {
            pipeline
                .send(PipelineCommand::ChunkingFinished { state_id })
                .await
        }
    }
}

/// Feed messages from `reader` into the pipeline until EOF or shutdown.
///
/// Malformed lines and rejected messages are logged and skipped. Returns the
/// number of messages accepted.
pub async fn run_producer<R>(
    reader: R,
    pipeline: &Pipeline,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut accepted = 0usize;
    let mut line_number = 0usize;

    loop {
        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            break;
        };
        line_number += 1;

        let message = match parse_line(&line) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = line_number, "Skipping malformed producer message: {}", e);
                continue;
            }
        };

        match dispatch(pipeline, message).await {
            Ok(()) => accepted += 1,
            Err(e) => warn!(line = line_number, "Producer message rejected: {}", e),
        }
    }

    info!(accepted, lines = line_number, "Producer input finished");
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_with_defaults() {
        let message = parse_line(
            r#"{"type":"start","state_id":"s1","request":{"title":"Gate","video":{"video_id":"v1"},"audio_model":"small"}}"#,
        )
        .unwrap()
        .unwrap();

        match message {
            ProducerMessage::Start {
                state_id, request, ..
            } => {
                assert_eq!(state_id.unwrap().as_str(), "s1");
                assert_eq!(request.sampling.multi_frame, 12);
                assert_eq!(request.audio_model.as_deref(), Some("small"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chunk() {
        let message = parse_line(
            r#"{"type":"chunk","videoIdentifier":"s1","chunkId":2,"frames":[{"frameId":"14","imageUri":"s1/14.jpg"}]}"#,
        )
        .unwrap()
        .unwrap();

        let ProducerMessage::Chunk(chunk) = message else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.chunk_id, 2);
        assert_eq!(chunk.frames[0].frame_id, 14);
    }

    #[test]
    fn test_parse_skips_blank_and_comments() {
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# warmup").unwrap().is_none());
        assert!(parse_line(r#"{"type":"chunking_finished","state_id":"s1"}"#)
            .unwrap()
            .is_some());
        assert!(parse_line(r#"{"type":"rewind"}"#).is_err());
    }
}
