//! HTTP client tests against a mock inference server.

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vsum_inference::{
    parse_srt, AudioClientConfig, CaptionBackend, InferenceError, OpenAiClient, OpenAiConfig,
    TextBackend, TranscriptionBackend, TranscriptionClient,
};
use vsum_models::{AudioDevice, VideoRef};

fn openai_config(server: &MockServer, model: Option<&str>) -> OpenAiConfig {
    OpenAiConfig {
        name: "test".into(),
        api_base: server.uri(),
        api_key: Some("secret".into()),
        model: model.map(str::to_string),
        ..Default::default()
    }
}

async fn mount_models(server: &MockServer, ids: &[&str]) {
    let data: Vec<_> = ids.iter().map(|id| json!({ "id": id })).collect();
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
        .mount(server)
        .await;
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

/// Discovery picks the configured model when listed, otherwise the first.
#[tokio::test]
async fn test_model_discovery() {
    let server = MockServer::start().await;
    mount_models(&server, &["first-model", "wanted-model"]).await;

    let client = OpenAiClient::new(openai_config(&server, Some("wanted-model"))).unwrap();
    assert!(!CaptionBackend::is_ready(&client));
    assert_eq!(client.discover_model().await.unwrap(), "wanted-model");
    assert!(CaptionBackend::is_ready(&client));

    let fallback = OpenAiClient::new(openai_config(&server, Some("missing"))).unwrap();
    assert_eq!(fallback.discover_model().await.unwrap(), "first-model");

    let info = CaptionBackend::model_info(&fallback).unwrap();
    assert_eq!(info.model, "first-model");
    assert_eq!(info.device, "CPU");
}

/// A failed discovery leaves the backend not ready and requests are refused.
#[tokio::test]
async fn test_discovery_failure_marks_not_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = OpenAiClient::new(openai_config(&server, None)).unwrap();
    let err = client.discover_model().await.unwrap_err();
    assert!(matches!(err, InferenceError::ServiceUnavailable(_)));
    assert!(!TextBackend::is_ready(&client));

    let err = client.complete("hello").await.unwrap_err();
    assert!(matches!(err, InferenceError::NotReady(_)));
}

/// A single frame is sent as an image, several frames as a video.
#[tokio::test]
async fn test_caption_payloads() {
    let server = MockServer::start().await;
    mount_models(&server, &["vlm"]).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "model": "vlm",
            "stream": false,
            "seed": 42,
            "messages": [{ "role": "user", "content": [
                { "type": "text", "text": "Describe." },
                { "type": "image_url", "image_url": { "url": "http://frames/1.jpg" } }
            ]}]
        })))
        .respond_with(completion("one frame"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("\"video\":[\"http://frames/1.jpg\",\"http://frames/2.jpg\"]"))
        .respond_with(completion("two frames"))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new(openai_config(&server, None)).unwrap();
    client.discover_model().await.unwrap();

    let single = client
        .caption("Describe.", &["http://frames/1.jpg".to_string()])
        .await
        .unwrap();
    assert_eq!(single, "one frame");

    let multi = client
        .caption(
            "Describe.",
            &["http://frames/1.jpg".to_string(), "http://frames/2.jpg".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(multi, "two frames");
}

/// A completion without content is an invalid response.
#[tokio::test]
async fn test_empty_caption_is_error() {
    let server = MockServer::start().await;
    mount_models(&server, &["vlm"]).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }]
        })))
        .mount(&server)
        .await;

    let client = OpenAiClient::new(openai_config(&server, None)).unwrap();
    client.discover_model().await.unwrap();

    let err = client.caption("Describe.", &["a.jpg".to_string()]).await.unwrap_err();
    assert!(matches!(err, InferenceError::InvalidResponse(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let server = MockServer::start().await;
    mount_models(&server, &["llm"]).await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = OpenAiClient::new(openai_config(&server, None)).unwrap();
    client.discover_model().await.unwrap();

    let err = client.complete("hi").await.unwrap_err();
    assert!(matches!(err, InferenceError::ServiceUnavailable(_)));
}

/// Streaming completions are decoded from server-sent events.
#[tokio::test]
async fn test_streaming_completion() {
    let server = MockServer::start().await;
    mount_models(&server, &["llm"]).await;

    let body = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"The video "}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"shows a car."}}]}"#,
        "data: [DONE]",
    ]
    .join("\n\n");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = OpenAiClient::new(openai_config(&server, None)).unwrap();
    client.discover_model().await.unwrap();

    let tokens: Vec<String> = client
        .stream("Summarize.")
        .await
        .unwrap()
        .map(|t| t.unwrap())
        .collect()
        .await;
    assert_eq!(tokens, vec!["The video ", "shows a car."]);
}

/// Transcription request is form encoded; the transcript is fetched by file name.
#[tokio::test]
async fn test_transcription_roundtrip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/transcriptions"))
        .and(body_string_contains("minio_bucket=videos"))
        .and(body_string_contains("model_name=small.en"))
        .and(body_string_contains("device=gpu"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "job-1",
            "message": "done",
            "status": "completed",
            "transcript_path": "/outputs/vid-1/clip.srt",
            "video_duration": 12.5,
            "video_name": "clip.mp4"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/store/vid-1/clip.srt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("1\n00:00:00,000 --> 00:00:02,000\nHello there.\n"),
        )
        .mount(&server)
        .await;

    let client = TranscriptionClient::new(AudioClientConfig {
        host: server.uri(),
        transcript_base_url: format!("{}/store", server.uri()),
        device: AudioDevice::Gpu,
        bucket: "videos".into(),
        ..Default::default()
    })
    .unwrap();

    let video = VideoRef {
        video_id: "vid-1".into(),
        object_name: None,
        file_name: Some("clip.mp4".into()),
    };
    let request = client.request_for(&video, "small.en");
    let response = client.transcribe(&request).await.unwrap();
    assert_eq!(response.transcript_path, "/outputs/vid-1/clip.srt");

    let srt = client
        .fetch_transcript(&video.video_id, &response.transcript_path)
        .await
        .unwrap();
    let lines = parse_srt(&srt).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].text, "Hello there.");
}

#[tokio::test]
async fn test_transcription_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/transcriptions"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad model"))
        .mount(&server)
        .await;

    let client = TranscriptionClient::new(AudioClientConfig {
        host: server.uri(),
        ..Default::default()
    })
    .unwrap();

    let video = VideoRef {
        video_id: "vid-1".into(),
        object_name: None,
        file_name: None,
    };
    let err = client
        .transcribe(&client.request_for(&video, "nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::RequestFailed(_)));
}
