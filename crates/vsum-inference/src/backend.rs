//! Backend traits consumed by the pipeline.

use async_trait::async_trait;
use futures::stream::BoxStream;

use vsum_models::{ModelInfo, TranscriptionRequest, TranscriptionResponse, VideoRef};

use crate::error::InferenceResult;

/// Stream of generated text fragments.
pub type TokenStream = BoxStream<'static, InferenceResult<String>>;

/// Image/video-to-text captioning backend.
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    /// Whether model discovery succeeded and requests may be sent.
    fn is_ready(&self) -> bool;

    /// Model and device in use, once known.
    fn model_info(&self) -> Option<ModelInfo>;

    /// Caption an ordered list of frame URLs under a prompt.
    async fn caption(&self, prompt: &str, image_urls: &[String]) -> InferenceResult<String>;
}

/// Text completion backend used by the summarizer.
#[async_trait]
pub trait TextBackend: Send + Sync {
    fn is_ready(&self) -> bool;

    fn model_info(&self) -> Option<ModelInfo>;

    /// Complete a prompt and return the whole response.
    async fn complete(&self, prompt: &str) -> InferenceResult<String>;

    /// Complete a prompt, yielding text as it is generated.
    async fn stream(&self, prompt: &str) -> InferenceResult<TokenStream>;
}

/// Audio transcription backend.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Build the request for a video with the backend's device and bucket.
    fn request_for(&self, video: &VideoRef, model: &str) -> TranscriptionRequest;

    /// Ask the service to transcribe a video.
    async fn transcribe(&self, request: &TranscriptionRequest) -> InferenceResult<TranscriptionResponse>;

    /// Download the subtitle file produced for a video.
    async fn fetch_transcript(&self, video_id: &str, transcript_path: &str) -> InferenceResult<String>;
}
