//! Audio transcription service client.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use vsum_models::{TranscriptionRequest, TranscriptionResponse, VideoRef};

use crate::backend::TranscriptionBackend;
use crate::config::AudioClientConfig;
use crate::error::{InferenceError, InferenceResult};

/// HTTP client for the transcription service.
pub struct TranscriptionClient {
    http: Client,
    config: AudioClientConfig,
}

impl TranscriptionClient {
    pub fn new(config: AudioClientConfig) -> InferenceResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(InferenceError::Network)?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> InferenceResult<Self> {
        Self::new(AudioClientConfig::from_env())
    }

    pub fn config(&self) -> &AudioClientConfig {
        &self.config
    }

    fn transcriptions_url(&self) -> String {
        format!(
            "{}/{}/transcriptions",
            self.config.host.trim_end_matches('/'),
            self.config.api_version.trim_matches('/')
        )
    }

    /// URL of a transcript file: `{base}/{video_id}/{file name of transcript_path}`.
    pub fn transcript_url(&self, video_id: &str, transcript_path: &str) -> String {
        let file_name = transcript_path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(transcript_path);
        format!(
            "{}/{}/{}",
            self.config.transcript_base_url.trim_end_matches('/'),
            video_id,
            file_name
        )
    }
}

#[async_trait]
impl TranscriptionBackend for TranscriptionClient {
    /// Build a transcription request for a video with the configured device and bucket.
    ///
    /// The object name falls back to the video id, the display name to the object name.
    fn request_for(&self, video: &VideoRef, model: &str) -> TranscriptionRequest {
        let object = video.object_name.clone().unwrap_or_else(|| video.video_id.clone());
        TranscriptionRequest {
            device: self.config.device,
            model_name: model.to_string(),
            include_timestamps: true,
            bucket: self.config.bucket.clone(),
            video_name: video.file_name.clone().unwrap_or_else(|| object.clone()),
            video_id: object,
        }
    }

    async fn transcribe(&self, request: &TranscriptionRequest) -> InferenceResult<TranscriptionResponse> {
        let url = self.transcriptions_url();
        info!(
            video_id = %request.video_id,
            model = %request.model_name,
            device = %request.device,
            "Requesting audio transcription"
        );

        let response = self
            .http
            .post(&url)
            .form(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.config.timeout.as_secs())
                } else {
                    InferenceError::ServiceUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::request_failed(format!(
                "transcription returned {}: {}",
                status, body
            )));
        }

        let result: TranscriptionResponse = response.json().await?;
        if result.transcript_path.trim().is_empty() {
            return Err(InferenceError::invalid_response("transcription response has no transcript path"));
        }

        debug!(job_id = %result.job_id, "Transcription finished: {}", result.transcript_path);
        Ok(result)
    }

    async fn fetch_transcript(&self, video_id: &str, transcript_path: &str) -> InferenceResult<String> {
        let url = self.transcript_url(video_id, transcript_path);
        debug!("Fetching transcript from {}", url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::request_failed(format!(
                "transcript download returned {}",
                status
            )));
        }

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsum_models::AudioDevice;

    fn client() -> TranscriptionClient {
        TranscriptionClient::new(AudioClientConfig {
            host: "http://audio:8999/".into(),
            transcript_base_url: "http://store:9009/bucket/".into(),
            device: AudioDevice::Gpu,
            bucket: "videos".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(client.transcriptions_url(), "http://audio:8999/api/v1/transcriptions");
        assert_eq!(
            client.transcript_url("vid", "/data/out/vid/clip.srt"),
            "http://store:9009/bucket/vid/clip.srt"
        );
        assert_eq!(client.transcript_url("vid", "clip.srt"), "http://store:9009/bucket/vid/clip.srt");
    }

    #[test]
    fn test_request_for_falls_back_to_video_id() {
        let video = VideoRef {
            video_id: "vid-1".into(),
            object_name: None,
            file_name: None,
        };
        let request = client().request_for(&video, "small.en");
        assert_eq!(request.video_id, "vid-1");
        assert_eq!(request.video_name, "vid-1");
        assert_eq!(request.bucket, "videos");
        assert_eq!(request.device, AudioDevice::Gpu);
        assert!(request.include_timestamps);
    }
}
