//! Backend client configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use vsum_models::AudioDevice;

fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Sampling defaults sent with every chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    /// Mirrors `max_completion_tokens` for servers that only read the older field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for CompletionDefaults {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            seed: Some(42),
            max_completion_tokens: None,
            max_tokens: None,
        }
    }
}

impl CompletionDefaults {
    fn from_env(prefix: &str) -> Self {
        let max_completion_tokens = env_var(&format!("{prefix}_MAX_COMPLETION_TOKENS"));
        Self {
            temperature: env_var(&format!("{prefix}_TEMPERATURE")),
            top_p: env_var(&format!("{prefix}_TOP_P")),
            presence_penalty: env_var(&format!("{prefix}_PRESENCE_PENALTY")),
            frequency_penalty: env_var(&format!("{prefix}_FREQUENCY_PENALTY")),
            seed: env_var(&format!("{prefix}_SEED")).or(Some(42)),
            max_completion_tokens,
            max_tokens: max_completion_tokens,
        }
    }
}

/// Configuration for an OpenAI-compatible inference endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Name used in logs, e.g. "captioning"
    pub name: String,
    /// Base URL of the API, e.g. `http://vlm:8000`
    pub api_base: String,
    pub api_key: Option<String>,
    /// Path of the model listing endpoint relative to `api_base`
    pub models_path: String,
    /// Model to use; the first discovered model when unset
    pub model: Option<String>,
    /// Device label recorded in the state's inference config
    pub device: String,
    /// Request timeout
    pub timeout: Duration,
    pub defaults: CompletionDefaults,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            name: "inference".to_string(),
            api_base: "http://localhost:8000".to_string(),
            api_key: None,
            models_path: "v1/models".to_string(),
            model: None,
            device: "CPU".to_string(),
            timeout: Duration::from_secs(600),
            defaults: CompletionDefaults::default(),
        }
    }
}

impl OpenAiConfig {
    /// Create config from `{prefix}_*` environment variables.
    ///
    /// Reads `{prefix}_API`, `{prefix}_KEY`, `{prefix}_MODEL_API`,
    /// `{prefix}_MODEL`, `{prefix}_DEVICE`, `{prefix}_TIMEOUT` and the
    /// sampling defaults.
    pub fn from_env(name: &str, prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            api_base: std::env::var(format!("{prefix}_API"))
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            api_key: std::env::var(format!("{prefix}_KEY")).ok().filter(|s| !s.is_empty()),
            models_path: std::env::var(format!("{prefix}_MODEL_API"))
                .unwrap_or_else(|_| "v1/models".to_string()),
            model: std::env::var(format!("{prefix}_MODEL")).ok().filter(|s| !s.is_empty()),
            device: std::env::var(format!("{prefix}_DEVICE")).unwrap_or_else(|_| "CPU".to_string()),
            timeout: Duration::from_secs(env_var(&format!("{prefix}_TIMEOUT")).unwrap_or(600)),
            defaults: CompletionDefaults::from_env(prefix),
        }
    }

    /// Captioning (vision-language) endpoint from `VLM_CAPTIONING_*`.
    pub fn captioning_from_env() -> Self {
        Self::from_env("captioning", "VLM_CAPTIONING")
    }

    /// Summarization (text) endpoint from `LLM_SUMMARIZATION_*`.
    pub fn summarization_from_env() -> Self {
        Self::from_env("summarization", "LLM_SUMMARIZATION")
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Configuration for the audio transcription service.
#[derive(Debug, Clone)]
pub struct AudioClientConfig {
    /// Base URL of the transcription service
    pub host: String,
    pub api_version: String,
    /// Base URL transcripts are downloaded from; `{base}/{video_id}/{file}`
    pub transcript_base_url: String,
    pub device: AudioDevice,
    /// Bucket the service reads videos from
    pub bucket: String,
    pub timeout: Duration,
}

impl Default for AudioClientConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8999".to_string(),
            api_version: "api/v1".to_string(),
            transcript_base_url: "http://localhost:9009/video-summary".to_string(),
            device: AudioDevice::Cpu,
            bucket: "video-summary".to_string(),
            timeout: Duration::from_secs(1800),
        }
    }
}

impl AudioClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("AUDIO_HOST").unwrap_or_else(|_| "http://localhost:8999".to_string()),
            api_version: std::env::var("AUDIO_API_VERSION").unwrap_or_else(|_| "api/v1".to_string()),
            transcript_base_url: std::env::var("AUDIO_TRANSCRIPT_URL")
                .unwrap_or_else(|_| "http://localhost:9009/video-summary".to_string()),
            device: std::env::var("AUDIO_DEVICE")
                .ok()
                .and_then(|s| AudioDevice::parse(&s))
                .unwrap_or_default(),
            bucket: std::env::var("DATASTORE_BUCKET").unwrap_or_else(|_| "video-summary".to_string()),
            timeout: Duration::from_secs(env_var("AUDIO_TIMEOUT").unwrap_or(1800)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OpenAiConfig::default();
        assert_eq!(config.models_path, "v1/models");
        assert_eq!(config.defaults.seed, Some(42));
        assert!(config.model.is_none());
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = OpenAiConfig {
            api_base: "http://vlm:8000/".into(),
            ..Default::default()
        };
        assert_eq!(config.url("/v1/models"), "http://vlm:8000/v1/models");
        assert_eq!(config.url("v1/chat/completions"), "http://vlm:8000/v1/chat/completions");
    }

    #[test]
    fn test_defaults_skip_unset_fields() {
        let value = serde_json::to_value(CompletionDefaults::default()).unwrap();
        assert_eq!(value, serde_json::json!({ "seed": 42 }));
    }
}
