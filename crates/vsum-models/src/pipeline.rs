//! Pipeline request configuration: sampling, prompts and model records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Frame sampling and windowing parameters for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct SamplingParams {
    /// Frames per caption window
    #[validate(range(min = 1))]
    pub multi_frame: u32,
    /// Frames shared by consecutive windows
    #[serde(default)]
    pub frame_overlap: u32,
    /// Frames sampled per video chunk; bounds the first window
    #[validate(range(min = 1))]
    pub sampling_frame: u32,
    /// Duration of one video chunk in seconds
    #[validate(range(min = 0.0))]
    pub chunk_duration: f64,
}

impl SamplingParams {
    /// Window advance per step. Non-positive when overlap >= window size.
    pub fn stride(&self) -> i64 {
        i64::from(self.multi_frame) - i64::from(self.frame_overlap)
    }

    /// Estimated position in seconds of a frame id within the video.
    ///
    /// Proportional to the frame id alone; no per-chunk offset is added.
    pub fn frame_seconds(&self, frame_id: u64) -> f64 {
        if self.sampling_frame == 0 {
            return 0.0;
        }
        self.chunk_duration * frame_id as f64 / f64::from(self.sampling_frame)
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            multi_frame: 12,
            frame_overlap: 0,
            sampling_frame: 8,
            chunk_duration: 30.0,
        }
    }
}

/// Prompts used by the captioning and summarization stages.
///
/// Summary templates substitute `%data%` with the texts being summarized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct PromptConfig {
    #[validate(length(min = 1))]
    pub frame_prompt: String,
    #[validate(length(min = 1))]
    pub summary_map_prompt: String,
    #[validate(length(min = 1))]
    pub summary_reduce_prompt: String,
    #[validate(length(min = 1))]
    pub summary_single_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            frame_prompt: "Describe what happens across these video frames. Mention the people, \
                           objects and actions you can see, in the order they appear."
                .to_string(),
            summary_map_prompt: "Below are captions of consecutive clips from one video. Combine them \
                                 into a single chronological summary that keeps track of the people, \
                                 objects and events involved:\n\n%data%\n"
                .to_string(),
            summary_reduce_prompt: "Below are partial summaries of consecutive parts of one video. Merge \
                                    them into one coherent chronological summary without dropping any \
                                    event:\n\n%data%\n"
                .to_string(),
            summary_single_prompt: "Shorten the following description while keeping the key people, \
                                    objects and actions:\n\n%data%\n"
                .to_string(),
        }
    }
}

/// Model identity recorded for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModelInfo {
    pub model: String,
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
}

/// Models used by each inference stage of a state, recorded once per stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct InferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_detection: Option<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_inference: Option<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_inference: Option<ModelInfo>,
}

/// Reference to the video being summarized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct VideoRef {
    #[validate(length(min = 1))]
    pub video_id: String,
    /// Object name in the video store
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Request to start summarizing a video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct PipelineRequest {
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[validate(nested)]
    pub video: VideoRef,
    #[validate(nested)]
    #[serde(default)]
    pub sampling: SamplingParams,
    #[validate(nested)]
    #[serde(default)]
    pub prompts: PromptConfig,
    /// Transcription model; audio is skipped when absent
    #[serde(default)]
    pub audio_model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride() {
        let mut sampling = SamplingParams {
            multi_frame: 3,
            frame_overlap: 1,
            ..Default::default()
        };
        assert_eq!(sampling.stride(), 2);
        sampling.frame_overlap = 3;
        assert_eq!(sampling.stride(), 0);
        sampling.frame_overlap = 5;
        assert_eq!(sampling.stride(), -2);
    }

    #[test]
    fn test_frame_seconds() {
        let sampling = SamplingParams {
            multi_frame: 4,
            frame_overlap: 0,
            sampling_frame: 10,
            chunk_duration: 20.0,
        };
        assert_eq!(sampling.frame_seconds(0), 0.0);
        assert_eq!(sampling.frame_seconds(10), 20.0);
        assert_eq!(sampling.frame_seconds(15), 30.0);
    }

    #[test]
    fn test_default_prompts_have_placeholder() {
        let prompts = PromptConfig::default();
        assert!(prompts.summary_map_prompt.contains("%data%"));
        assert!(prompts.summary_reduce_prompt.contains("%data%"));
        assert!(prompts.summary_single_prompt.contains("%data%"));
    }

    #[test]
    fn test_request_validation() {
        let mut request = PipelineRequest {
            title: "Parking lot".into(),
            video: VideoRef {
                video_id: "v1".into(),
                object_name: None,
                file_name: None,
            },
            sampling: SamplingParams::default(),
            prompts: PromptConfig::default(),
            audio_model: None,
        };
        assert!(request.validate().is_ok());

        request.sampling.sampling_frame = 0;
        assert!(request.validate().is_err());
    }
}
