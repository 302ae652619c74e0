//! Audio transcription models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::status::ActionStatus;

/// Device the transcription model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioDevice {
    #[default]
    Cpu,
    Gpu,
    Auto,
}

impl AudioDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioDevice::Cpu => "cpu",
            AudioDevice::Gpu => "gpu",
            AudioDevice::Auto => "auto",
        }
    }

    /// Parse a device name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Some(AudioDevice::Cpu),
            "gpu" => Some(AudioDevice::Gpu),
            "auto" => Some(AudioDevice::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One time-coded line of a subtitle transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptLine {
    /// Cue identifier as written in the subtitle file
    pub id: String,
    /// Start timestamp as written, e.g. `00:00:01,500`
    pub start_time: String,
    pub end_time: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

impl TranscriptLine {
    /// Render the cue back in subtitle layout: id, time range, text.
    pub fn render(&self) -> String {
        format!("{}\n{} --> {}\n{}", self.id, self.start_time, self.end_time, self.text)
    }

    /// Whether this cue's time range intersects `[start, end]` (seconds).
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start_seconds <= end && self.end_seconds >= start
    }
}

/// Render a set of cues separated by blank lines.
pub fn render_transcript<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a TranscriptLine>,
{
    lines
        .into_iter()
        .map(TranscriptLine::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Audio stage block of a pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioBlock {
    pub device: AudioDevice,
    pub model: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptLine>,
}

impl AudioBlock {
    /// Block for a transcription request that has just been sent.
    pub fn in_progress(device: AudioDevice, model: impl Into<String>) -> Self {
        Self {
            device,
            model: model.into(),
            status: ActionStatus::InProgress,
            transcript_path: None,
            transcript: Vec::new(),
        }
    }

    /// Transcript lines, only when the stage completed with content.
    pub fn usable_transcript(&self) -> Option<&[TranscriptLine]> {
        (self.status == ActionStatus::Complete && !self.transcript.is_empty())
            .then_some(self.transcript.as_slice())
    }
}

/// Request body for the transcription service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptionRequest {
    pub device: AudioDevice,
    pub model_name: String,
    pub include_timestamps: bool,
    /// Object-store bucket holding the video
    #[serde(rename = "minio_bucket")]
    pub bucket: String,
    /// Object name of the video inside the bucket
    pub video_id: String,
    pub video_name: String,
}

/// Response body from the transcription service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub message: String,
    pub status: String,
    pub transcript_path: String,
    #[serde(default)]
    pub video_duration: f64,
    #[serde(default)]
    pub video_name: String,
}
