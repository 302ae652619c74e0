//! Frame and chunk models delivered by the frame producer.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Bounding box of a detection, normalised to the frame size.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// A single object-detection result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Class label, e.g. "person"
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub label_id: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// A detected region within a frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DetectedObject {
    #[serde(default)]
    pub detection: Option<Detection>,
    #[serde(default)]
    pub region_id: Option<u64>,
}

/// Detector metadata attached to a frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FrameMetadata {
    /// Presentation timestamp reported by the detector
    #[serde(default)]
    pub frame_timestamp: Option<f64>,
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_format: Option<String>,
}

impl FrameMetadata {
    /// Non-empty detection labels in detector order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.objects
            .iter()
            .filter_map(|obj| obj.detection.as_ref())
            .map(|d| d.label.as_str())
            .filter(|label| !label.is_empty())
    }
}

/// One frame inside a producer chunk message.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFrame {
    #[serde(deserialize_with = "numeric_id")]
    pub frame_id: u64,
    pub image_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FrameMetadata>,
}

/// Batch of sampled frames delivered by the external detector.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMessage {
    /// State the frames belong to
    pub video_identifier: String,
    #[serde(deserialize_with = "numeric_id")]
    pub chunk_id: u64,
    #[serde(default)]
    pub frames: Vec<ChunkFrame>,
}

/// Frame as recorded in the pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FrameRecord {
    pub frame_id: u64,
    pub chunk_id: u64,
    pub frame_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FrameMetadata>,
    pub created_at: DateTime<Utc>,
}

impl FrameRecord {
    /// Build a record from a producer frame.
    pub fn from_chunk_frame(chunk_id: u64, frame: &ChunkFrame, created_at: DateTime<Utc>) -> Self {
        Self {
            frame_id: frame.frame_id,
            chunk_id,
            frame_uri: frame.image_uri.clone(),
            metadata: frame.metadata.clone(),
            created_at,
        }
    }
}

/// Chunk as recorded in the pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChunkRecord {
    pub chunk_id: u64,
    /// Frames most recently delivered for this chunk
    pub frame_ids: Vec<u64>,
    pub received_at: DateTime<Utc>,
}

/// Accept ids sent either as JSON numbers or numeric strings.
fn numeric_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
