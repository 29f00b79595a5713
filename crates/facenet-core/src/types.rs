use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Compute device hint passed to the capability provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("CPU"),
            Device::Gpu => f.write_str("GPU"),
        }
    }
}

/// Running mode of a session: still images or a stream of video frames.
///
/// Fixed for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMode {
    #[default]
    Image,
    Video,
}

impl RunningMode {
    /// The media kind this mode accepts.
    pub fn media_kind(self) -> MediaKind {
        match self {
            RunningMode::Image => MediaKind::StillImage,
            RunningMode::Video => MediaKind::VideoFrame,
        }
    }
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningMode::Image => f.write_str("IMAGE"),
            RunningMode::Video => f.write_str("VIDEO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    StillImage,
    VideoFrame,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::StillImage => f.write_str("still image"),
            MediaKind::VideoFrame => f.write_str("video frame"),
        }
    }
}

/// Decoded media handed to a session.
#[derive(Debug, Clone, Copy)]
pub enum MediaSource<'a> {
    /// A decoded still image.
    Image(&'a RgbImage),
    /// The current frame of a live video stream.
    Video(&'a RgbImage),
}

impl<'a> MediaSource<'a> {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaSource::Image(_) => MediaKind::StillImage,
            MediaSource::Video(_) => MediaKind::VideoFrame,
        }
    }

    pub fn pixels(&self) -> &'a RgbImage {
        match self {
            MediaSource::Image(img) | MediaSource::Video(img) => img,
        }
    }

    /// Pixel (width, height) of the underlying media.
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels().dimensions()
    }
}

/// Bounding region of a detected face.
///
/// Units are whatever the detector reports: either normalized [0, 1] or
/// absolute pixels. `angle` is a clockwise rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
}

impl BoundingBox {
    pub fn new(origin_x: f32, origin_y: f32, width: f32, height: f32) -> Self {
        Self {
            origin_x,
            origin_y,
            width,
            height,
            angle: None,
        }
    }

    pub fn with_angle(mut self, degrees: f32) -> Self {
        self.angle = Some(degrees);
        self
    }
}

/// A (category, confidence) pair attached to a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub index: i32,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Facial landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

/// One detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Absent when the detector located a face but could not report a region.
    pub bounding_box: Option<BoundingBox>,
    pub categories: Vec<Category>,
    /// Five-point landmarks [left_eye, right_eye, nose, left_mouth, right_mouth] when available.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keypoints: Vec<Keypoint>,
}

impl Detection {
    /// Highest category score, or 0.0 when the detector reported none.
    pub fn confidence(&self) -> f32 {
        self.categories
            .iter()
            .map(|c| c.score)
            .fold(0.0f32, f32::max)
    }
}

/// Face embedding vector produced by one head of the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub head_index: usize,
    /// Model head that produced this embedding (e.g. "facenet").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_name: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            head_index: 0,
            head_name: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// Output of one embedding call: one vector per model head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Embedding>,
    /// Stream timestamp the embedding was computed at (VIDEO mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Duration>,
}

impl EmbeddingResult {
    /// The embedding of the first (usually only) model head.
    pub fn first(&self) -> Option<&Embedding> {
        self.embeddings.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_media_kind() {
        assert_eq!(RunningMode::Image.media_kind(), MediaKind::StillImage);
        assert_eq!(RunningMode::Video.media_kind(), MediaKind::VideoFrame);
    }

    #[test]
    fn test_media_source_dimensions() {
        let img = RgbImage::new(64, 48);
        assert_eq!(MediaSource::Image(&img).dimensions(), (64, 48));
        assert_eq!(MediaSource::Video(&img).kind(), MediaKind::VideoFrame);
    }

    #[test]
    fn test_detection_confidence_picks_max() {
        let det = Detection {
            bounding_box: None,
            categories: vec![
                Category { index: 0, score: 0.4, name: None },
                Category { index: 1, score: 0.9, name: Some("face".into()) },
            ],
            keypoints: vec![],
        };
        assert!((det.confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_detection_confidence_empty() {
        let det = Detection { bounding_box: None, categories: vec![], keypoints: vec![] };
        assert_eq!(det.confidence(), 0.0);
    }

    #[test]
    fn test_mode_deserializes_lowercase() {
        let mode: RunningMode = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(mode, RunningMode::Video);
        let device: Device = serde_json::from_str("\"gpu\"").unwrap();
        assert_eq!(device, Device::Gpu);
    }
}
