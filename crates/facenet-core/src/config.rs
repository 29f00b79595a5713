use crate::types::{Device, RunningMode};
use serde::Deserialize;
use std::path::PathBuf;

/// SCRFD detection model shipped alongside the embedder.
pub const DEFAULT_DETECTION_MODEL: &str = "det_10g.onnx";

/// Default minimum detection confidence.
pub const DEFAULT_MIN_DETECTION_CONFIDENCE: f32 = 0.5;

/// Default runtime asset directory: `$XDG_DATA_HOME/facenet/models`,
/// falling back to `~/.local/share/facenet/models`.
pub fn default_asset_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facenet/models")
}

/// Immutable configuration of one session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub device: Device,
    pub mode: RunningMode,
    /// Minimum detection confidence (0–1).
    pub min_detection_confidence: f32,
    pub detection_model: String,
    /// Embedding model location. `None` disables embedding for the session.
    pub embedding_model: Option<String>,
    /// Runtime asset location override; `None` uses [`default_asset_dir`].
    pub asset_root: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            mode: RunningMode::Image,
            min_detection_confidence: DEFAULT_MIN_DETECTION_CONFIDENCE,
            detection_model: DEFAULT_DETECTION_MODEL.to_string(),
            embedding_model: None,
            asset_root: None,
        }
    }
}

impl SessionConfig {
    /// Still-image session on `device`.
    pub fn image(device: Device) -> Self {
        Self {
            device,
            mode: RunningMode::Image,
            ..Self::default()
        }
    }

    /// Video-stream session on `device`.
    pub fn video(device: Device) -> Self {
        Self {
            device,
            mode: RunningMode::Video,
            ..Self::default()
        }
    }

    pub fn with_min_detection_confidence(mut self, confidence: f32) -> Self {
        self.min_detection_confidence = confidence;
        self
    }

    pub fn with_detection_model(mut self, location: impl Into<String>) -> Self {
        self.detection_model = location.into();
        self
    }

    pub fn with_embedding_model(mut self, location: impl Into<String>) -> Self {
        self.embedding_model = Some(location.into());
        self
    }

    pub fn with_asset_root(mut self, location: impl Into<String>) -> Self {
        self.asset_root = Some(location.into());
        self
    }

    /// The asset location the session will resolve.
    pub fn asset_location(&self) -> String {
        self.asset_root
            .clone()
            .unwrap_or_else(|| default_asset_dir().to_string_lossy().into_owned())
    }

    pub fn embedding_enabled(&self) -> bool {
        self.embedding_model.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.device, Device::Cpu);
        assert_eq!(cfg.mode, RunningMode::Image);
        assert_eq!(cfg.detection_model, DEFAULT_DETECTION_MODEL);
        assert!(!cfg.embedding_enabled());
    }

    #[test]
    fn test_video_builder() {
        let cfg = SessionConfig::video(Device::Gpu)
            .with_min_detection_confidence(0.7)
            .with_embedding_model("facenet.onnx")
            .with_asset_root("/srv/models");
        assert_eq!(cfg.mode, RunningMode::Video);
        assert_eq!(cfg.device, Device::Gpu);
        assert!(cfg.embedding_enabled());
        assert_eq!(cfg.asset_location(), "/srv/models");
        assert!((cfg.min_detection_confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: SessionConfig = serde_json::from_str(
            r#"{ "mode": "video", "embedding_model": "w600k_r50.onnx" }"#,
        )
        .unwrap();
        assert_eq!(cfg.mode, RunningMode::Video);
        assert_eq!(cfg.embedding_model.as_deref(), Some("w600k_r50.onnx"));
        assert_eq!(cfg.detection_model, DEFAULT_DETECTION_MODEL);
    }
}
