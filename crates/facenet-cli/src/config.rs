use anyhow::{Context, Result};
use facenet_core::{
    default_asset_dir, Device, SessionConfig, DEFAULT_DETECTION_MODEL, DEFAULT_MATCH_THRESHOLD,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Embedding model looked up in the asset directory when none is configured.
const DEFAULT_EMBEDDING_MODEL: &str = "w600k_r50.onnx";

/// CLI configuration: optional TOML file, then `FACENET_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub device: Device,
    /// Minimum detection confidence (0–1).
    pub min_confidence: f32,
    pub detection_model: String,
    pub embedding_model: String,
    /// Cosine similarity above which two faces match.
    pub match_threshold: f32,
    /// Pacing interval between streamed frames, in milliseconds.
    pub frame_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_asset_dir(),
            device: Device::Cpu,
            min_confidence: 0.5,
            detection_model: DEFAULT_DETECTION_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            frame_interval_ms: 33,
        }
    }
}

impl Config {
    /// Load from `path` (if given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(base.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `FACENET_*` overrides read through `var`.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = var("FACENET_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(device) = var("FACENET_DEVICE") {
            match device.to_ascii_lowercase().as_str() {
                "gpu" => self.device = Device::Gpu,
                "cpu" => self.device = Device::Cpu,
                other => tracing::warn!(value = other, "ignoring unknown FACENET_DEVICE"),
            }
        }
        if let Some(model) = var("FACENET_DETECTION_MODEL") {
            self.detection_model = model;
        }
        if let Some(model) = var("FACENET_EMBEDDING_MODEL") {
            self.embedding_model = model;
        }
        self.min_confidence = parse_or(&var, "FACENET_MIN_CONFIDENCE", self.min_confidence);
        self.match_threshold = parse_or(&var, "FACENET_MATCH_THRESHOLD", self.match_threshold);
        self.frame_interval_ms = parse_or(&var, "FACENET_FRAME_INTERVAL_MS", self.frame_interval_ms);
        self
    }

    /// Session config for still images; `embed` controls whether the embedder is loaded.
    pub fn image_session(&self, embed: bool) -> SessionConfig {
        self.session(SessionConfig::image(self.device), embed)
    }

    /// Session config for the frame stream.
    pub fn video_session(&self) -> SessionConfig {
        self.session(SessionConfig::video(self.device), true)
    }

    fn session(&self, base: SessionConfig, embed: bool) -> SessionConfig {
        let cfg = base
            .with_min_detection_confidence(self.min_confidence)
            .with_detection_model(self.detection_model.clone())
            .with_asset_root(self.model_dir.to_string_lossy().into_owned());
        if embed {
            cfg.with_embedding_model(self.embedding_model.clone())
        } else {
            cfg
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
