//! Contract with the vision-capability provider.
//!
//! A provider turns model locations into a detection capability and an
//! embedding capability. The session treats both as opaque and
//! authoritative; everything neural lives behind these traits.

use crate::region::NormalizedRegion;
use crate::types::{Detection, Device, EmbeddingResult, RunningMode};
use async_trait::async_trait;
use image::RgbImage;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("runtime assets unavailable at {location}: {reason}")]
    AssetsUnavailable { location: String, reason: String },
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("operation not supported in {0} mode")]
    WrongMode(RunningMode),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Resolved runtime asset bundle shared by both capabilities of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeAssets {
    pub root: PathBuf,
}

impl RuntimeAssets {
    /// Resolve a model location against the asset root.
    ///
    /// Absolute paths and URIs are returned unchanged.
    pub fn resolve(&self, location: &str) -> PathBuf {
        let path = PathBuf::from(location);
        if path.is_absolute() || location.contains("://") {
            path
        } else {
            self.root.join(path)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptions {
    pub model: String,
    pub device: Device,
    pub mode: RunningMode,
    pub min_detection_confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedderOptions {
    pub model: String,
    pub device: Device,
    pub mode: RunningMode,
}

/// Face detection over still images or stream frames.
#[async_trait]
pub trait FaceDetection: Send + Sync {
    /// Detect faces in a still image.
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, CapabilityError>;

    /// Detect faces in a video frame captured at `timestamp`.
    async fn detect_for_stream(
        &self,
        frame: &RgbImage,
        timestamp: Duration,
    ) -> Result<Vec<Detection>, CapabilityError>;
}

/// Embedding of a face region.
///
/// `rotation` is the detection's angle in degrees, if any.
#[async_trait]
pub trait FaceEmbedding: Send + Sync {
    async fn embed(
        &self,
        image: &RgbImage,
        region: &NormalizedRegion,
        rotation: Option<f32>,
    ) -> Result<EmbeddingResult, CapabilityError>;

    async fn embed_for_stream(
        &self,
        frame: &RgbImage,
        timestamp: Duration,
        region: &NormalizedRegion,
        rotation: Option<f32>,
    ) -> Result<EmbeddingResult, CapabilityError>;
}

/// Factory for the capabilities a session owns.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Acquire the runtime asset bundle at `location`.
    async fn resolve_assets(&self, location: &str) -> Result<RuntimeAssets, CapabilityError>;

    async fn create_detector(
        &self,
        assets: &RuntimeAssets,
        options: &DetectorOptions,
    ) -> Result<Box<dyn FaceDetection>, CapabilityError>;

    async fn create_embedder(
        &self,
        assets: &RuntimeAssets,
        options: &EmbedderOptions,
    ) -> Result<Box<dyn FaceEmbedding>, CapabilityError>;
}
