use crate::detector::ScrfdDetector;
use crate::embedder::RegionEmbedder;
use async_trait::async_trait;
use facenet_core::{
    CapabilityError, DetectorOptions, EmbedderOptions, FaceDetection, FaceEmbedding,
    RuntimeAssets, VisionProvider,
};
use std::path::PathBuf;

/// Vision-capability provider backed by ONNX Runtime.
///
/// Runtime assets are a local directory holding the model files; relative
/// model locations resolve against it.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxProvider;

impl OnnxProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VisionProvider for OnnxProvider {
    async fn resolve_assets(&self, location: &str) -> Result<RuntimeAssets, CapabilityError> {
        let root = PathBuf::from(location);
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| CapabilityError::AssetsUnavailable {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(CapabilityError::AssetsUnavailable {
                location: location.to_string(),
                reason: "not a directory".into(),
            });
        }
        tracing::debug!(root = %root.display(), "asset directory found");
        Ok(RuntimeAssets { root })
    }

    async fn create_detector(
        &self,
        assets: &RuntimeAssets,
        options: &DetectorOptions,
    ) -> Result<Box<dyn FaceDetection>, CapabilityError> {
        if !(0.0..=1.0).contains(&options.min_detection_confidence) {
            return Err(CapabilityError::InvalidOption(format!(
                "min_detection_confidence must be within [0, 1], got {}",
                options.min_detection_confidence
            )));
        }

        let path = local_model(assets, &options.model)?;
        let (device, mode, confidence) = (options.device, options.mode, options.min_detection_confidence);
        let detector = tokio::task::spawn_blocking(move || ScrfdDetector::load(&path, device, mode, confidence))
            .await
            .map_err(|e| CapabilityError::Backend(format!("detector load task: {e}")))??;
        Ok(Box::new(detector))
    }

    async fn create_embedder(
        &self,
        assets: &RuntimeAssets,
        options: &EmbedderOptions,
    ) -> Result<Box<dyn FaceEmbedding>, CapabilityError> {
        let path = local_model(assets, &options.model)?;
        let (device, mode) = (options.device, options.mode);
        let embedder = tokio::task::spawn_blocking(move || RegionEmbedder::load(&path, device, mode))
            .await
            .map_err(|e| CapabilityError::Backend(format!("embedder load task: {e}")))??;
        Ok(Box::new(embedder))
    }
}

/// Resolve a model location to a local file; remote URIs are not fetched.
fn local_model(assets: &RuntimeAssets, location: &str) -> Result<PathBuf, CapabilityError> {
    if location.contains("://") {
        return Err(CapabilityError::InvalidOption(format!(
            "remote model locations are not supported: {location}"
        )));
    }
    Ok(assets.resolve(location))
}
