//! Face embedder via ONNX Runtime.
//!
//! Crops the requested region into a square patch and runs a FaceNet/ArcFace
//! style recognition model over it, returning an L2-normalized vector.

use crate::crop;
use crate::intra_threads;
use async_trait::async_trait;
use facenet_core::{
    CapabilityError, Device, Embedding, EmbeddingResult, FaceEmbedding, NormalizedRegion,
    RunningMode,
};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

const EMBEDDER_INPUT_SIZE: u32 = 112;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5; // symmetric normalization to [-1, 1]

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<EmbedderError> for CapabilityError {
    fn from(err: EmbedderError) -> Self {
        match err {
            EmbedderError::ModelNotFound(path) => CapabilityError::ModelNotFound(path),
            EmbedderError::InferenceFailed(msg) => CapabilityError::InferenceFailed(msg),
            EmbedderError::Ort(e) => CapabilityError::Backend(e.to_string()),
        }
    }
}

/// Region-of-interest face embedder.
pub struct RegionEmbedder {
    session: Arc<Mutex<Session>>,
    mode: RunningMode,
    /// Model file stem, reported as the embedding head name.
    head_name: String,
}

impl RegionEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &Path, device: Device, mode: RunningMode) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads(device))?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            %device,
            %mode,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        let head_name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "embedding".to_string());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            mode,
            head_name,
        })
    }

    async fn run(
        &self,
        image: &RgbImage,
        region: &NormalizedRegion,
        rotation: Option<f32>,
    ) -> Result<Embedding, EmbedderError> {
        let patch = crop::crop_region(image, region, rotation.unwrap_or(0.0), EMBEDDER_INPUT_SIZE);
        let input = preprocess(&patch);
        let session = Arc::clone(&self.session);

        let raw = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, EmbedderError> {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;
            Ok(data.to_vec())
        })
        .await
        .map_err(|e| EmbedderError::InferenceFailed(format!("embedder task: {e}")))??;

        if raw.is_empty() {
            return Err(EmbedderError::InferenceFailed("model produced an empty embedding".into()));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            head_index: 0,
            head_name: Some(self.head_name.clone()),
        })
    }
}

#[async_trait]
impl FaceEmbedding for RegionEmbedder {
    async fn embed(
        &self,
        image: &RgbImage,
        region: &NormalizedRegion,
        rotation: Option<f32>,
    ) -> Result<EmbeddingResult, CapabilityError> {
        if self.mode != RunningMode::Image {
            return Err(CapabilityError::WrongMode(self.mode));
        }
        let embedding = self.run(image, region, rotation).await?;
        Ok(EmbeddingResult {
            embeddings: vec![embedding],
            timestamp: None,
        })
    }

    async fn embed_for_stream(
        &self,
        frame: &RgbImage,
        timestamp: Duration,
        region: &NormalizedRegion,
        rotation: Option<f32>,
    ) -> Result<EmbeddingResult, CapabilityError> {
        if self.mode != RunningMode::Video {
            return Err(CapabilityError::WrongMode(self.mode));
        }
        let embedding = self.run(frame, region, rotation).await?;
        Ok(EmbeddingResult {
            embeddings: vec![embedding],
            timestamp: Some(timestamp),
        })
    }
}

/// Convert a square RGB patch into a NCHW float tensor.
fn preprocess(patch: &RgbImage) -> Array4<f32> {
    let (w, h) = patch.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in patch.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
        }
    }
    tensor
}

/// Scale to unit length; a zero vector is returned unchanged.
fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let patch = RgbImage::new(EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE);
        let tensor = preprocess(&patch);
        let n = EMBEDDER_INPUT_SIZE as usize;
        assert_eq!(tensor.shape(), &[1, 3, n, n]);
    }

    #[test]
    fn test_preprocess_normalization_per_channel() {
        let patch = RgbImage::from_pixel(4, 4, Rgb([0, 128, 255]));
        let tensor = preprocess(&patch);
        assert!((tensor[[0, 0, 1, 1]] + 1.0).abs() < 1e-6);
        let mid = (128.0 - EMBEDDER_MEAN) / EMBEDDER_STD;
        assert!((tensor[[0, 1, 1, 1]] - mid).abs() < 1e-6);
        assert!((tensor[[0, 2, 1, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(vec![0.0; 4]), vec![0.0; 4]);
    }

    #[test]
    fn test_load_missing_model() {
        let err = RegionEmbedder::load(Path::new("/nonexistent/facenet.onnx"), Device::Cpu, RunningMode::Image)
            .err()
            .unwrap();
        assert!(matches!(err, EmbedderError::ModelNotFound(_)));
        assert!(matches!(CapabilityError::from(err), CapabilityError::ModelNotFound(_)));
    }
}
