//! facenet-onnx — ONNX Runtime vision-capability provider.
//!
//! Uses SCRFD for face detection and a FaceNet/ArcFace style model for
//! region embeddings, both running via ONNX Runtime.

pub mod crop;
pub mod detector;
pub mod embedder;
pub mod provider;

pub use detector::{DetectorError, ScrfdDetector};
pub use embedder::{EmbedderError, RegionEmbedder};
pub use provider::OnnxProvider;

use facenet_core::Device;

const CPU_INTRA_THREADS: usize = 2;

/// Intra-op thread count for an ORT session on `device`.
///
/// No GPU execution provider is compiled in; GPU requests run on CPU.
pub(crate) fn intra_threads(device: Device) -> usize {
    if device == Device::Gpu {
        tracing::warn!("GPU execution provider unavailable in this build; running on CPU");
    }
    CPU_INTRA_THREADS
}
