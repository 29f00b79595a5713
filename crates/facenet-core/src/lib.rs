//! facenet-core — Face detection/embedding sessions and face comparison.
//!
//! Wraps an opaque vision-capability provider (detector + optional
//! embedder) behind a lifecycle-checked [`Session`], normalizes detector
//! regions for the embedder and scores embeddings by cosine similarity.

pub mod capability;
pub mod config;
pub mod gate;
pub mod region;
pub mod session;
pub mod similarity;
pub mod types;

pub use capability::{
    CapabilityError, DetectorOptions, EmbedderOptions, FaceDetection, FaceEmbedding,
    RuntimeAssets, VisionProvider,
};
pub use config::{default_asset_dir, SessionConfig, DEFAULT_DETECTION_MODEL};
pub use gate::{FrameGate, FrameGuard};
pub use region::{NormalizedRegion, RegionError};
pub use session::{EmbeddingRequest, Session, SessionError, SessionState};
pub use similarity::{cosine_similarity, SimilarityError, SimilarityResult, DEFAULT_MATCH_THRESHOLD};
pub use types::{
    BoundingBox, Category, Detection, Device, Embedding, EmbeddingResult, Keypoint, MediaKind,
    MediaSource, RunningMode,
};
