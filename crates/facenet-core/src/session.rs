//! Detection/embedding session.
//!
//! A session owns one detector and, when configured, one embedder, both
//! bound to a single device and running mode. Capabilities are acquired
//! lazily by [`Session::initialize`]; every other operation requires the
//! session to be initialized.

use crate::capability::{
    CapabilityError, DetectorOptions, EmbedderOptions, FaceDetection, FaceEmbedding,
    VisionProvider,
};
use crate::config::SessionConfig;
use crate::region::{NormalizedRegion, RegionError};
use crate::similarity::{self, SimilarityError};
use crate::types::{Detection, EmbeddingResult, MediaKind, MediaSource, RunningMode};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotInitialized,
    Initializing,
    Initialized,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::NotInitialized => "not_initialized",
            SessionState::Initializing => "initializing",
            SessionState::Initialized => "initialized",
            SessionState::Error => "error",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("face detector not initialized (state: {0})")]
    Uninitialized(SessionState),
    #[error("face embedder not configured; provide an embedding model in the session config")]
    EmbedderNotConfigured,
    #[error("cannot process a {actual} in a {mode}-mode session")]
    ModeMismatch { mode: RunningMode, actual: MediaKind },
    #[error("invalid region: {0}")]
    InvalidRegion(#[from] RegionError),
    #[error("initialization failed: {0}")]
    Initialization(CapabilityError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Request to embed one detected face.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingRequest<'a> {
    pub source: MediaSource<'a>,
    pub detection: &'a Detection,
    /// Stream timestamp for VIDEO mode; defaults to the session clock.
    pub timestamp: Option<Duration>,
}

impl<'a> EmbeddingRequest<'a> {
    pub fn new(source: MediaSource<'a>, detection: &'a Detection) -> Self {
        Self {
            source,
            detection,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Clone)]
struct Capabilities {
    detector: Arc<dyn FaceDetection>,
    embedder: Option<Arc<dyn FaceEmbedding>>,
}

enum Lifecycle {
    NotInitialized,
    Initializing,
    Initialized(Capabilities),
    Failed(CapabilityError),
}

impl Lifecycle {
    fn state(&self) -> SessionState {
        match self {
            Lifecycle::NotInitialized => SessionState::NotInitialized,
            Lifecycle::Initializing => SessionState::Initializing,
            Lifecycle::Initialized(_) => SessionState::Initialized,
            Lifecycle::Failed(_) => SessionState::Error,
        }
    }
}

/// One configured detector + embedder pairing and its lifecycle.
///
/// Initialization is serialized by the session; `detect` and `embed` are
/// not. Callers feeding a live stream should not overlap calls on one
/// session (see [`FrameGate`](crate::gate::FrameGate)).
pub struct Session {
    config: SessionConfig,
    provider: Arc<dyn VisionProvider>,
    lifecycle: Mutex<Lifecycle>,
    epoch: Instant,
}

impl Session {
    pub fn new(config: SessionConfig, provider: Arc<dyn VisionProvider>) -> Self {
        Self {
            config,
            provider,
            lifecycle: Mutex::new(Lifecycle::NotInitialized),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    /// The failure that moved the session into the error state, if any.
    pub fn error(&self) -> Option<CapabilityError> {
        match &*self.lock() {
            Lifecycle::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Acquire runtime assets and capabilities.
    ///
    /// A no-op while initializing or once initialized. A session that
    /// failed to initialize stays failed: the stored error is returned
    /// again and a new session must be built to retry. Dropping the
    /// returned future before it completes puts the session back to
    /// not initialized.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        {
            let mut lifecycle = self.lock();
            match &*lifecycle {
                Lifecycle::Initializing | Lifecycle::Initialized(_) => {
                    tracing::debug!(state = %lifecycle.state(), "initialize: already started");
                    return Ok(());
                }
                Lifecycle::Failed(err) => {
                    return Err(SessionError::Initialization(err.clone()));
                }
                Lifecycle::NotInitialized => {}
            }
            *lifecycle = Lifecycle::Initializing;
        }
        let _pending = PendingInit { session: self };

        tracing::info!(
            device = %self.config.device,
            mode = %self.config.mode,
            embedding = self.config.embedding_enabled(),
            "initializing face session"
        );

        match self.acquire().await {
            Ok(capabilities) => {
                *self.lock() = Lifecycle::Initialized(capabilities);
                tracing::info!(mode = %self.config.mode, "face session initialized");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "face session initialization failed");
                *self.lock() = Lifecycle::Failed(err.clone());
                Err(SessionError::Initialization(err))
            }
        }
    }

    /// Resolve assets, then create the detector and (optionally) the embedder concurrently.
    async fn acquire(&self) -> Result<Capabilities, CapabilityError> {
        let location = self.config.asset_location();
        let assets = self.provider.resolve_assets(&location).await?;
        tracing::debug!(root = %assets.root.display(), "runtime assets resolved");

        let detector_options = DetectorOptions {
            model: self.config.detection_model.clone(),
            device: self.config.device,
            mode: self.config.mode,
            min_detection_confidence: self.config.min_detection_confidence,
        };
        let detector = self.provider.create_detector(&assets, &detector_options);

        let embedder = async {
            match &self.config.embedding_model {
                Some(model) => {
                    let options = EmbedderOptions {
                        model: model.clone(),
                        device: self.config.device,
                        mode: self.config.mode,
                    };
                    self.provider.create_embedder(&assets, &options).await.map(Some)
                }
                None => Ok(None),
            }
        };

        let (detector, embedder) = tokio::try_join!(detector, embedder)?;

        Ok(Capabilities {
            detector: Arc::from(detector),
            embedder: embedder.map(Arc::from),
        })
    }

    /// Detect faces in `source`.
    ///
    /// Detections come back in the order the detector reports them. No
    /// face is an empty vector, not an error. In VIDEO mode `timestamp`
    /// defaults to the session clock.
    pub async fn detect(
        &self,
        source: MediaSource<'_>,
        timestamp: Option<Duration>,
    ) -> Result<Vec<Detection>, SessionError> {
        let capabilities = self.capabilities()?;
        self.check_kind(source.kind())?;

        let detections = match source {
            MediaSource::Image(image) => capabilities.detector.detect(image).await?,
            MediaSource::Video(frame) => {
                let timestamp = timestamp.unwrap_or_else(|| self.now());
                capabilities
                    .detector
                    .detect_for_stream(frame, timestamp)
                    .await?
            }
        };

        tracing::debug!(count = detections.len(), kind = %source.kind(), "detect");
        Ok(detections)
    }

    /// Embed the face described by `request.detection`.
    ///
    /// Returns `Ok(None)` when the detection carries no bounding box.
    pub async fn embed(
        &self,
        request: EmbeddingRequest<'_>,
    ) -> Result<Option<EmbeddingResult>, SessionError> {
        let capabilities = self.capabilities()?;
        let embedder = capabilities
            .embedder
            .ok_or(SessionError::EmbedderNotConfigured)?;

        let Some(bbox) = request.detection.bounding_box else {
            tracing::warn!("no bounding box on detection; skipping embedding");
            return Ok(None);
        };

        self.check_kind(request.source.kind())?;

        let (width, height) = request.source.dimensions();
        let region = NormalizedRegion::from_bounding_box(&bbox, width, height)?;

        let result = match request.source {
            MediaSource::Image(image) => embedder.embed(image, &region, bbox.angle).await?,
            MediaSource::Video(frame) => {
                let timestamp = request.timestamp.unwrap_or_else(|| self.now());
                embedder
                    .embed_for_stream(frame, timestamp, &region, bbox.angle)
                    .await?
            }
        };

        Ok(Some(result))
    }

    /// Cosine similarity between two embedding vectors, in [-1, 1].
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
        similarity::cosine_similarity(a, b)
    }

    fn capabilities(&self) -> Result<Capabilities, SessionError> {
        match &*self.lock() {
            Lifecycle::Initialized(capabilities) => Ok(capabilities.clone()),
            other => Err(SessionError::Uninitialized(other.state())),
        }
    }

    fn check_kind(&self, actual: MediaKind) -> Result<(), SessionError> {
        if actual == self.config.mode.media_kind() {
            Ok(())
        } else {
            Err(SessionError::ModeMismatch {
                mode: self.config.mode,
                actual,
            })
        }
    }

    /// Monotonic time since the session was constructed.
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resets a session left in `Initializing` by a cancelled `initialize`.
struct PendingInit<'a> {
    session: &'a Session,
}

impl Drop for PendingInit<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self.session.lock();
        if matches!(*lifecycle, Lifecycle::Initializing) {
            *lifecycle = Lifecycle::NotInitialized;
            tracing::warn!("face session initialization cancelled");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
