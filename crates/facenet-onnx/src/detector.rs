//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.
//! Boxes are reported in source pixels, keypoints normalized to the source size.

use crate::intra_threads;
use async_trait::async_trait;
use facenet_core::{
    BoundingBox, CapabilityError, Category, Detection, Device, FaceDetection, Keypoint,
    RunningMode,
};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const FACE_CATEGORY: &str = "face";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface into the asset directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<DetectorError> for CapabilityError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::ModelNotFound(path) => CapabilityError::ModelNotFound(path),
            DetectorError::InferenceFailed(msg) => CapabilityError::InferenceFailed(msg),
            DetectorError::Ort(e) => CapabilityError::Backend(e.to_string()),
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// A decoded face before conversion to a [`Detection`], in source pixels.
#[derive(Debug, Clone)]
struct RawFace {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    score: f32,
    landmarks: Option<[(f32, f32); 5]>,
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Arc<Mutex<Session>>,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
    min_confidence: f32,
    mode: RunningMode,
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(
        model_path: &Path,
        device: Device,
        mode: RunningMode,
        min_confidence: f32,
    ) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads(device))?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            %device,
            %mode,
            min_confidence,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            stride_indices,
            min_confidence,
            mode,
        })
    }

    /// Detect faces in an RGB image, sorted by confidence.
    async fn run(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image);
        let session = Arc::clone(&self.session);
        let stride_indices = self.stride_indices;
        let threshold = self.min_confidence;

        let faces = tokio::task::spawn_blocking(move || -> Result<Vec<RawFace>, DetectorError> {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            let mut all_faces = Vec::new();
            for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
                let (score_idx, bbox_idx, kps_idx) = stride_indices[stride_pos];

                let (_, scores) = outputs[score_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
                let (_, bboxes) = outputs[bbox_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
                let (_, kps) = outputs[kps_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

                all_faces.extend(decode_stride(scores, bboxes, kps, stride, &letterbox, threshold));
            }

            Ok(nms(all_faces, SCRFD_NMS_THRESHOLD))
        })
        .await
        .map_err(|e| DetectorError::InferenceFailed(format!("detector task: {e}")))??;

        Ok(faces
            .into_iter()
            .map(|face| to_detection(face, width, height))
            .collect())
    }
}

#[async_trait]
impl FaceDetection for ScrfdDetector {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, CapabilityError> {
        if self.mode != RunningMode::Image {
            return Err(CapabilityError::WrongMode(self.mode));
        }
        Ok(self.run(image).await?)
    }

    async fn detect_for_stream(
        &self,
        frame: &RgbImage,
        timestamp: Duration,
    ) -> Result<Vec<Detection>, CapabilityError> {
        if self.mode != RunningMode::Video {
            return Err(CapabilityError::WrongMode(self.mode));
        }
        let detections = self.run(frame).await?;
        tracing::trace!(?timestamp, count = detections.len(), "stream detect");
        Ok(detections)
    }
}

/// Letterbox an RGB image into a 640×640 NCHW float tensor.
///
/// Padding is left at zero, which is the normalized SCRFD mean.
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let pad_x = (SCRFD_INPUT_SIZE - new_w) / 2;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let n = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

fn to_detection(face: RawFace, width: u32, height: u32) -> Detection {
    let keypoints = face
        .landmarks
        .map(|lms| {
            lms.iter()
                .map(|&(x, y)| Keypoint {
                    x: x / width as f32,
                    y: y / height as f32,
                })
                .collect()
        })
        .unwrap_or_default();

    Detection {
        bounding_box: Some(BoundingBox::new(face.x, face.y, face.width, face.height)),
        categories: vec![Category {
            index: 0,
            score: face.score,
            name: Some(FACE_CATEGORY.to_string()),
        }],
        keypoints,
    }
}

/// Discover output tensor ordering by name.
///
/// SCRFD models may export tensors with named outputs ("score_8", "bbox_16", ...) or
/// generic numeric names. Falls back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes, [6-8]=kps"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<RawFace> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let stride_f = stride as f32;

    let unmap = |x: f32, y: f32| -> (f32, f32) {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut faces = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score < threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * stride_f;
        let anchor_cy = (anchor_idx / grid) as f32 * stride_f;

        // bbox: [x1_offset, y1_offset, x2_offset, y2_offset] * stride
        let bbox_off = idx * 4;
        if bbox_off + 3 >= bboxes.len() {
            continue;
        }
        let (x1, y1) = unmap(
            anchor_cx - bboxes[bbox_off] * stride_f,
            anchor_cy - bboxes[bbox_off + 1] * stride_f,
        );
        let (x2, y2) = unmap(
            anchor_cx + bboxes[bbox_off + 2] * stride_f,
            anchor_cy + bboxes[bbox_off + 3] * stride_f,
        );

        let kps_off = idx * 10;
        let landmarks = (kps_off + 9 < kps.len()).then(|| {
            std::array::from_fn(|i| {
                unmap(
                    anchor_cx + kps[kps_off + i * 2] * stride_f,
                    anchor_cy + kps[kps_off + i * 2 + 1] * stride_f,
                )
            })
        });

        faces.push(RawFace {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score,
            landmarks,
        });
    }

    faces
}

/// Non-Maximum Suppression; output is sorted by descending score.
fn nms(mut faces: Vec<RawFace>, iou_threshold: f32) -> Vec<RawFace> {
    faces.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<RawFace> = Vec::new();
    for face in faces {
        if keep.iter().all(|kept| iou(kept, &face) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &RawFace, b: &RawFace) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn raw(x: f32, y: f32, w: f32, h: f32, score: f32) -> RawFace {
        RawFace { x, y, width: w, height: h, score, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = raw(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = raw(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = raw(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let faces = vec![
            raw(5.0, 5.0, 100.0, 100.0, 0.8),
            raw(200.0, 200.0, 50.0, 50.0, 0.7),
            raw(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = nms(faces, SCRFD_NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], SCRFD_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_preprocess_letterbox_landscape() {
        let img = RgbImage::from_pixel(320, 240, Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        // Padding normalizes to zero, content to (255 - mean) / std.
        assert_eq!(tensor[[0, 0, 10, 320]], 0.0);
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 320, 320]] - white).abs() < 1e-5);
    }

    #[test]
    fn test_decode_stride_maps_back_to_source() {
        // One anchor at grid cell (1, 1) of stride 32 with a unit box around it.
        let stride = 32usize;
        let grid = 640 / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let idx = (grid + 1) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        let mut bboxes = vec![0.0f32; anchors * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let kps = vec![0.0f32; anchors * 10];

        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let faces = decode_stride(&scores, &bboxes, &kps, stride, &letterbox, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // Anchor at (32, 32) in letterbox space, box [0, 0, 64, 64].
        assert!((f.x - 0.0).abs() < 1e-4);
        assert!((f.y - (-40.0)).abs() < 1e-4);
        assert!((f.width - 32.0).abs() < 1e-4);
        assert!((f.height - 32.0).abs() < 1e-4);
        let lms = f.landmarks.unwrap();
        assert!((lms[0].0 - 16.0).abs() < 1e-4);
        assert!((lms[0].1 - (-24.0)).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_respects_threshold() {
        let stride = 32usize;
        let anchors = (640 / stride).pow(2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.49;
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        let letterbox = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&scores, &bboxes, &kps, stride, &letterbox, 0.5).is_empty());
        assert_eq!(decode_stride(&scores, &bboxes, &kps, stride, &letterbox, 0.4).len(), 1);
    }

    #[test]
    fn test_to_detection_normalizes_keypoints() {
        let mut face = raw(10.0, 20.0, 30.0, 40.0, 0.75);
        face.landmarks = Some([(50.0, 25.0); 5]);
        let det = to_detection(face, 100, 50);
        assert_eq!(det.bounding_box, Some(BoundingBox::new(10.0, 20.0, 30.0, 40.0)));
        assert_eq!(det.keypoints.len(), 5);
        assert_eq!(det.keypoints[0], Keypoint { x: 0.5, y: 0.5 });
        assert!((det.confidence() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8",  "bbox_16",  "bbox_32",
            "kps_8",   "kps_16",   "kps_32",
        ].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
