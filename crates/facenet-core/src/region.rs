//! Region normalization: detector output space → embedder input window.
//!
//! Detectors report boxes either as fractions of the media size or in raw
//! pixels. The embedder always wants fractions, clamped to the media and
//! with positive area.

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
    #[error("invalid bounding box dimensions: [{left}, {top}, {right}, {bottom}] has no area after clamping")]
    Degenerate {
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    },
    #[error("media has zero size ({width}x{height}); cannot convert pixel region")]
    EmptyMedia { width: u32, height: u32 },
}

/// A region of interest as fractions of media width/height.
///
/// Invariant: every edge is in [0, 1], `right > left` and `bottom > top`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRegion {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl NormalizedRegion {
    /// Normalize a detector-reported box against media of `media_width` × `media_height` pixels.
    ///
    /// A box whose origin and size are all ≤ 1 is taken as already normalized;
    /// anything else is treated as pixels. This misreads sub-pixel boxes in
    /// pixel space as normalized, which is accepted.
    pub fn from_bounding_box(
        bbox: &BoundingBox,
        media_width: u32,
        media_height: u32,
    ) -> Result<Self, RegionError> {
        let is_normalized = bbox.origin_x <= 1.0
            && bbox.origin_y <= 1.0
            && bbox.width <= 1.0
            && bbox.height <= 1.0;

        let (left, top, right, bottom) = if is_normalized {
            (
                bbox.origin_x,
                bbox.origin_y,
                bbox.origin_x + bbox.width,
                bbox.origin_y + bbox.height,
            )
        } else {
            if media_width == 0 || media_height == 0 {
                return Err(RegionError::EmptyMedia {
                    width: media_width,
                    height: media_height,
                });
            }
            let w = media_width as f32;
            let h = media_height as f32;
            (
                bbox.origin_x / w,
                bbox.origin_y / h,
                (bbox.origin_x + bbox.width) / w,
                (bbox.origin_y + bbox.height) / h,
            )
        };

        Self::new(left, top, right, bottom)
    }

    /// Build a region from raw edges, clamping each to [0, 1].
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Result<Self, RegionError> {
        let left = clamp_unit(left);
        let top = clamp_unit(top);
        let right = clamp_unit(right);
        let bottom = clamp_unit(bottom);

        // Written as negated > so NaN edges are rejected too.
        if !(right > left) || !(bottom > top) {
            return Err(RegionError::Degenerate {
                left,
                top,
                right,
                bottom,
            });
        }

        Ok(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    /// The full media frame.
    pub fn full() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            right: 1.0,
            bottom: 1.0,
        }
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn top(&self) -> f32 {
        self.top
    }

    pub fn right(&self) -> f32 {
        self.right
    }

    pub fn bottom(&self) -> f32 {
        self.bottom
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Center point in normalized coordinates.
    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Map back to pixel space as (x, y, width, height).
    pub fn to_pixel_rect(&self, media_width: u32, media_height: u32) -> (f32, f32, f32, f32) {
        let w = media_width as f32;
        let h = media_height as f32;
        (
            self.left * w,
            self.top * h,
            self.width() * w,
            self.height() * h,
        )
    }
}

fn clamp_unit(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}
