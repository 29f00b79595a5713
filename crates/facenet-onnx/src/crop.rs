//! Region-of-interest sampling for the embedder.
//!
//! Resamples a normalized region of an RGB image into a square patch,
//! optionally rotated around the region center. Pixels that fall outside
//! the source are black.

use facenet_core::NormalizedRegion;
use image::{Rgb, RgbImage};

/// Sample a `size`×`size` patch covering `region`, rotated by `angle_deg`
/// (clockwise, degrees) around the region center.
pub fn crop_region(image: &RgbImage, region: &NormalizedRegion, angle_deg: f32, size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (x, y, rw, rh) = region.to_pixel_rect(width, height);
    let cx = x + rw / 2.0;
    let cy = y + rh / 2.0;

    let step_x = rw / size as f32;
    let step_y = rh / size as f32;
    let half = size as f32 / 2.0;
    let (sin, cos) = angle_deg.to_radians().sin_cos();

    RgbImage::from_fn(size, size, |ox, oy| {
        // Offset from patch center, in source pixels, before rotation.
        let dx = (ox as f32 + 0.5 - half) * step_x;
        let dy = (oy as f32 + 0.5 - half) * step_y;

        let sx = cx + dx * cos - dy * sin;
        let sy = cy + dx * sin + dy * cos;

        // Pixel centers sit at +0.5.
        sample_bilinear(image, sx - 0.5, sy - 0.5)
    })
}

/// Bilinear sample at continuous pixel coordinates; out-of-bounds reads as black.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let (width, height) = image.dimensions();

    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < width as i64 && y >= 0 && y < height as i64 {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let v = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
            + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
            + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
            + sample(x0 + 1, y0 + 1, c) * fx * fy;
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Top half red, bottom half blue.
    fn split_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |_, y| {
            if y < h / 2 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        })
    }

    #[test]
    fn test_crop_output_size() {
        let img = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let patch = crop_region(&img, &NormalizedRegion::full(), 0.0, 112);
        assert_eq!(patch.dimensions(), (112, 112));
    }

    #[test]
    fn test_crop_uniform_interior() {
        let img = RgbImage::from_pixel(200, 200, Rgb([10, 120, 230]));
        let region = NormalizedRegion::new(0.25, 0.25, 0.75, 0.75).unwrap();
        let patch = crop_region(&img, &region, 0.0, 32);
        assert!(patch.pixels().all(|p| *p == Rgb([10, 120, 230])));
    }

    #[test]
    fn test_crop_selects_region() {
        let img = split_image(100, 100);
        let bottom = NormalizedRegion::new(0.1, 0.6, 0.9, 0.95).unwrap();
        let patch = crop_region(&img, &bottom, 0.0, 16);
        assert!(patch.pixels().all(|p| *p == Rgb([0, 0, 255])));
    }

    #[test]
    fn test_crop_rotation_flips_halves() {
        let img = split_image(100, 100);
        let region = NormalizedRegion::full();
        let upright = crop_region(&img, &region, 0.0, 20);
        let flipped = crop_region(&img, &region, 180.0, 20);
        assert_eq!(upright.get_pixel(10, 2), &Rgb([255, 0, 0]));
        assert_eq!(flipped.get_pixel(10, 2), &Rgb([0, 0, 255]));
        assert_eq!(flipped.get_pixel(10, 17), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_sample_out_of_bounds_is_black() {
        let img = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        assert_eq!(sample_bilinear(&img, -10.0, -10.0), Rgb([0, 0, 0]));
        assert_eq!(sample_bilinear(&img, 1.0, 1.0), Rgb([200, 200, 200]));
    }
}
