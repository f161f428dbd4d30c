//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical position using the five InsightFace
//! reference landmarks (scaled to the requested output size) and least-squares
//! estimation. Faces without landmarks are cropped to their bounding box.

use crate::types::FacialArea;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const REFERENCE_SIZE: f32 = 112.0;

/// Reference landmarks scaled to an `out_width × out_height` crop.
fn reference_landmarks(out_width: u32, out_height: u32) -> [(f32, f32); 5] {
    let sx = out_width as f32 / REFERENCE_SIZE;
    let sy = out_height as f32 / REFERENCE_SIZE;
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * sx, y * sy))
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for A * [a, b, tx, ty]^T = B, two rows per point:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb);
    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: [[f32; 4]; 4], atb: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let max_row = (col..4)
            .max_by(|&x, &y| {
                m[x][col]
                    .abs()
                    .partial_cmp(&m[y][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // degenerate: identity scale, no shift
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Apply a 2×3 similarity warp to produce an `out_width × out_height` image.
///
/// Bilinear interpolation per channel. Out-of-bounds samples are black.
fn warp_affine(image: &RgbImage, matrix: &[f32; 6], out_width: u32, out_height: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_width, out_height);
    }
    let ia = a / det;
    let ib = b / det;

    let (src_w, src_h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(out_width, out_height, |ox, oy| {
        // src = M_inv * (dst - t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let channel = |c: usize| -> u8 {
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            val.round().clamp(0.0, 255.0) as u8
        };

        Rgb([channel(0), channel(1), channel(2)])
    })
}

/// Align a detected face to a canonical `out_width × out_height` crop.
///
/// Computes the similarity transform from the detected landmarks to the
/// reference positions and warps the face region into the output.
pub fn align_face(
    image: &RgbImage,
    landmarks: &[(f32, f32); 5],
    out_width: u32,
    out_height: u32,
) -> RgbImage {
    let reference = reference_landmarks(out_width, out_height);
    let matrix = estimate_similarity_transform(landmarks, &reference);
    warp_affine(image, &matrix, out_width, out_height)
}

/// Crop the given region out of the image. An empty region yields the whole
/// image.
pub fn crop_face(image: &RgbImage, area: &FacialArea) -> RgbImage {
    if area.is_empty() {
        return image.clone();
    }
    image::imageops::crop_imm(image, area.x, area.y, area.w, area.h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_reference_landmarks_scale_with_output() {
        let scaled = reference_landmarks(224, 224);
        assert!((scaled[0].0 - 2.0 * REFERENCE_LANDMARKS_112[0].0).abs() < 1e-4);
        assert!((scaled[4].1 - 2.0 * REFERENCE_LANDMARKS_112[4].1).abs() < 1e-4);
    }

    #[test]
    fn test_align_face_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112, 224, 224);
        assert_eq!(aligned.dimensions(), (224, 224));

        let narrow = align_face(&image, &REFERENCE_LANDMARKS_112, 47, 55);
        assert_eq!(narrow.dimensions(), (47, 55));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the left-eye landmark should land near the reference
        // left-eye position after alignment.
        let mut image = RgbImage::new(200, 200);
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([255, 0, 255]));
            }
        }

        let aligned = align_face(&image, &src_landmarks, 112, 112);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;

        let mut max_red = 0u8;
        let mut max_green = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                let p = aligned.get_pixel(x, y);
                max_red = max_red.max(p[0]);
                max_green = max_green.max(p[1]);
            }
        }
        assert!(max_red > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_red}");
        assert_eq!(max_green, 0, "channels must be warped independently");
    }

    #[test]
    fn test_degenerate_landmarks_do_not_panic() {
        let image = RgbImage::from_pixel(50, 50, Rgb([10, 20, 30]));
        let aligned = align_face(&image, &[(0.0, 0.0); 5], 112, 112);
        assert_eq!(aligned.dimensions(), (112, 112));
    }

    #[test]
    fn test_crop_face() {
        let mut image = RgbImage::new(100, 80);
        image.put_pixel(20, 10, Rgb([1, 2, 3]));
        let crop = crop_face(&image, &FacialArea { x: 20, y: 10, w: 30, h: 40 });
        assert_eq!(crop.dimensions(), (30, 40));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_crop_empty_area_returns_whole_image() {
        let image = RgbImage::new(10, 10);
        let crop = crop_face(&image, &FacialArea { x: 5, y: 5, w: 0, h: 3 });
        assert_eq!(crop.dimensions(), (10, 10));
    }
}
