//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical 112×112 position using the five
//! InsightFace reference landmarks and least-squares estimation.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
///
/// With both point sets centred on their means the normal equations decouple:
/// `a = Σ(s·d) / Σ|s|²`, `b = Σ(s×d) / Σ|s|²`, and the translation maps the
/// source centroid onto the destination centroid.
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (smx, smy) = mean(src);
    let (dmx, dmy) = mean(dst);

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut src_var = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - smx, sy - smy);
        let (dx, dy) = (dx - dmx, dy - dmy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        src_var += sx * sx + sy * sy;
    }

    if src_var < 1e-12 {
        // All landmarks coincide: scale is undefined.
        return [1.0, 0.0, dmx - smx, 0.0, 1.0, dmy - smy];
    }

    let a = dot / src_var;
    let b = cross / src_var;
    let tx = dmx - (a * smx - b * smy);
    let ty = dmy - (b * smx + a * smy);

    [a, -b, tx, b, a, ty]
}

/// Apply a 2×3 similarity warp to produce a square RGB output image.
///
/// Uses bilinear interpolation per channel. Out-of-bounds pixels are black.
fn warp_affine(image: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the 2x2 part: M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    let (src_w, src_h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            let p = image.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        // Map output pixel back to source: src = M_inv * (dst - t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        Rgb(std::array::from_fn(|c| {
            let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            val.round().clamp(0.0, 255.0) as u8
        }))
    })
}

/// Align a detected face to a canonical 112×112 crop.
///
/// Computes the similarity transform from the five detected landmarks to the
/// ArcFace reference positions and warps the face region into a 112×112 RGB
/// crop suitable for embedding extraction.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(image, &matrix, ALIGNED_SIZE)
}
