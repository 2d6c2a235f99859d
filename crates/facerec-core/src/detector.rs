//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
pub const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface buffalo_l")]
    ModelNotFound(String),
    #[error("confidence threshold must be a number in 0.0..=1.0, got {0}")]
    InvalidThreshold(f32),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ONNX Runtime error")]
    Ort(#[from] ort::Error),
}

/// A detection score cutoff is usable only when finite and within `0.0..=1.0`.
///
/// NaN would let every anchor through `score <= threshold`.
pub fn is_valid_threshold(threshold: f32) -> bool {
    threshold.is_finite() && (0.0..=1.0).contains(&threshold)
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_height: usize,
    input_width: usize,
    confidence_threshold: f32,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(
        model_path: &Path,
        confidence_threshold: f32,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        if !is_valid_threshold(confidence_threshold) {
            return Err(DetectorError::InvalidThreshold(confidence_threshold));
        }
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
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
            session,
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            confidence_threshold,
            stride_indices,
        })
    }

    /// Detect faces in an RGB image, returning bounding boxes sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(image, self.input_width, self.input_height);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
                })?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
                })?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            let dets = decode_stride(
                StrideOutputs { scores, bboxes, kps },
                stride,
                self.input_width,
                self.input_height,
                &letterbox,
                self.confidence_threshold,
            );
            all_detections.extend(dets);
        }

        let candidates = all_detections.len();
        let result = nms(all_detections, SCRFD_NMS_THRESHOLD);

        tracing::debug!(candidates, faces = result.len(), "SCRFD detection done");

        Ok(result)
    }
}

/// Resize an RGB image into the detector's letterboxed NCHW input tensor.
///
/// Bilinear (triangle) resize keeps aspect ratio; padding uses `SCRFD_MEAN`,
/// which normalizes to 0.0.
fn letterbox_tensor(
    image: &RgbImage,
    input_width: usize,
    input_height: usize,
) -> (Array4<f32>, LetterboxInfo) {
    let width = image.width() as usize;
    let height = image.height() as usize;

    let scale_w = input_width as f32 / width as f32;
    let scale_h = input_height as f32 / height as f32;
    let scale = scale_w.min(scale_h);

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_width);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_height);
    // Odd leftovers go to the right/bottom edge. Unmapping uses the same
    // whole-pixel offsets the image was placed at.
    let pad_x_start = (input_width - new_w) / 2;
    let pad_y_start = (input_height - new_h) / 2;

    let resized = imageops::resize(image, new_w as u32, new_h as u32, FilterType::Triangle);

    // Zeros == SCRFD_MEAN after normalization, so the border needs no fill pass.
    let mut tensor = Array4::<f32>::zeros((1, 3, input_height, input_width));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = pad_x_start + x as usize;
        let ty = pad_y_start + y as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x_start as f32,
        pad_y: pad_y_start as f32,
    };
    (tensor, letterbox)
}

/// Discover output tensor ordering by name.
///
/// SCRFD models may export tensors with named outputs ("score_8", "bbox_16", ...) or
/// generic numeric names. If named pattern is detected, maps them to stride slots.
/// Otherwise falls back to the standard positional ordering:
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
        .map(|&stride| {
            Some((
                find("score", stride)?,
                find("bbox", stride)?,
                find("kps", stride)?,
            ))
        })
        .collect();

    match named {
        Some(found) => {
            tracing::debug!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::debug!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping \
                 [0-2]=scores, [3-5]=bboxes, [6-8]=kps"
            );
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Raw output slices for one stride level.
struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode detections for a single stride level.
fn decode_stride(
    out: StrideOutputs<'_>,
    stride: usize,
    input_width: usize,
    input_height: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_h = input_height / stride;
    let grid_w = input_width / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let unmap = |x: f32, y: f32| -> (f32, f32) {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = out.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * s;
        let anchor_cy = (anchor_idx / grid_w) as f32 * s;

        // Distance encoding: [left, top, right, bottom] * stride
        let Some(d) = out.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = unmap(anchor_cx - d[0] * s, anchor_cy - d[1] * s);
        let (x2, y2) = unmap(anchor_cx + d[2] * s, anchor_cy + d[3] * s);

        let landmarks = out.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| unmap(anchor_cx + k[i * 2] * s, anchor_cy + k[i * 2 + 1] * s))
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
///
/// Output is sorted by confidence, highest first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }

    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    fn output_names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let expected = 50.0 / 150.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression_sorted() {
        let detections = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.6),
            make_bbox(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!(result[0].confidence > result[1].confidence);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_tensor_shape_and_padding() {
        // 320x160 fits 640x320 inside 640x640: 160 rows of padding top and bottom.
        let img = RgbImage::from_pixel(320, 160, Rgb([255, 0, 128]));
        let (tensor, lb) = letterbox_tensor(&img, 640, 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);

        // Padding normalizes to zero on every channel.
        for c in 0..3 {
            assert_eq!(tensor[[0, c, 0, 0]], 0.0);
            assert_eq!(tensor[[0, c, 639, 639]], 0.0);
        }

        // Image area keeps per-channel values in RGB order.
        let r = tensor[[0, 0, 320, 320]];
        let g = tensor[[0, 1, 320, 320]];
        let b = tensor[[0, 2, 320, 320]];
        // One grey level of resampling slack.
        let tol = 1.0 / SCRFD_STD + 1e-4;
        assert!((r - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < tol);
        assert!((g - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < tol);
        assert!((b - (128.0 - SCRFD_MEAN) / SCRFD_STD).abs() < tol);
    }

    #[test]
    fn test_letterbox_odd_padding_matches_unmapping() {
        // 640x319 keeps scale 1.0 and leaves 321 rows: 160 above, 161 below.
        let img = RgbImage::from_pixel(640, 319, Rgb([255, 255, 255]));
        let (tensor, lb) = letterbox_tensor(&img, 640, 640);

        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(tensor[[0, 0, 159, 10]], 0.0);
        assert!(tensor[[0, 0, 160, 10]] > 0.9);
        assert!(tensor[[0, 0, 478, 10]] > 0.9);
        assert_eq!(tensor[[0, 0, 479, 10]], 0.0);

        // The first image row sits at tensor row 160 and unmaps to y = 0.
        assert_eq!((160.0 - lb.pad_y) / lb.scale, 0.0);
    }

    #[test]
    fn test_letterbox_tiny_image() {
        let img = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        let (tensor, lb) = letterbox_tensor(&img, 640, 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 640.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let width = 320.0f32;
        let height = 240.0f32;
        let scale = (640.0 / width).min(640.0 / height);
        let pad_x = (640.0 - (width * scale).round()) / 2.0;
        let pad_y = (640.0 - (height * scale).round()) / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        let orig_x = 100.0f32;
        let orig_y = 50.0f32;
        let letterboxed_x = orig_x * scale + pad_x;
        let letterboxed_y = orig_y * scale + pad_y;

        let recovered_x = (letterboxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (letterboxed_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1, "x: {recovered_x} vs {orig_x}");
        assert!((recovered_y - orig_y).abs() < 0.1, "y: {recovered_y} vs {orig_y}");
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        // 64x64 input, stride 32 -> 2x2 grid, 8 anchors.
        let mut scores = vec![0.0f32; 8];
        let mut bboxes = vec![0.0f32; 8 * 4];
        let mut kps = vec![0.0f32; 8 * 10];

        // Anchor 3 -> cell 1 -> (cx, cy) = (32, 0)
        scores[3] = 0.9;
        bboxes[12..16].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        kps[30..40].copy_from_slice(&[0.1, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let lb = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(
            StrideOutputs { scores: &scores, bboxes: &bboxes, kps: &kps },
            32,
            64,
            64,
            &lb,
            0.5,
        );

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // x1 = (32 - 16) / 2 = 8, x2 = (32 + 16) / 2 = 24
        assert!((d.x - 8.0).abs() < 1e-5);
        assert!((d.width - 16.0).abs() < 1e-5);
        assert!((d.y - 0.0).abs() < 1e-5);
        assert!((d.height - 16.0).abs() < 1e-5);
        let lms = d.landmarks.unwrap();
        assert!((lms[0].0 - (32.0 + 3.2) / 2.0).abs() < 1e-5);
        assert!((lms[0].1 - 6.4 / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_stride_threshold_is_exclusive() {
        let scores = vec![0.5f32; 8];
        let bboxes = vec![1.0f32; 8 * 4];
        let kps = vec![0.0f32; 8 * 10];
        let lb = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(
            StrideOutputs { scores: &scores, bboxes: &bboxes, kps: &kps },
            32,
            64,
            64,
            &lb,
            0.5,
        );
        assert!(dets.is_empty());
    }

    #[test]
    fn test_threshold_validity() {
        assert!(is_valid_threshold(0.0));
        assert!(is_valid_threshold(SCRFD_CONFIDENCE_THRESHOLD));
        assert!(is_valid_threshold(1.0));
        assert!(!is_valid_threshold(f32::NAN));
        assert!(!is_valid_threshold(-1.0));
        assert!(!is_valid_threshold(1.5));
        assert!(!is_valid_threshold(f32::INFINITY));
    }

    #[test]
    fn test_load_rejects_nan_threshold_before_touching_model() {
        let err = FaceDetector::load(Path::new("/nonexistent/det_10g.onnx"), f32::NAN, 1)
            .err()
            .expect("NaN threshold must be rejected");
        assert!(matches!(err, DetectorError::InvalidThreshold(t) if t.is_nan()));
    }

    #[test]
    fn test_decode_stride_missing_kps() {
        let mut scores = vec![0.0f32; 8];
        scores[0] = 0.99;
        let bboxes = vec![1.0f32; 8 * 4];
        let lb = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(
            StrideOutputs { scores: &scores, bboxes: &bboxes, kps: &[] },
            32,
            64,
            64,
            &lb,
            0.5,
        );
        assert_eq!(dets.len(), 1);
        assert!(dets[0].landmarks.is_none());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names = output_names(&[
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16",
            "kps_32",
        ]);

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names = output_names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]);

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (428 + i).to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
