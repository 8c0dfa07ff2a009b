//! SCRFD face detector via ONNX Runtime, operating on RGB frames.
//!
//! The frame is scaled to fit a square 640×640 input anchored at the top-left
//! corner; the remainder is zero after normalization. Detections are decoded
//! per stride level, filtered by score and merged with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector model has {0} outputs, expected 9 (score/bbox/kps for 3 strides)")]
    UnexpectedOutputs(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty frame")]
    EmptyFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Positions of the score, bbox and keypoint tensors for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    levels: [LevelOutputs; 3],
    score_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::UnexpectedOutputs(names.len()));
        }

        let levels = output_layout(&names);
        tracing::info!(path = model_path, outputs = ?names, ?levels, "loaded SCRFD detector");

        Ok(Self {
            session,
            levels,
            score_threshold: SCORE_THRESHOLD,
        })
    }

    /// Detect faces in an RGB frame. Results are sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyFrame);
        }

        let (input, scale) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in self.levels.iter().zip(STRIDES.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(level.score, "scores")?;
            let bboxes = extract(level.bbox, "bboxes")?;
            let kps = extract(level.kps, "keypoints")?;

            candidates.extend(decode_level(scores, bboxes, kps, stride, scale, self.score_threshold));
        }

        let faces = non_max_suppression(candidates, NMS_IOU_THRESHOLD);
        tracing::debug!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Map output tensor names to stride levels.
///
/// Exports that name outputs `score_8`, `bbox_8`, `kps_8`, ... are mapped by
/// name; anything else uses the standard order of scores, bboxes, keypoints.
fn output_layout(names: &[String]) -> [LevelOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<LevelOutputs>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(LevelOutputs {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match named {
        Some(levels) => [levels[0], levels[1], levels[2]],
        None => std::array::from_fn(|i| LevelOutputs {
            score: i,
            bbox: i + 3,
            kps: i + 6,
        }),
    }
}

/// Resize the frame to fit the model input and build a normalized NCHW tensor.
///
/// Returns the tensor and the scale from frame to input coordinates.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let (width, height) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE as u32);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Padding stays at 0.0, which is the normalized mean.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, scale)
}

/// Decode one stride level into frame-space boxes with landmarks.
fn decode_level(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    scale: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let cells_per_row = INPUT_SIZE / stride;
    let anchors = cells_per_row * cells_per_row * ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > threshold)
        .filter_map(|i| {
            let cell = i / ANCHORS_PER_CELL;
            let cx = (cell % cells_per_row) as f32 * step;
            let cy = (cell / cells_per_row) as f32 * step;

            let b = bboxes.get(i * 4..i * 4 + 4)?;
            let x1 = (cx - b[0] * step) / scale;
            let y1 = (cy - b[1] * step) / scale;
            let x2 = (cx + b[2] * step) / scale;
            let y2 = (cy + b[3] * step) / scale;

            let landmarks = kps.get(i * 10..i * 10 + 10).map(|k| {
                std::array::from_fn(|p| {
                    (
                        (cx + k[p * 2] * step) / scale,
                        (cy + k[p * 2 + 1] * step) / scale,
                    )
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[i],
                landmarks,
            })
        })
        .collect()
}

/// Keep the most confident box of every overlapping cluster.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let overlap_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let overlap = overlap_w * overlap_h;
    let union = a.width * a.height + b.width * b.height - overlap;
    if union > 0.0 {
        overlap / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_shifted() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_distinct_faces() {
        let boxes = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(300.0, 300.0, 60.0, 60.0, 0.7),
        ];
        let kept = non_max_suppression(boxes, NMS_IOU_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_output_layout_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let levels = output_layout(&names);
        assert_eq!(levels[0], LevelOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(levels[2], LevelOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_output_layout_positional() {
        let names: Vec<String> = (400..409).map(|i: usize| i.to_string()).collect();
        let levels = output_layout(&names);
        assert_eq!(levels[1], LevelOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_preprocess_scales_and_pads() {
        let image = RgbImage::from_pixel(320, 160, image::Rgb([255, 128, 0]));
        let (tensor, scale) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        assert_eq!(scale, 2.0);

        let red = (255.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 0, 10, 10]] - red).abs() < 0.02);
        assert!((tensor[[0, 2, 10, 10]] - (0.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 0.02);
        // Below the resized frame (320 rows high) is padding.
        assert_eq!(tensor[[0, 0, 600, 10]], 0.0);
    }

    #[test]
    fn test_decode_level_maps_to_frame_space() {
        let stride = 32;
        let cells = INPUT_SIZE / stride;
        let anchors = cells * cells * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // Anchor for cell (x=2, y=1): index = (1 * cells + 2) * 2
        let idx = (cells + 2) * ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let faces = decode_level(&scores, &bboxes, &kps, stride, 2.0, SCORE_THRESHOLD);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // Center at (64, 32) input px, box ±32 → frame coords halved.
        assert!((f.x - 16.0).abs() < 1e-5);
        assert!((f.y - 0.0).abs() < 1e-5);
        assert!((f.width - 32.0).abs() < 1e-5);
        assert!(f.landmarks.is_some());
    }
}
