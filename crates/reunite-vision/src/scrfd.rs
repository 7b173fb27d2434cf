//! SCRFD face detection for RGB photographs.
//!
//! One decode path serves the whole det_* family (det_500m, det_2.5g,
//! det_10g): 3-stride anchor-free outputs plus NMS. Input photos are
//! letterboxed to the square model input and mapped back afterwards.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Axis-aligned face region in original-photo coordinates.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Scale and padding applied by the letterbox resize, kept to map
/// detections back into photo coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Per-stride (score, bbox) output tensor indices.
type StrideIndices = (usize, usize);

pub struct ScrfdDetector {
    session: Session,
    stride_indices: [StrideIndices; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD export needs at least 6 outputs (3 strides x score/bbox), got {}",
                output_names.len()
            )));
        }
        let stride_indices = discover_output_indices(&output_names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            "loaded SCRFD detection model"
        );

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces, returning boxes sorted by descending confidence.
    pub fn detect(&mut self, photo: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = preprocess(photo);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[slot];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let mut kept = nms(all, SCRFD_NMS_THRESHOLD);
        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(kept)
    }
}

/// Letterbox an RGB photo into the square NCHW input tensor.
///
/// Padding stays at zero, the normalized value of SCRFD_MEAN.
fn preprocess(photo: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (w, h) = photo.dimensions();
    let side = SCRFD_INPUT_SIZE;

    let scale = (side as f32 / w as f32).min(side as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    let pad_x = (side - new_w) as f32 / 2.0;
    let pad_y = (side - new_h) as f32 / 2.0;

    let resized = image::imageops::resize(photo, new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, side as usize, side as usize));
    let x0 = pad_x.floor() as u32;
    let y0 = pad_y.floor() as u32;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + x0) as usize, (y + y0) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

/// Map output names to per-stride (score, bbox) slots.
///
/// Named exports ("score_8", "bbox_16", ...) are matched directly;
/// numeric exports fall back to the standard positional layout
/// [0-2]=scores, [3-5]=bboxes for strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = SCRFD_STRIDES
        .iter()
        .all(|&s| find("score", s).is_some() && find("bbox", s).is_some());

    if named {
        std::array::from_fn(|i| {
            let stride = SCRFD_STRIDES[i];
            (find("score", stride).unwrap(), find("bbox", stride).unwrap())
        })
    } else {
        [(0, 3), (1, 4), (2, 5)]
    }
}

/// Decode one stride level's anchor grid into photo-space boxes.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        // Offsets are [left, top, right, bottom] distances in stride units.
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        let ox1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let oy1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let ox2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let oy2 = (y2 - letterbox.pad_y) / letterbox.scale;

        detections.push(FaceBox {
            x: ox1,
            y: oy1,
            width: ox2 - ox1,
            height: oy2 - oy1,
            confidence: score,
        });
    }
    detections
}

/// Non-Maximum Suppression over detected boxes.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    let mut suppressed = vec![false; detections.len()];
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());
        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_box(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = face_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = face_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face_box(50.0, 50.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_pair() {
        let detections = vec![
            face_box(0.0, 0.0, 100.0, 100.0, 0.9),
            face_box(4.0, 4.0, 100.0, 100.0, 0.7),
            face_box(300.0, 300.0, 40.0, 40.0, 0.6),
        ];
        let kept = nms(detections, SCRFD_NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], SCRFD_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_discover_named_outputs() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_discover_shuffled_named_outputs() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_discover_numeric_outputs_positional() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_back_to_photo_space() {
        // One anchor over threshold at cell (1, 0) of stride 8, with the
        // photo letterboxed at scale 0.5 and pad (10, 20).
        let grid = SCRFD_INPUT_SIZE as usize / 8;
        let mut scores = vec![0.0f32; grid * grid * SCRFD_ANCHORS_PER_CELL];
        let mut bboxes = vec![0.0f32; scores.len() * 4];
        let idx = SCRFD_ANCHORS_PER_CELL; // first anchor of cell x=1, y=0
        scores[idx] = 0.8;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let letterbox = Letterbox {
            scale: 0.5,
            pad_x: 10.0,
            pad_y: 20.0,
        };
        let boxes = decode_stride(&scores, &bboxes, 8, &letterbox, 0.5);
        assert_eq!(boxes.len(), 1);

        // Anchor center (8, 0), offsets of one stride each side: the
        // letterboxed box is (0, -8)..(16, 8), mapped back by pad/scale.
        let b = &boxes[0];
        assert!((b.x - (0.0 - 10.0) / 0.5).abs() < 1e-4);
        assert!((b.y - (-8.0 - 20.0) / 0.5).abs() < 1e-4);
        assert!((b.width - 32.0).abs() < 1e-4);
        assert!((b.height - 32.0).abs() < 1e-4);
        assert!((b.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_below_threshold_dropped() {
        let grid = SCRFD_INPUT_SIZE as usize / 32;
        let scores = vec![0.3f32; grid * grid * SCRFD_ANCHORS_PER_CELL];
        let bboxes = vec![1.0f32; scores.len() * 4];
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        assert!(decode_stride(&scores, &bboxes, 32, &letterbox, 0.5).is_empty());
    }

    #[test]
    fn test_preprocess_letterbox_dimensions() {
        let photo = RgbImage::from_pixel(320, 240, image::Rgb([127, 127, 127]));
        let (tensor, letterbox) = preprocess(&photo);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // 320x240 scales by 2 to 640x480, padded vertically by 80 each side.
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert!((letterbox.pad_x - 0.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);
        // Padding rows stay at 0 after normalization.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 639, 639]], 0.0);
        // Interior pixels carry the normalized value.
        let expected = (127.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 1, 320, 320]] - expected).abs() < 1e-5);
    }
}
