//! Person detection behind a stable capability interface.
//!
//! The pipeline only depends on the `ObjectDetector` trait; the YOLOv8 ONNX
//! implementation lives here and a `NullDetector` stands in whenever no
//! model could be loaded, so detector unavailability degrades to "no people
//! found" instead of aborting a poll.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use log::info;
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};

/// COCO class id for "person"; the only class the pipeline keeps.
pub const PERSON_CLASS_ID: usize = 0;

const COCO_CLASS_COUNT: usize = 80;

/// Axis-aligned box in the analyzed region's pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}

/// Opaque detection capability: image region in, candidate boxes out.
///
/// Implementations must tolerate empty regions (return an empty list) and
/// should keep their own candidate floor below the pipeline's counting
/// threshold so weak detections stay visible for max-confidence tracking.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Substitute used when no detection model is available.
pub struct NullDetector;

impl ObjectDetector for NullDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct YoloDetectorConfig {
    /// Candidates below this score are dropped before NMS. Kept below the
    /// counting threshold on purpose.
    pub candidate_threshold: f32,
    pub nms_threshold: f32,
    /// Square model input edge.
    pub input_size: u32,
}

impl Default for YoloDetectorConfig {
    fn default() -> Self {
        Self {
            candidate_threshold: 0.25,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// YOLOv8 object detector running through ONNX Runtime. Built once at
/// startup and shared by handle; `Session::run` takes `&mut`, hence the
/// mutex.
pub struct YoloDetector {
    session: Mutex<Session>,
    config: YoloDetectorConfig,
}

impl YoloDetector {
    pub fn load(model_path: &Path, config: YoloDetectorConfig) -> Result<Self> {
        let session = create_session(model_path)?;
        info!(
            "person detector initialized from {} (input {}px)",
            model_path.display(),
            config.input_size
        );
        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    /// Resize to the square model input, scale to [0, 1], NCHW layout.
    fn preprocess(&self, image: &RgbImage) -> Result<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(
            image,
            size,
            size,
            image::imageops::FilterType::Triangle,
        );

        let (w, h) = (size as usize, size as usize);
        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|err| anyhow!("failed to build input tensor: {err}"))
    }

    fn run_inference(&self, input: Value) -> Result<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("detector session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|err| anyhow!("detector inference failed: {err}"))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| anyhow!("detector output0 tensor missing"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|err| anyhow!("failed to extract detector output: {err}"))?;

        Ok(tensor.1.iter().copied().collect())
    }

    /// Parse the YOLOv8 head: `[1, 4 + classes, candidates]`, boxes in
    /// center format on the model input scale.
    fn postprocess(&self, outputs: &[f32], region_w: u32, region_h: u32) -> Result<Vec<Detection>> {
        let num_features = 4 + COCO_CLASS_COUNT;
        if outputs.is_empty() || outputs.len() % num_features != 0 {
            return Err(anyhow!(
                "unexpected detector output length {} (not divisible by {})",
                outputs.len(),
                num_features
            ));
        }
        let num_boxes = outputs.len() / num_features;

        let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
            .context("failed to reshape detector output")?;
        let transposed = output_array.t();

        let input_size = self.config.input_size as f32;
        let scale_w = region_w as f32 / input_size;
        let scale_h = region_h as f32 / input_size;

        let mut candidates: Vec<Detection> = Vec::new();
        for i in 0..num_boxes {
            let cx = transposed[[i, 0]];
            let cy = transposed[[i, 1]];
            let w = transposed[[i, 2]];
            let h = transposed[[i, 3]];

            let mut best_class = 0;
            let mut best_score = 0.0f32;
            for c in 0..COCO_CLASS_COUNT {
                let score = transposed[[i, 4 + c]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            if best_score < self.config.candidate_threshold {
                continue;
            }

            let x = ((cx - w / 2.0) * scale_w).clamp(0.0, region_w as f32);
            let y = ((cy - h / 2.0) * scale_h).clamp(0.0, region_h as f32);
            let width = (w * scale_w).min(region_w as f32 - x);
            let height = (h * scale_h).min(region_h as f32 - y);

            candidates.push(Detection {
                bbox: BoundingBox::new(x, y, width, height),
                class_id: best_class,
                confidence: best_score,
            });
        }

        Ok(non_maximum_suppression(candidates, self.config.nms_threshold))
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let input = self.preprocess(image)?;
        let outputs = self.run_inference(input)?;
        self.postprocess(&outputs, image.width(), image.height())
    }
}

fn non_maximum_suppression(mut detections: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[i].class_id != detections[j].class_id {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) > nms_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn create_session(model_path: &Path) -> Result<Session> {
    let model_bytes = std::fs::read(model_path)
        .with_context(|| format!("failed to read model file {}", model_path.display()))?;

    Session::builder()
        .map_err(|err| anyhow!("failed to create session builder: {err}"))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|err| anyhow!("failed to set optimization level: {err}"))?
        .commit_from_memory(&model_bytes)
        .map_err(|err| anyhow!("failed to load ONNX model: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_id: usize, confidence: f32, x: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, 0.0, 50.0, 50.0),
            class_id,
            confidence,
        }
    }

    #[test]
    fn person_class_is_zero() {
        assert!(detection(0, 0.9, 0.0).is_person());
        assert!(!detection(56, 0.9, 0.0).is_person());
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(10.0, 10.0, 40.0, 40.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(50.0, 50.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_same_class() {
        let kept = non_maximum_suppression(
            vec![
                detection(0, 0.6, 0.0),
                detection(0, 0.9, 2.0),
                detection(0, 0.5, 200.0),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn nms_never_suppresses_across_classes() {
        let kept = non_maximum_suppression(
            vec![detection(0, 0.9, 0.0), detection(56, 0.8, 0.0)],
            0.45,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn null_detector_reports_nothing() {
        let image = RgbImage::new(100, 100);
        assert!(NullDetector.detect(&image).unwrap().is_empty());
    }
}
