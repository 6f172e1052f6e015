//! Activity classification for detected people.
//!
//! Runs once per counted person detection, never once per frame. The
//! outcome is an explicit variant: callers see `Recognized` or
//! `Unavailable` and decide what an unknown activity means, instead of a
//! silently defaulted label.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use log::{info, warn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};

/// Activity categories, declared in ascending severity so the derived
/// ordering doubles as the aggregation ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobKind {
    /// No person in the frame.
    Absent,
    /// Person present, idle or unrecognized activity.
    Idle,
    OnPhone,
    Working,
}

impl JobKind {
    /// Stable code persisted on observations.
    pub fn code(self) -> i64 {
        match self {
            JobKind::Absent => 0,
            JobKind::Idle => 1,
            JobKind::OnPhone => 2,
            JobKind::Working => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Absent => "absent",
            JobKind::Idle => "idle",
            JobKind::OnPhone => "on_phone",
            JobKind::Working => "working",
        }
    }
}

/// Model output index → activity, in the classifier's export order.
const ACTIVITY_CLASSES: [JobKind; 3] = [JobKind::Working, JobKind::OnPhone, JobKind::Idle];

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Recognized { kind: JobKind, confidence: f32 },
    Unavailable,
}

/// Opaque classification capability: person crop in, activity out. Never
/// fails past the poll boundary; trouble surfaces as `Unavailable`.
pub trait ActivityClassifier: Send + Sync {
    fn classify(&self, crop: &RgbImage) -> Classification;
}

/// Substitute used when no classifier model is deployed.
pub struct NullClassifier;

impl ActivityClassifier for NullClassifier {
    fn classify(&self, _crop: &RgbImage) -> Classification {
        Classification::Unavailable
    }
}

/// Frame-level job code: the highest-ranked activity among all counted
/// detections. A person whose classification is unavailable still ranks as
/// `Idle` — someone is there, we just don't know what they're doing.
pub fn aggregate_frame_job(results: &[Classification]) -> JobKind {
    let mut job = JobKind::Absent;
    for result in results {
        let kind = match result {
            Classification::Recognized { kind, .. } => *kind,
            Classification::Unavailable => JobKind::Idle,
        };
        if kind > job {
            job = kind;
        }
    }
    job
}

/// ONNX image classifier over the activity categories.
pub struct OnnxActivityClassifier {
    session: Mutex<Session>,
    input_size: u32,
}

impl OnnxActivityClassifier {
    pub fn load(model_path: &Path) -> Result<Self> {
        let model_bytes = std::fs::read(model_path)
            .with_context(|| format!("failed to read model file {}", model_path.display()))?;

        let session = Session::builder()
            .map_err(|err| anyhow!("failed to create session builder: {err}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|err| anyhow!("failed to set optimization level: {err}"))?
            .commit_from_memory(&model_bytes)
            .map_err(|err| anyhow!("failed to load ONNX model: {err}"))?;

        info!(
            "activity classifier initialized from {}",
            model_path.display()
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size: 224,
        })
    }

    fn run(&self, crop: &RgbImage) -> Result<Classification> {
        let size = self.input_size;
        let resized = image::imageops::resize(
            crop,
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
        let input: Value = Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("classifier session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|err| anyhow!("classifier inference failed: {err}"))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| anyhow!("classifier output0 tensor missing"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|err| anyhow!("failed to extract classifier output: {err}"))?;
        let scores: Vec<f32> = tensor.1.iter().copied().collect();

        if scores.len() < ACTIVITY_CLASSES.len() {
            return Err(anyhow!(
                "classifier produced {} scores, expected at least {}",
                scores.len(),
                ACTIVITY_CLASSES.len()
            ));
        }

        let probabilities = softmax(&scores[..ACTIVITY_CLASSES.len()]);
        let (best_idx, best_prob) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or_else(|| anyhow!("classifier produced no scores"))?;

        Ok(Classification::Recognized {
            kind: ACTIVITY_CLASSES[best_idx],
            confidence: best_prob,
        })
    }
}

impl ActivityClassifier for OnnxActivityClassifier {
    fn classify(&self, crop: &RgbImage) -> Classification {
        if crop.width() == 0 || crop.height() == 0 {
            return Classification::Unavailable;
        }

        match self.run(crop) {
            Ok(classification) => classification,
            Err(err) => {
                warn!("activity classification failed: {err:#}");
                Classification::Unavailable
            }
        }
    }
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}
