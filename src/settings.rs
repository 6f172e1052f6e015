use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

fn default_active_start() -> NaiveTime {
    NaiveTime::from_hms_opt(5, 30, 0).expect("valid constant time")
}

fn default_active_end() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).expect("valid constant time")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Path to the person-detection ONNX model.
    pub model_path: PathBuf,
    /// Path to the activity-classification ONNX model, if deployed.
    pub classifier_model_path: Option<PathBuf>,
    /// Detections at or above this confidence count as a found person.
    pub person_confidence: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            classifier_model_path: Some(PathBuf::from("models/activity.onnx")),
            person_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Seconds between polling cycles.
    pub cycle_interval_secs: u64,
    /// Hard cap on a single frame grab.
    pub capture_timeout_secs: u64,
    /// Local wall-clock window in which polling runs.
    pub active_window_start: NaiveTime,
    pub active_window_end: NaiveTime,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 10,
            capture_timeout_secs: 10,
            active_window_start: default_active_start(),
            active_window_end: default_active_end(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub thumbnails_dir: PathBuf,
    /// Minutes since the last positive observation before a workstation is
    /// considered vacant.
    pub absence_threshold_min: i64,
    pub detection: DetectionSettings,
    pub schedule: ScheduleSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("workwatch.sqlite3"),
            thumbnails_dir: PathBuf::from("./thumbs"),
            absence_threshold_min: 10,
            detection: DetectionSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> Settings {
        self.data.read().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: Settings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }
}
