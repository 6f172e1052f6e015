use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted record of a single poll of one workstation.
///
/// `conf` is on a 0–100 scale and tracks the highest person-detection
/// confidence seen in the frame, including detections below the counting
/// threshold. `thumb_path` is relative to the thumbnails root and is only
/// set once the image write has succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Option<i64>,
    pub workstation_id: i64,
    pub captured_at: DateTime<Utc>,
    pub trigger: String,
    pub people_count: i64,
    pub conf: i64,
    pub job_type: i64,
    pub thumb_path: Option<String>,
}
