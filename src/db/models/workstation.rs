use serde::{Deserialize, Serialize};

/// A workstation's region of interest within its camera's frame.
///
/// The rectangle (x, y, w, h) is always present. `roi_polygon` optionally
/// carries a finer outline in one of the accepted polygon encodings; when it
/// is missing or malformed the rectangle is used as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workstation {
    pub id: i64,
    pub camera_id: i64,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub roi_polygon: Option<String>,
    pub enabled: bool,
}
