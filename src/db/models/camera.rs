use serde::{Deserialize, Serialize};

/// A configured camera feed. Rows are owned by the external configuration
/// surface; the pipeline only ever reads enabled cameras at cycle start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: i64,
    pub name: String,
    pub stream_url: String,
    pub poll_interval_s: i64,
    pub enabled: bool,
}
