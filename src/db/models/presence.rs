use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived occupancy state, at most one row per workstation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceState {
    pub id: Option<i64>,
    pub workstation_id: i64,
    pub is_present: bool,
    pub last_seen: Option<DateTime<Utc>>,
}
