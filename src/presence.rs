//! Presence aggregation: a pure predicate over the observation history plus
//! the upsert/sweep plumbing that keeps `presence_state` current.
//!
//! A workstation is present iff its most recent positive observation is
//! within the absence threshold of "now". Feeding the same observation in
//! twice changes nothing, and observations arriving out of order can never
//! rewind `last_seen` (the repository advances it monotonically).

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::db::{Database, Observation};

/// Equality sits on the present side of the boundary: a sighting exactly
/// `absence_threshold` old still counts.
pub fn is_present(
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    absence_threshold: Duration,
) -> bool {
    match last_seen {
        Some(seen) => now - seen <= absence_threshold,
        None => false,
    }
}

/// Fold one observation into the presence state. Observations with no
/// people carry no presence signal; absence is only ever derived from the
/// sweep, not from a single empty frame.
pub async fn record_observation(db: &Database, observation: &Observation) -> Result<()> {
    if observation.people_count > 0 {
        db.upsert_presence_seen(observation.workstation_id, observation.captured_at)
            .await?;
    }
    Ok(())
}

/// Periodic decay check: flip workstations to absent once their last
/// sighting is strictly older than the threshold. Returns how many flipped.
pub async fn sweep(db: &Database, now: DateTime<Utc>, absence_threshold: Duration) -> Result<usize> {
    db.sweep_absent(now - absence_threshold).await
}
