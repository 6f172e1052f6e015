use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime},
    models::PresenceState,
};

impl Database {
    /// Record a positive sighting. Creates the row on first sight; otherwise
    /// marks the workstation present and advances `last_seen` monotonically,
    /// so replaying an old observation never moves the state backwards.
    /// The whole read-modify-write runs as one task on the DB thread.
    pub async fn upsert_presence_seen(
        &self,
        workstation_id: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        self.execute(move |conn| {
            let existing: Option<Option<String>> = {
                let mut stmt = conn.prepare(
                    "SELECT last_seen FROM presence_state WHERE workstation_id = ?1",
                )?;
                let mut rows = stmt.query(params![workstation_id])?;
                match rows.next()? {
                    Some(row) => Some(row.get(0)?),
                    None => None,
                }
            };

            match existing {
                None => {
                    conn.execute(
                        "INSERT INTO presence_state (workstation_id, is_present, last_seen)
                         VALUES (?1, 1, ?2)",
                        params![workstation_id, seen_at.to_rfc3339()],
                    )?;
                }
                Some(last_seen_raw) => {
                    let last_seen = match last_seen_raw {
                        Some(raw) => Some(parse_datetime(&raw, "last_seen")?),
                        None => None,
                    };
                    let advanced = match last_seen {
                        Some(prev) if prev >= seen_at => prev,
                        _ => seen_at,
                    };
                    conn.execute(
                        "UPDATE presence_state
                         SET is_present = 1, last_seen = ?1
                         WHERE workstation_id = ?2",
                        params![advanced.to_rfc3339(), workstation_id],
                    )?;
                }
            }

            Ok(())
        })
        .await
    }

    /// Flip workstations to absent once their last sighting is strictly
    /// older than the cutoff. Returns how many rows changed.
    pub async fn sweep_absent(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let stale: Vec<i64> = {
                let mut stmt = conn.prepare(
                    "SELECT workstation_id, last_seen
                     FROM presence_state
                     WHERE is_present = 1 AND last_seen IS NOT NULL",
                )?;
                let mut rows = stmt.query([])?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    let workstation_id: i64 = row.get(0)?;
                    let last_seen = parse_datetime(&row.get::<_, String>(1)?, "last_seen")?;
                    if last_seen < cutoff {
                        ids.push(workstation_id);
                    }
                }
                ids
            };

            for workstation_id in &stale {
                conn.execute(
                    "UPDATE presence_state SET is_present = 0 WHERE workstation_id = ?1",
                    params![workstation_id],
                )?;
            }

            Ok(stale.len())
        })
        .await
    }

    pub async fn get_presence(&self, workstation_id: i64) -> Result<Option<PresenceState>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workstation_id, is_present, last_seen
                 FROM presence_state
                 WHERE workstation_id = ?1",
            )?;

            let mut rows = stmt.query(params![workstation_id])?;
            if let Some(row) = rows.next()? {
                Ok(Some(presence_from_row(row)?))
            } else {
                Ok(None)
            }
        })
        .await
    }

    /// Presence snapshot across all tracked workstations.
    pub async fn list_presence(&self) -> Result<Vec<PresenceState>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workstation_id, is_present, last_seen
                 FROM presence_state
                 ORDER BY workstation_id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut states = Vec::new();
            while let Some(row) = rows.next()? {
                states.push(presence_from_row(row)?);
            }

            Ok(states)
        })
        .await
    }
}

fn presence_from_row(row: &rusqlite::Row<'_>) -> Result<PresenceState> {
    Ok(PresenceState {
        id: row.get(0)?,
        workstation_id: row.get(1)?,
        is_present: row.get::<_, i64>(2)? != 0,
        last_seen: parse_optional_datetime(row.get(3)?, "last_seen")?,
    })
}
