use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::parse_datetime,
    models::Observation,
};

impl Database {
    /// Append one observation and return its row id. The thumbnail path is
    /// never set here; it is attached later, after the image write succeeds.
    pub async fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        let record = observation.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO observations
                    (workstation_id, captured_at, \"trigger\", people_count, conf, job_type, thumb_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                params![
                    record.workstation_id,
                    record.captured_at.to_rfc3339(),
                    record.trigger,
                    record.people_count,
                    record.conf,
                    record.job_type,
                ],
            )
            .with_context(|| "failed to insert observation")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn set_observation_thumb_path(
        &self,
        observation_id: i64,
        thumb_path: &str,
    ) -> Result<()> {
        let thumb_path = thumb_path.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE observations SET thumb_path = ?1 WHERE id = ?2",
                params![thumb_path, observation_id],
            )
            .with_context(|| "failed to set observation thumbnail path")?;
            Ok(())
        })
        .await
    }

    pub async fn get_observation(&self, observation_id: i64) -> Result<Option<Observation>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workstation_id, captured_at, \"trigger\", people_count, conf, job_type, thumb_path
                 FROM observations
                 WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![observation_id])?;
            if let Some(row) = rows.next()? {
                Ok(Some(observation_from_row(row)?))
            } else {
                Ok(None)
            }
        })
        .await
    }

    /// Most recent observations first, for external readers and diagnostics.
    pub async fn recent_observations(&self, limit: u32) -> Result<Vec<Observation>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workstation_id, captured_at, \"trigger\", people_count, conf, job_type, thumb_path
                 FROM observations
                 ORDER BY captured_at DESC, id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit as i64])?;
            let mut observations = Vec::new();
            while let Some(row) = rows.next()? {
                observations.push(observation_from_row(row)?);
            }

            Ok(observations)
        })
        .await
    }
}

fn observation_from_row(row: &rusqlite::Row<'_>) -> Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        workstation_id: row.get(1)?,
        captured_at: parse_datetime(&row.get::<_, String>(2)?, "captured_at")?,
        trigger: row.get(3)?,
        people_count: row.get(4)?,
        conf: row.get(5)?,
        job_type: row.get(6)?,
        thumb_path: row.get(7)?,
    })
}
