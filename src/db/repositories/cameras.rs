use anyhow::Result;

use crate::db::{connection::Database, models::Camera};

impl Database {
    /// Enabled cameras in id order. Read once at the start of each cycle.
    pub async fn list_enabled_cameras(&self) -> Result<Vec<Camera>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, stream_url, poll_interval_s, enabled
                 FROM cameras
                 WHERE enabled = 1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut cameras = Vec::new();
            while let Some(row) = rows.next()? {
                cameras.push(Camera {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    stream_url: row.get(2)?,
                    poll_interval_s: row.get(3)?,
                    enabled: row.get::<_, i64>(4)? != 0,
                });
            }

            Ok(cameras)
        })
        .await
    }
}
