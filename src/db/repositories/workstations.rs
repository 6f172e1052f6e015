use anyhow::Result;
use rusqlite::params;

use crate::db::{connection::Database, models::Workstation};

impl Database {
    /// Enabled workstations belonging to one camera, in id order.
    pub async fn list_enabled_workstations(&self, camera_id: i64) -> Result<Vec<Workstation>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, camera_id, name, x, y, w, h, roi_polygon, enabled
                 FROM workstations
                 WHERE camera_id = ?1 AND enabled = 1
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query(params![camera_id])?;
            let mut workstations = Vec::new();
            while let Some(row) = rows.next()? {
                workstations.push(Workstation {
                    id: row.get(0)?,
                    camera_id: row.get(1)?,
                    name: row.get(2)?,
                    x: row.get(3)?,
                    y: row.get(4)?,
                    w: row.get(5)?,
                    h: row.get(6)?,
                    roi_polygon: row.get(7)?,
                    enabled: row.get::<_, i64>(8)? != 0,
                });
            }

            Ok(workstations)
        })
        .await
    }
}
