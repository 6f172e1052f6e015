//! Date-partitioned thumbnail storage.
//!
//! The relative path format `<DDMonYYYY>/<workstation-id>_<observation-id>.jpg`
//! is load-bearing: external viewers build URLs from the path stored on the
//! observation row.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::RgbImage;

pub struct ThumbnailStore {
    root: PathBuf,
}

impl ThumbnailStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// UTC calendar-day partition token, e.g. `07Aug2026`.
    pub fn day_partition(at: DateTime<Utc>) -> String {
        at.format("%d%b%Y").to_string()
    }

    pub fn relative_path(at: DateTime<Utc>, workstation_id: i64, observation_id: i64) -> String {
        format!(
            "{}/{}_{}.jpg",
            Self::day_partition(at),
            workstation_id,
            observation_id
        )
    }

    /// Write the region image and return the relative path to record on the
    /// observation. The caller only attaches the path if this succeeds.
    pub fn save(
        &self,
        at: DateTime<Utc>,
        workstation_id: i64,
        observation_id: i64,
        image: &RgbImage,
    ) -> Result<String> {
        let relative = Self::relative_path(at, workstation_id, observation_id);
        let full = self.root.join(&relative);

        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create thumbnail directory {}", parent.display())
            })?;
        }

        image
            .save(&full)
            .with_context(|| format!("failed to write thumbnail {}", full.display()))?;

        Ok(relative)
    }
}
