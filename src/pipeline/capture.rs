//! Frame acquisition.
//!
//! One poll takes exactly one frame: open the stream, grab a frame, release
//! the stream. Nothing is held between cycles, and a failed grab is simply
//! skipped until the next cycle's fresh attempt.

use std::{path::PathBuf, process::Stdio, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use tokio::process::Command;

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Grab a single decoded frame from the stream address.
    async fn capture_frame(&self, stream_url: &str) -> Result<RgbImage>;
}

/// Grabs one frame by shelling out to ffmpeg, which handles RTSP/H.264 for
/// every camera family we care about. The child is killed if the grab
/// overruns the timeout.
pub struct FfmpegFrameSource {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegFrameSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let binary = which::which("ffmpeg").context("ffmpeg binary not found on PATH")?;
        Ok(Self { binary, timeout })
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn capture_frame(&self, stream_url: &str) -> Result<RgbImage> {
        let mut cmd = Command::new(&self.binary);
        if stream_url.starts_with("rtsp://") {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        cmd.args([
            "-i",
            stream_url,
            "-frames:v",
            "1",
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("frame grab timed out after {:?}", self.timeout))?
            .context("failed to run ffmpeg")?;

        if !output.status.success() {
            bail!("ffmpeg exited with {} for {stream_url}", output.status);
        }
        if output.stdout.is_empty() {
            bail!("stream {stream_url} produced no frame");
        }

        let frame = image::load_from_memory(&output.stdout)
            .context("failed to decode captured frame")?;
        Ok(frame.to_rgb8())
    }
}
