//! Per-cycle orchestration: capture → extract → detect → classify →
//! persist, one workstation at a time.
//!
//! Every capability (frame source, detector, classifier) is handed in by
//! reference once at construction, so tests substitute stubs and the
//! production wiring decides what degrades to what. A workstation's failure
//! never leaks past its own poll.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::RgbImage;
use log::{error, info, warn};
use tokio::time::Instant;

use crate::db::{Camera, Database, Observation, Workstation};
use crate::presence;

use super::annotate::annotate_detections;
use super::capture::FrameSource;
use super::classify::{aggregate_frame_job, ActivityClassifier, Classification};
use super::detect::{Detection, ObjectDetector};
use super::error::PollError;
use super::geometry::RegionGeometry;
use super::region::{clip_rect, extract_region};
use super::thumbnails::ThumbnailStore;

/// Tag recorded on observations produced by the scheduled sweep.
pub const TRIGGER_HEARTBEAT: &str = "heartbeat";

#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Person detections at or above this confidence are counted and
    /// classified. Weaker ones still feed the max-confidence track.
    pub person_confidence: f32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            person_confidence: 0.5,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub cameras_seen: usize,
    pub workstations_polled: usize,
    pub observations_written: usize,
    pub failures: usize,
}

/// Person detections distilled for one frame.
#[derive(Debug, Clone)]
pub struct PeopleSummary {
    /// Detections at or above the counting threshold, in input order.
    pub counted: Vec<Detection>,
    /// Highest confidence over every person detection, counted or not.
    pub max_confidence: f32,
}

/// Distill raw detections: non-person classes are discarded outright;
/// person detections below the threshold raise `max_confidence` but are
/// not counted.
pub fn summarize_people(detections: &[Detection], threshold: f32) -> PeopleSummary {
    let mut counted = Vec::new();
    let mut max_confidence = 0.0f32;

    for det in detections.iter().filter(|d| d.is_person()) {
        max_confidence = max_confidence.max(det.confidence);
        if det.confidence >= threshold {
            counted.push(det.clone());
        }
    }

    PeopleSummary {
        counted,
        max_confidence,
    }
}

pub struct WorkstationPoller {
    db: Database,
    frames: Arc<dyn FrameSource>,
    detector: Arc<dyn ObjectDetector>,
    classifier: Arc<dyn ActivityClassifier>,
    thumbnails: ThumbnailStore,
    policy: PollPolicy,
}

impl WorkstationPoller {
    pub fn new(
        db: Database,
        frames: Arc<dyn FrameSource>,
        detector: Arc<dyn ObjectDetector>,
        classifier: Arc<dyn ActivityClassifier>,
        thumbnails: ThumbnailStore,
        policy: PollPolicy,
    ) -> Self {
        Self {
            db,
            frames,
            detector,
            classifier,
            thumbnails,
            policy,
        }
    }

    /// One full pass over all enabled cameras and workstations. Only a
    /// configuration read failure aborts the pass; per-workstation trouble
    /// is logged and the pass moves on.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleStats> {
        let cycle_start = Instant::now();

        let cameras = self
            .db
            .list_enabled_cameras()
            .await
            .context("failed to load camera configuration")?;

        let mut stats = CycleStats {
            cameras_seen: cameras.len(),
            ..CycleStats::default()
        };

        for camera in &cameras {
            let workstations = match self.db.list_enabled_workstations(camera.id).await {
                Ok(list) => list,
                Err(err) => {
                    error!(
                        "failed to load workstations for camera {}: {err:#}",
                        camera.name
                    );
                    stats.failures += 1;
                    continue;
                }
            };

            for ws in &workstations {
                stats.workstations_polled += 1;
                match self.poll_workstation(camera, ws, now).await {
                    Ok(()) => stats.observations_written += 1,
                    Err(PollError::Acquisition(err)) => {
                        stats.failures += 1;
                        warn!("skipping workstation {} this cycle: {err:#}", ws.name);
                    }
                    Err(PollError::Persistence(err)) => {
                        stats.failures += 1;
                        error!("lost observation for workstation {}: {err:#}", ws.name);
                    }
                }
            }
        }

        info!(
            "cycle complete in {}ms: {} cameras, {} workstations, {} observations, {} failures",
            cycle_start.elapsed().as_millis(),
            stats.cameras_seen,
            stats.workstations_polled,
            stats.observations_written,
            stats.failures
        );

        Ok(stats)
    }

    async fn poll_workstation(
        &self,
        camera: &Camera,
        ws: &Workstation,
        now: DateTime<Utc>,
    ) -> Result<(), PollError> {
        let poll_start = Instant::now();

        // One hard capture attempt; retry is simply the next cycle.
        let frame = self
            .frames
            .capture_frame(&camera.stream_url)
            .await
            .map_err(PollError::Acquisition)?;

        // Extraction never fails; worst case is an empty crop.
        let geometry = RegionGeometry::for_workstation(ws);
        let region = extract_region(&frame, &geometry);

        let detections = if region.is_empty() {
            Vec::new()
        } else {
            let detector = Arc::clone(&self.detector);
            let image = region.image.clone();
            match tokio::task::spawn_blocking(move || detector.detect(&image)).await {
                Ok(Ok(detections)) => detections,
                Ok(Err(err)) => {
                    warn!("detector failed for workstation {}: {err:#}", ws.name);
                    Vec::new()
                }
                Err(err) => {
                    warn!("detector worker join failed: {err}");
                    Vec::new()
                }
            }
        };

        let people = summarize_people(&detections, self.policy.person_confidence);

        // Second model only for counted detections; skipped entirely when
        // nothing was found.
        let mut classifications = Vec::with_capacity(people.counted.len());
        for det in &people.counted {
            let classification = match crop_detection(&region.image, det) {
                Some(crop) => {
                    let classifier = Arc::clone(&self.classifier);
                    match tokio::task::spawn_blocking(move || classifier.classify(&crop)).await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!("classifier worker join failed: {err}");
                            Classification::Unavailable
                        }
                    }
                }
                None => Classification::Unavailable,
            };
            classifications.push(classification);
        }
        let job = aggregate_frame_job(&classifications);

        // Numbers first. The thumbnail is attached afterwards, so the row
        // exists before any image write and never points at a file that
        // failed to land.
        let observation = Observation {
            id: None,
            workstation_id: ws.id,
            captured_at: now,
            trigger: TRIGGER_HEARTBEAT.to_string(),
            people_count: people.counted.len() as i64,
            conf: (people.max_confidence * 100.0).round() as i64,
            job_type: job.code(),
            thumb_path: None,
        };
        let observation_id = self
            .db
            .insert_observation(&observation)
            .await
            .map_err(PollError::Persistence)?;

        if !region.is_empty() {
            let mut annotated = region.image.clone();
            annotate_detections(&mut annotated, &people.counted);
            match self.thumbnails.save(now, ws.id, observation_id, &annotated) {
                Ok(relative) => {
                    if let Err(err) = self
                        .db
                        .set_observation_thumb_path(observation_id, &relative)
                        .await
                    {
                        warn!(
                            "failed to record thumbnail path for observation {observation_id}: {err:#}"
                        );
                    }
                }
                Err(err) => {
                    warn!("failed to write thumbnail for observation {observation_id}: {err:#}");
                }
            }
        }

        // The aggregator consumes the same observation stream.
        if let Err(err) = presence::record_observation(&self.db, &observation).await {
            warn!("failed to update presence for workstation {}: {err:#}", ws.name);
        }

        info!(
            "polled workstation {} in {}ms: people={}, conf={}, job={}",
            ws.name,
            poll_start.elapsed().as_millis(),
            observation.people_count,
            observation.conf,
            job.as_str()
        );

        Ok(())
    }
}

/// Clip a detection box to the region and cut the person crop for the
/// classifier. `None` when the clipped box has no area.
fn crop_detection(region: &RgbImage, det: &Detection) -> Option<RgbImage> {
    let (x, y, w, h) = clip_rect(
        region.width(),
        region.height(),
        det.bbox.x.round() as i32,
        det.bbox.y.round() as i32,
        det.bbox.width.round() as i32,
        det.bbox.height.round() as i32,
    )?;
    Some(image::imageops::crop_imm(region, x, y, w, h).to_image())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use image::Rgb;

    use super::*;
    use crate::db::testkit::{seed_camera, seed_workstation};
    use crate::pipeline::classify::JobKind;
    use crate::pipeline::detect::BoundingBox;

    fn person(confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, y, w, h),
            class_id: 0,
            confidence,
        }
    }

    fn chair(confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(0.0, 0.0, 20.0, 20.0),
            class_id: 56,
            confidence,
        }
    }

    #[test]
    fn summary_counts_only_above_threshold_people() {
        let summary = summarize_people(
            &[person(0.9, 10.0, 10.0, 50.0, 50.0), person(0.3, 0.0, 0.0, 10.0, 10.0)],
            0.5,
        );
        assert_eq!(summary.counted.len(), 1);
        assert!((summary.max_confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn sub_threshold_person_still_raises_max_confidence() {
        let summary = summarize_people(&[person(0.4, 0.0, 0.0, 10.0, 10.0)], 0.5);
        assert!(summary.counted.is_empty());
        assert!((summary.max_confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn non_person_classes_are_discarded_entirely() {
        let summary = summarize_people(
            &[chair(0.95), person(0.3, 0.0, 0.0, 10.0, 10.0)],
            0.5,
        );
        assert!(summary.counted.is_empty());
        assert!((summary.max_confidence - 0.3).abs() < 1e-6);
    }

    struct StubFrames {
        frames: HashMap<String, RgbImage>,
    }

    impl StubFrames {
        fn single(url: &str, frame: RgbImage) -> Self {
            let mut frames = HashMap::new();
            frames.insert(url.to_string(), frame);
            Self { frames }
        }
    }

    #[async_trait]
    impl FrameSource for StubFrames {
        async fn capture_frame(&self, stream_url: &str) -> Result<RgbImage> {
            match self.frames.get(stream_url) {
                Some(frame) => Ok(frame.clone()),
                None => bail!("stream {stream_url} produced no frame"),
            }
        }
    }

    struct StubDetector {
        detections: Vec<Detection>,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl StubDetector {
        fn returning(detections: Vec<Detection>) -> Self {
            Self {
                detections,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ObjectDetector for StubDetector {
        fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
            self.seen.lock().unwrap().push(image.dimensions());
            Ok(self.detections.clone())
        }
    }

    struct StubClassifier {
        result: Classification,
        calls: Mutex<usize>,
    }

    impl StubClassifier {
        fn recognizing(kind: JobKind) -> Self {
            Self {
                result: Classification::Recognized {
                    kind,
                    confidence: 0.95,
                },
                calls: Mutex::new(0),
            }
        }
    }

    impl ActivityClassifier for StubClassifier {
        fn classify(&self, _crop: &RgbImage) -> Classification {
            *self.calls.lock().unwrap() += 1;
            self.result.clone()
        }
    }

    struct Fixture {
        db: Database,
        _db_dir: tempfile::TempDir,
        thumbs_dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let db_dir = tempfile::tempdir().unwrap();
            let db = Database::new(db_dir.path().join("test.sqlite3")).unwrap();
            Self {
                db,
                _db_dir: db_dir,
                thumbs_dir: tempfile::tempdir().unwrap(),
            }
        }

        fn poller(
            &self,
            frames: Arc<dyn FrameSource>,
            detector: Arc<dyn ObjectDetector>,
            classifier: Arc<dyn ActivityClassifier>,
        ) -> WorkstationPoller {
            WorkstationPoller::new(
                self.db.clone(),
                frames,
                detector,
                classifier,
                ThumbnailStore::new(self.thumbs_dir.path().to_path_buf()),
                PollPolicy::default(),
            )
        }
    }

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn detected_person_produces_full_observation_and_thumbnail() {
        let fixture = Fixture::new();
        let cam = seed_camera(&fixture.db, "floor-1", "rtsp://cam-1").await.unwrap();
        let ws = seed_workstation(&fixture.db, cam, "desk-1", (0, 0, 100, 100), None)
            .await
            .unwrap();

        let detector = Arc::new(StubDetector::returning(vec![person(
            0.9, 10.0, 10.0, 50.0, 50.0,
        )]));
        let classifier = Arc::new(StubClassifier::recognizing(JobKind::Working));
        let poller = fixture.poller(
            Arc::new(StubFrames::single("rtsp://cam-1", RgbImage::new(200, 200))),
            detector.clone(),
            classifier.clone(),
        );

        let stats = poller.run_cycle(test_now()).await.unwrap();
        assert_eq!(stats.observations_written, 1);
        assert_eq!(stats.failures, 0);

        // The detector analyzed the 100x100 rectangle crop, not the frame.
        assert_eq!(detector.seen.lock().unwrap().as_slice(), &[(100, 100)]);
        // One counted person, one classification.
        assert_eq!(*classifier.calls.lock().unwrap(), 1);

        let observations = fixture.db.recent_observations(10).await.unwrap();
        assert_eq!(observations.len(), 1);
        let obs = &observations[0];
        assert_eq!(obs.people_count, 1);
        assert_eq!(obs.conf, 90);
        assert_eq!(obs.job_type, JobKind::Working.code());
        assert_eq!(obs.trigger, TRIGGER_HEARTBEAT);

        let obs_id = obs.id.unwrap();
        let expected_path = format!("07Aug2026/{ws}_{obs_id}.jpg");
        assert_eq!(obs.thumb_path.as_deref(), Some(expected_path.as_str()));
        assert!(fixture.thumbs_dir.path().join(&expected_path).is_file());

        // The presence aggregator saw the same stream.
        let state = fixture.db.get_presence(ws).await.unwrap().unwrap();
        assert!(state.is_present);
        assert_eq!(state.last_seen, Some(test_now()));
    }

    #[tokio::test]
    async fn failed_capture_writes_no_observation() {
        let fixture = Fixture::new();
        let cam = seed_camera(&fixture.db, "floor-1", "rtsp://cam-down").await.unwrap();
        seed_workstation(&fixture.db, cam, "desk-1", (0, 0, 100, 100), None)
            .await
            .unwrap();

        let poller = fixture.poller(
            Arc::new(StubFrames {
                frames: HashMap::new(),
            }),
            Arc::new(StubDetector::returning(Vec::new())),
            Arc::new(StubClassifier::recognizing(JobKind::Working)),
        );

        let stats = poller.run_cycle(test_now()).await.unwrap();
        assert_eq!(stats.workstations_polled, 1);
        assert_eq!(stats.observations_written, 0);
        assert_eq!(stats.failures, 1);
        assert!(fixture.db.recent_observations(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn triangle_polygon_yields_bounding_box_region_and_empty_observation() {
        let fixture = Fixture::new();
        let cam = seed_camera(&fixture.db, "floor-1", "rtsp://cam-1").await.unwrap();
        seed_workstation(
            &fixture.db,
            cam,
            "desk-1",
            (0, 0, 100, 100),
            Some("[[0,0],[50,0],[25,50]]"),
        )
        .await
        .unwrap();

        let detector = Arc::new(StubDetector::returning(Vec::new()));
        let classifier = Arc::new(StubClassifier::recognizing(JobKind::Working));
        let poller = fixture.poller(
            Arc::new(StubFrames::single("rtsp://cam-1", RgbImage::new(100, 100))),
            detector.clone(),
            classifier.clone(),
        );

        poller.run_cycle(test_now()).await.unwrap();

        assert_eq!(detector.seen.lock().unwrap().as_slice(), &[(50, 50)]);
        assert_eq!(*classifier.calls.lock().unwrap(), 0);

        let observations = fixture.db.recent_observations(10).await.unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].people_count, 0);
        assert_eq!(observations[0].conf, 0);
        assert_eq!(observations[0].job_type, JobKind::Absent.code());
    }

    #[tokio::test]
    async fn sub_threshold_detection_raises_conf_without_counting() {
        let fixture = Fixture::new();
        let cam = seed_camera(&fixture.db, "floor-1", "rtsp://cam-1").await.unwrap();
        seed_workstation(&fixture.db, cam, "desk-1", (0, 0, 100, 100), None)
            .await
            .unwrap();

        let classifier = Arc::new(StubClassifier::recognizing(JobKind::Working));
        let poller = fixture.poller(
            Arc::new(StubFrames::single("rtsp://cam-1", RgbImage::new(200, 200))),
            Arc::new(StubDetector::returning(vec![person(
                0.4, 0.0, 0.0, 30.0, 30.0,
            )])),
            classifier.clone(),
        );

        poller.run_cycle(test_now()).await.unwrap();

        let observations = fixture.db.recent_observations(10).await.unwrap();
        assert_eq!(observations[0].people_count, 0);
        assert_eq!(observations[0].conf, 40);
        assert_eq!(observations[0].job_type, JobKind::Absent.code());
        assert_eq!(*classifier.calls.lock().unwrap(), 0);
        // No positive observation, no presence row.
        let presence = fixture.db.list_presence().await.unwrap();
        assert!(presence.is_empty());
    }

    #[tokio::test]
    async fn one_camera_failing_does_not_block_the_others() {
        let fixture = Fixture::new();
        let cam_down = seed_camera(&fixture.db, "floor-1", "rtsp://cam-down")
            .await
            .unwrap();
        let cam_up = seed_camera(&fixture.db, "floor-2", "rtsp://cam-up").await.unwrap();
        seed_workstation(&fixture.db, cam_down, "desk-1", (0, 0, 50, 50), None)
            .await
            .unwrap();
        let ws_up = seed_workstation(&fixture.db, cam_up, "desk-2", (0, 0, 50, 50), None)
            .await
            .unwrap();

        let poller = fixture.poller(
            Arc::new(StubFrames::single(
                "rtsp://cam-up",
                RgbImage::from_pixel(100, 100, Rgb([5, 5, 5])),
            )),
            Arc::new(StubDetector::returning(vec![person(
                0.8, 5.0, 5.0, 20.0, 20.0,
            )])),
            Arc::new(StubClassifier::recognizing(JobKind::OnPhone)),
        );

        let stats = poller.run_cycle(test_now()).await.unwrap();
        assert_eq!(stats.workstations_polled, 2);
        assert_eq!(stats.observations_written, 1);
        assert_eq!(stats.failures, 1);

        let observations = fixture.db.recent_observations(10).await.unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].workstation_id, ws_up);
        assert_eq!(observations[0].job_type, JobKind::OnPhone.code());
    }
}
