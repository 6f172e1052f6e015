use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use workwatch::db::Database;
use workwatch::pipeline::{
    capture::FfmpegFrameSource,
    classify::{ActivityClassifier, NullClassifier, OnnxActivityClassifier},
    detect::{NullDetector, ObjectDetector, YoloDetector, YoloDetectorConfig},
    poller::{PollPolicy, WorkstationPoller},
    thumbnails::ThumbnailStore,
};
use workwatch::scheduler::{self, ActiveWindow, SchedulerConfig, SystemClock};
use workwatch::settings::SettingsStore;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::var("WORKWATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("workwatch.json"));
    let store = SettingsStore::new(config_path)?;
    let settings = store.settings();
    info!("starting workwatch, settings from {}", store.path().display());

    let db = Database::new(settings.database_path.clone())?;

    let frames = Arc::new(FfmpegFrameSource::new(Duration::from_secs(
        settings.schedule.capture_timeout_secs,
    ))?);

    // Models are loaded once and passed in by handle; a model that fails to
    // load degrades the pipeline instead of stopping the daemon.
    let detector: Arc<dyn ObjectDetector> =
        match YoloDetector::load(&settings.detection.model_path, YoloDetectorConfig::default()) {
            Ok(detector) => Arc::new(detector),
            Err(err) => {
                warn!("person detector unavailable, polls will record zero people: {err:#}");
                Arc::new(NullDetector)
            }
        };

    let classifier: Arc<dyn ActivityClassifier> =
        match settings.detection.classifier_model_path.as_deref() {
            Some(path) => match OnnxActivityClassifier::load(path) {
                Ok(classifier) => Arc::new(classifier),
                Err(err) => {
                    warn!("activity classifier unavailable, activities will be unknown: {err:#}");
                    Arc::new(NullClassifier)
                }
            },
            None => Arc::new(NullClassifier),
        };

    let poller = WorkstationPoller::new(
        db.clone(),
        frames,
        detector,
        classifier,
        ThumbnailStore::new(settings.thumbnails_dir.clone()),
        PollPolicy {
            person_confidence: settings.detection.person_confidence,
        },
    );

    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let config = SchedulerConfig {
        cycle_interval: Duration::from_secs(settings.schedule.cycle_interval_secs),
        window: ActiveWindow::new(
            settings.schedule.active_window_start,
            settings.schedule.active_window_end,
        ),
        absence_threshold: chrono::Duration::minutes(settings.absence_threshold_min),
    };

    scheduler::run(poller, db, Arc::new(SystemClock), config, cancel_token).await;

    info!("workwatch stopped");
    Ok(())
}
