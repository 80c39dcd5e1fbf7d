use anyhow::{Context, Result};
use attendant_core::{CooldownTracker, DecisionConfig, DecisionEngine, FaceMatcher, FrameThrottle};
use attendant_hw::FrameSource;
use attendant_store::{AttendanceWriter, Database};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod sink;

use config::Config;
use engine::Monitor;
use sink::{LogSink, OverlaySink, SnapshotSink, TeeSink};

const ENGINE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "attendantd starting");

    let config = Config::load().context("failed to load configuration")?;
    let decision = config.decision_config().context("invalid decision settings")?;
    let detection_model = config.detection_model()?;
    let source_spec = config.source_spec()?;
    log_banner(&config, &decision);

    // Gallery first: nothing to monitor for means nothing to start.
    let db_path = config.db_path.clone();
    let gallery = tokio::task::spawn_blocking(move || Database::open(&db_path)?.load_gallery())
        .await?
        .with_context(|| format!("failed to load identity gallery from {}", config.db_path.display()))?;

    let writer = AttendanceWriter::open(&config.db_path, config.store_write_timeout())
        .await
        .context("failed to open attendance writer")?;

    let encoder = attendant_vision::load_encoder(detection_model, &config.model_dir)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))?;

    let source = attendant_hw::open_source(
        &source_spec,
        config.camera_width,
        config.camera_height,
        config.camera_read_timeout(),
    )
    .with_context(|| format!("failed to open camera source '{}'", config.camera_source))?;
    tracing::info!(source = %source.describe(), "camera opened");

    let matcher = FaceMatcher::new(Arc::new(gallery), decision.metric, decision.confidence_threshold);
    let cooldown = Arc::new(CooldownTracker::new(decision.cooldown));
    let engine = DecisionEngine::new(matcher, cooldown, writer.clone())
        .with_write_attempts(config.store_write_attempts);

    let sink: Box<dyn OverlaySink> = match &config.snapshot_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "writing overlay snapshots");
            Box::new(TeeSink(LogSink::default(), SnapshotSink::new(path.clone())))
        }
        None => Box::new(LogSink::default()),
    };

    let mut monitor = Monitor::new(
        source,
        encoder,
        engine,
        FrameThrottle::new(decision.process_every_n_frames),
        sink,
    );
    if config.log_recognitions {
        monitor = monitor.with_recognition_log(Box::new(writer.clone()));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = monitor.spawn(shutdown.clone())?;
    tracing::info!("attendantd ready");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("attendantd shutting down");
        }
        _ = wait_for_exit(&handle) => {
            tracing::warn!("engine thread exited on its own");
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    let stats = tokio::task::spawn_blocking(move || handle.join())
        .await?
        .context("monitoring loop failed")?;

    tracing::info!(
        frames = stats.frames_seen,
        processed = stats.frames_processed,
        skipped = stats.frames_skipped,
        faces = stats.faces,
        marked = stats.marked,
        "attendantd stopped"
    );
    Ok(())
}

async fn wait_for_exit(handle: &engine::MonitorHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(ENGINE_POLL_INTERVAL).await;
    }
}

fn log_banner(config: &Config, decision: &DecisionConfig) {
    tracing::info!(
        camera = %config.camera_source,
        resolution = %format!("{}x{}", config.camera_width, config.camera_height),
        detection_model = %config.detection_model,
        metric = ?decision.metric,
        stride = decision.process_every_n_frames.get(),
        cooldown_secs = decision.cooldown.num_seconds(),
        threshold = decision.confidence_threshold,
        write_timeout_ms = config.store_write_timeout_ms,
        write_attempts = config.store_write_attempts,
        log_recognitions = config.log_recognitions,
        db = %config.db_path.display(),
        "effective configuration"
    );
}
