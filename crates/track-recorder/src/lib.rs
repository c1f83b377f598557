//! Track Recorder - headless driver for the map facade's GPS tracking
//!
//! Replays recorded positions through a [`MapContextFacade`] tracking session, queues
//! the finished track as an offline draft and writes the requested exports.

pub mod logging;
pub mod replay;
pub mod settings;
pub mod storage;

pub use settings::Settings;

use map_facade_lib::services::{StaticEntitlements, SyncReport};
use map_facade_lib::{
    ExportFormat, FacadeDependencies, ManualGeolocation, MapContextFacade, MapError, TrackedRoute,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{FileDraftStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error(transparent)]
    Map(#[from] MapError),

    #[error("Draft storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("GPX parse error: {0}")]
    Gpx(#[from] gpx::errors::GpxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No samples found in {0}")]
    NoSamples(String),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

/// What one run produced
#[derive(Debug)]
pub struct RecordingSummary {
    pub track: TrackedRoute,
    /// Events that reached the watch
    pub delivered: usize,
    pub exported: Vec<PathBuf>,
    pub synced: Option<SyncReport>,
}

/// Record the samples named by `settings` and write the exports
pub async fn run(settings: &Settings) -> Result<RecordingSummary> {
    let config = settings.facade_config()?;
    let events = replay::load_samples(&settings.samples)?;
    let drafts = Arc::new(FileDraftStore::open(settings.drafts.clone())?);
    let geolocation = Arc::new(ManualGeolocation::new());

    let deps = FacadeDependencies::default()
        .with_entitlements(Arc::new(StaticEntitlements::new(!settings.free_tier)))
        .with_drafts(drafts)
        .with_geolocation(geolocation.clone());
    let mut facade = MapContextFacade::new(deps, config);

    facade.start_tracking()?;
    let delivered = replay::replay(
        &geolocation,
        events,
        Duration::from_millis(settings.interval_ms),
    )
    .await;
    if let Some(stats) = facade.tracking_stats() {
        tracing::info!(
            delivered,
            points = stats.points,
            distance = stats.distance,
            "replay finished"
        );
    }
    let track = facade.stop_tracking().await?;

    std::fs::create_dir_all(&settings.output_dir)?;
    let mut written: Vec<ExportFormat> = Vec::new();
    let mut exported = Vec::new();
    for &format in &settings.format {
        if written.contains(&format) {
            continue;
        }
        let payload = facade.export_track(&track, format)?;
        let path = settings.output_dir.join(&payload.file_name);
        tokio::fs::write(&path, &payload.bytes).await?;
        tracing::info!(path = %path.display(), mime = payload.mime_type, "track written");
        written.push(format);
        exported.push(path);
    }

    let synced = if settings.sync {
        Some(facade.sync_all_offline_content().await?)
    } else {
        None
    };
    facade.shutdown();

    Ok(RecordingSummary {
        track,
        delivered,
        exported,
        synced,
    })
}
