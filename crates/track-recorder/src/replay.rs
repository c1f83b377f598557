//! Loading recorded positions and feeding them to a watch

use crate::{RecorderError, Result};
use map_facade_lib::{ManualGeolocation, PositionEvent};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// One line of a JSON sample file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum SampleRecord {
    Fix {
        lat: f64,
        lon: f64,
        #[serde(default)]
        accuracy: Option<f64>,
    },
    Error {
        error: String,
    },
}

impl From<SampleRecord> for PositionEvent {
    fn from(record: SampleRecord) -> Self {
        match record {
            SampleRecord::Fix { lat, lon, accuracy } => PositionEvent::Sample { lat, lon, accuracy },
            SampleRecord::Error { error } => PositionEvent::Error(error),
        }
    }
}

/// Meters of horizontal error per unit of HDOP, for GPX fixes without a direct estimate
const HDOP_TO_METERS: f64 = 5.0;

/// Read position events from a GPX or JSON file
pub fn load_samples(path: &Path) -> Result<Vec<PositionEvent>> {
    let is_gpx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gpx"));
    let events = if is_gpx {
        let file = std::fs::File::open(path)?;
        gpx_samples(&gpx::read(std::io::BufReader::new(file))?)
    } else {
        json_samples(&std::fs::read_to_string(path)?)?
    };
    if events.is_empty() {
        return Err(RecorderError::NoSamples(path.display().to_string()));
    }
    tracing::info!(path = %path.display(), count = events.len(), "samples loaded");
    Ok(events)
}

/// Every track point of every segment, in file order
fn gpx_samples(gpx: &gpx::Gpx) -> Vec<PositionEvent> {
    gpx.tracks
        .iter()
        .flat_map(|t| &t.segments)
        .flat_map(|s| &s.points)
        .map(|wp| {
            let point = wp.point();
            PositionEvent::Sample {
                lat: point.y(),
                lon: point.x(),
                accuracy: wp.hdop.map(|hdop| hdop * HDOP_TO_METERS),
            }
        })
        .collect()
}

/// A JSON array of records, or one record per line
fn json_samples(text: &str) -> Result<Vec<PositionEvent>> {
    if text.trim_start().starts_with('[') {
        let records: Vec<SampleRecord> = serde_json::from_str(text)?;
        return Ok(records.into_iter().map(Into::into).collect());
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| Ok(serde_json::from_str::<SampleRecord>(line)?.into()))
        .collect()
}

/// Push `events` into the active watch, pausing `interval` between them
///
/// Returns how many events reached a watch.
pub async fn replay(geolocation: &ManualGeolocation, events: Vec<PositionEvent>, interval: Duration) -> usize {
    let mut delivered = 0;
    for event in events {
        #[cfg(feature = "profiling")]
        profiling::scope!("replay::emit");
        if geolocation.emit(event) {
            delivered += 1;
        } else {
            tracing::warn!("no active watch, stopping replay");
            break;
        }
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    delivered
}
