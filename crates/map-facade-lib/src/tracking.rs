//! GPS track recording
//!
//! A [`TrackingSession`] owns exactly one platform position watch. Samples flow
//! through a [`TrackRecorder`] that drops inaccurate fixes and jitter around the
//! last accepted point; the session is finalized into a [`TrackedRoute`].

use crate::config::TrackingConfig;
use crate::coords::{self, GeoPoint};
use crate::route::{TrackPoint, TrackedRoute};
use crate::services::{Notification, NotificationLevel, Notifier, ServiceResult};
use crate::{MapError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Options handed to the platform when watching the position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
    pub maximum_age_ms: u64,
}

impl From<&TrackingConfig> for WatchOptions {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            timeout_ms: config.timeout_ms,
            maximum_age_ms: config.maximum_age_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PositionEvent {
    Sample {
        lat: f64,
        lon: f64,
        accuracy: Option<f64>,
    },
    Error(String),
}

pub type PositionCallback = Box<dyn Fn(PositionEvent) + Send + Sync>;

/// A running platform watch
pub trait PositionWatch: Send {
    /// Stop delivering positions
    fn clear(&mut self);
}

/// Platform positioning capability
pub trait Geolocation: Send + Sync {
    fn watch_position(
        &self,
        options: WatchOptions,
        callback: PositionCallback,
    ) -> ServiceResult<Box<dyn PositionWatch>>;
}

/// Sample filter and accumulator
#[derive(Clone, Debug, Default)]
pub struct TrackRecorder {
    config: TrackingConfig,
    points: Vec<TrackPoint>,
    /// Running sum of accepted legs in meters
    distance: f64,
    dropped: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackRecorder {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Feed one sample, returning whether it was accepted
    pub fn push(&mut self, lat: f64, lon: f64, accuracy: Option<f64>) -> bool {
        if accuracy.is_some_and(|a| a > self.config.max_accuracy_m) {
            self.dropped += 1;
            return false;
        }
        let position = GeoPoint::new(lat, lon);
        if let Some(last) = self.points.last() {
            let step = coords::haversine_distance(last.position(), position);
            if step < self.config.min_step_m {
                self.dropped += 1;
                return false;
            }
            self.distance += step;
        }
        self.points.push(TrackPoint::new(lat, lon, accuracy));
        true
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_points(self) -> Vec<TrackPoint> {
        self.points
    }
}

/// Handle to the platform watch of a session
///
/// Clones share the same watch; whichever clone cancels first releases it.
#[derive(Clone)]
pub struct TrackingSubscription {
    watch: Arc<Mutex<Option<Box<dyn PositionWatch>>>>,
    active: Arc<AtomicBool>,
}

impl TrackingSubscription {
    fn new() -> Self {
        Self {
            watch: Arc::new(Mutex::new(None)),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Release the platform watch; returns false if it was already released
    pub fn cancel(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(mut watch) = lock(&self.watch).take() {
            watch.clear();
        }
        tracing::debug!("position watch released");
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TrackingSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// One recording, from `start` until `finish`
pub struct TrackingSession {
    recorder: Arc<Mutex<TrackRecorder>>,
    subscription: TrackingSubscription,
    started_at: OffsetDateTime,
}

impl TrackingSession {
    /// Start watching the position
    ///
    /// Geolocation errors are forwarded to `notifier` and keep the session alive.
    pub fn start(
        geolocation: &dyn Geolocation,
        config: TrackingConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let recorder = Arc::new(Mutex::new(TrackRecorder::new(config)));
        let subscription = TrackingSubscription::new();

        let sink = recorder.clone();
        let active = subscription.active.clone();
        let callback: PositionCallback = Box::new(move |event| {
            if !active.load(Ordering::SeqCst) {
                return;
            }
            match event {
                PositionEvent::Sample { lat, lon, accuracy } => {
                    let accepted = lock(&sink).push(lat, lon, accuracy);
                    tracing::trace!(lat, lon, ?accuracy, accepted, "position sample");
                }
                PositionEvent::Error(message) => {
                    tracing::warn!(error = %message, "geolocation error");
                    notifier.notify(Notification::new(
                        NotificationLevel::Warning,
                        "GPS error",
                        message,
                    ));
                }
            }
        });

        let watch = geolocation
            .watch_position(WatchOptions::from(&config), callback)
            .map_err(|e| MapError::Capability(format!("geolocation: {e}")))?;
        *lock(&subscription.watch) = Some(watch);

        tracing::info!("tracking started");
        Ok(Self {
            recorder,
            subscription,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn subscription(&self) -> TrackingSubscription {
        self.subscription.clone()
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Accepted points so far
    pub fn points(&self) -> Vec<TrackPoint> {
        lock(&self.recorder).points().to_vec()
    }

    /// Accepted point count and distance in meters so far
    pub fn progress(&self) -> (usize, f64) {
        let recorder = lock(&self.recorder);
        (recorder.points().len(), recorder.distance())
    }

    /// Release the watch and compute the final statistics
    pub fn finish(self) -> TrackedRoute {
        self.subscription.cancel();
        let recorder = std::mem::take(&mut *lock(&self.recorder));
        let dropped = recorder.dropped();
        let route = TrackedRoute::from_points(
            uuid::Uuid::new_v4().to_string(),
            recorder.into_points(),
            self.started_at,
            OffsetDateTime::now_utc(),
        );
        tracing::info!(
            id = %route.id,
            points = route.points.len(),
            dropped,
            distance = route.distance,
            "tracking finished"
        );
        route
    }
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("started_at", &self.started_at)
            .field("progress", &self.progress())
            .finish()
    }
}

/// Geolocation driven by the caller
///
/// Keeps the callback of the current watch so samples can be pushed in, e.g. when
/// replaying a recorded track.
#[derive(Default)]
pub struct ManualGeolocation {
    callback: Arc<Mutex<Option<PositionCallback>>>,
    watches: AtomicBool,
}

struct ManualWatch(Arc<Mutex<Option<PositionCallback>>>);

impl PositionWatch for ManualWatch {
    fn clear(&mut self) {
        lock(&self.0).take();
    }
}

impl ManualGeolocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the current watch, returning false without one
    pub fn emit(&self, event: PositionEvent) -> bool {
        match lock(&self.callback).as_ref() {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    pub fn sample(&self, lat: f64, lon: f64, accuracy: Option<f64>) -> bool {
        self.emit(PositionEvent::Sample { lat, lon, accuracy })
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// Whether a watch was ever started
    pub fn was_watched(&self) -> bool {
        self.watches.load(Ordering::SeqCst)
    }
}

impl Geolocation for ManualGeolocation {
    fn watch_position(
        &self,
        _options: WatchOptions,
        callback: PositionCallback,
    ) -> ServiceResult<Box<dyn PositionWatch>> {
        *lock(&self.callback) = Some(callback);
        self.watches.store(true, Ordering::SeqCst);
        Ok(Box::new(ManualWatch(self.callback.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RecordingNotifier;
    use std::sync::atomic::AtomicUsize;

    struct CountingWatch(Arc<AtomicUsize>);

    impl PositionWatch for CountingWatch {
        fn clear(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingGeolocation(Arc<AtomicUsize>);

    impl Geolocation for CountingGeolocation {
        fn watch_position(
            &self,
            _options: WatchOptions,
            _callback: PositionCallback,
        ) -> ServiceResult<Box<dyn PositionWatch>> {
            Ok(Box::new(CountingWatch(self.0.clone())))
        }
    }

    #[test]
    fn test_recorder_filters() {
        let mut recorder = TrackRecorder::new(TrackingConfig::default());
        assert!(recorder.push(55.70, 37.60, Some(10.0)));
        // too inaccurate
        assert!(!recorder.push(55.71, 37.61, Some(50.1)));
        // exactly at the limit is kept
        assert!(recorder.push(55.71, 37.61, Some(50.0)));
        // jitter around the last point
        assert!(!recorder.push(55.71, 37.61001, None));
        assert_eq!(recorder.points().len(), 2);
        assert_eq!(recorder.dropped(), 2);
    }

    #[test]
    fn test_recording_scenario() {
        let geolocation = ManualGeolocation::new();
        let session = TrackingSession::start(
            &geolocation,
            TrackingConfig::default(),
            Arc::new(RecordingNotifier::default()),
        )
        .unwrap();

        geolocation.sample(55.70, 37.60, Some(10.0));
        geolocation.sample(55.70, 37.6002, Some(10.0));
        // about 3 m past the last accepted point
        geolocation.sample(55.70, 37.60025, Some(10.0));

        let (count, distance) = session.progress();
        assert_eq!(count, 2);
        assert!((distance - 12.5).abs() < 0.5, "distance was {distance}");

        let route = session.finish();
        assert_eq!(route.points.len(), 2);
        assert!((route.distance - distance).abs() < 1e-9);
        assert_eq!(route.mean_accuracy, 10.0);
        assert!(!geolocation.is_watching());
        assert!(!geolocation.sample(55.0, 37.0, None));
    }

    #[test]
    fn test_errors_are_notified_and_not_fatal() {
        let geolocation = ManualGeolocation::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let session =
            TrackingSession::start(&geolocation, TrackingConfig::default(), notifier.clone())
                .unwrap();
        geolocation.emit(PositionEvent::Error("timeout".into()));
        geolocation.sample(55.70, 37.60, None);

        let notes = notifier.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, NotificationLevel::Warning);
        assert_eq!(notes[0].message, "timeout");
        assert_eq!(session.points().len(), 1);
    }

    #[test]
    fn test_watch_released_exactly_once() {
        let clears = Arc::new(AtomicUsize::new(0));
        let session = TrackingSession::start(
            &CountingGeolocation(clears.clone()),
            TrackingConfig::default(),
            Arc::new(RecordingNotifier::default()),
        )
        .unwrap();
        let a = session.subscription();
        let b = a.clone();
        assert!(a.cancel());
        assert!(!b.cancel());
        session.finish();
        assert_eq!(clears.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_samples_after_cancel_are_ignored() {
        let geolocation = ManualGeolocation::new();
        let session = TrackingSession::start(
            &geolocation,
            TrackingConfig::default(),
            Arc::new(RecordingNotifier::default()),
        )
        .unwrap();
        geolocation.sample(55.70, 37.60, None);
        session.subscription().cancel();
        geolocation.sample(55.80, 37.70, None);
        assert_eq!(session.finish().points.len(), 1);
    }
}
