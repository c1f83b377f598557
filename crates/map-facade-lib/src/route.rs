//! Route and track value types
//!
//! [`PersistedRoute`] is a planned or saved route. [`TrackedRoute`] is the immutable
//! result of a GPS recording session with its statistics computed once.

use crate::coords::{self, Bounds, GeoPoint};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A route as stored and drawn by the adapters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRoute {
    pub id: String,
    pub waypoints: Vec<GeoPoint>,
    /// Full road-following geometry when known; otherwise the waypoints are drawn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Vec<GeoPoint>>,
    /// Meters
    pub distance: f64,
    pub duration_ms: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PersistedRoute {
    /// Create a route, deriving its distance from the drawn path
    pub fn new(
        id: impl Into<String>,
        waypoints: Vec<GeoPoint>,
        geometry: Option<Vec<GeoPoint>>,
    ) -> Self {
        let mut route = Self {
            id: id.into(),
            waypoints,
            geometry,
            distance: 0.0,
            duration_ms: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        route.distance = coords::path_distance(route.path());
        route
    }

    /// Positions an adapter should draw
    pub fn path(&self) -> &[GeoPoint] {
        match &self.geometry {
            Some(geometry) if !geometry.is_empty() => geometry,
            _ => &self.waypoints,
        }
    }
}

impl From<&TrackedRoute> for PersistedRoute {
    fn from(track: &TrackedRoute) -> Self {
        PersistedRoute {
            id: track.id.clone(),
            waypoints: track.waypoints.clone(),
            geometry: Some(track.positions()),
            distance: track.distance,
            duration_ms: track.duration_ms,
            created_at: track.end_time,
        }
    }
}

/// One accepted GPS sample
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    /// Reported horizontal accuracy in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl TrackPoint {
    pub const fn new(lat: f64, lon: f64, accuracy: Option<f64>) -> Self {
        Self { lat, lon, accuracy }
    }

    #[inline]
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// A finished recording session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedRoute {
    pub id: String,
    pub points: Vec<TrackPoint>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    /// Meters, sum of Haversine legs
    pub distance: f64,
    pub duration_ms: u64,
    pub bbox: Option<Bounds>,
    /// First and last accepted positions
    pub waypoints: Vec<GeoPoint>,
    /// Mean of the reported non-zero accuracies, 0 when none were reported
    pub mean_accuracy: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackedRoute {
    /// Finalize a session, computing every statistic in one place
    pub fn from_points(
        id: impl Into<String>,
        points: Vec<TrackPoint>,
        start_time: OffsetDateTime,
        end_time: OffsetDateTime,
    ) -> Self {
        let positions: Vec<GeoPoint> = points.iter().map(TrackPoint::position).collect();
        let distance = coords::path_distance(&positions);
        let bbox = coords::bounding_box(positions.iter().copied());

        let waypoints = match (positions.first(), positions.last()) {
            (Some(first), Some(last)) if positions.len() > 1 => vec![*first, *last],
            (Some(first), _) => vec![*first],
            _ => Vec::new(),
        };

        // a zero accuracy means the platform gave no estimate
        let accuracies: Vec<f64> = points
            .iter()
            .filter_map(|p| p.accuracy)
            .filter(|a| *a != 0.0 && !a.is_nan())
            .collect();
        let mean_accuracy = if accuracies.is_empty() {
            0.0
        } else {
            accuracies.iter().sum::<f64>() / accuracies.len() as f64
        };

        let duration_ms = (end_time - start_time).whole_milliseconds().max(0) as u64;

        Self {
            id: id.into(),
            points,
            start_time,
            end_time,
            distance,
            duration_ms,
            bbox,
            waypoints,
            mean_accuracy,
        }
    }

    pub fn positions(&self) -> Vec<GeoPoint> {
        self.points.iter().map(TrackPoint::position).collect()
    }

    #[inline]
    pub fn distance_km(&self) -> f64 {
        self.distance / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn sample_points() -> Vec<TrackPoint> {
        vec![
            TrackPoint::new(55.70, 37.60, Some(10.0)),
            TrackPoint::new(55.70, 37.6002, Some(6.0)),
            TrackPoint::new(55.7003, 37.6004, None),
        ]
    }

    #[test]
    fn test_tracked_route_statistics() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let end = start + Duration::seconds(90);
        let track = TrackedRoute::from_points("t1", sample_points(), start, end);

        let expected = coords::path_distance(&track.positions());
        assert!((track.distance - expected).abs() < f64::EPSILON);
        assert_eq!(track.duration_ms, 90_000);
        assert_eq!(track.mean_accuracy, 8.0);
        assert_eq!(track.waypoints.len(), 2);
        assert_eq!(track.waypoints[1], GeoPoint::new(55.7003, 37.6004));

        let bbox = track.bbox.unwrap();
        assert_eq!(bbox.south_west, GeoPoint::new(55.70, 37.60));
        assert_eq!(bbox.north_east, GeoPoint::new(55.7003, 37.6004));
    }

    #[test]
    fn test_mean_accuracy_skips_missing_estimates() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let points = vec![
            TrackPoint::new(55.70, 37.60, Some(12.0)),
            TrackPoint::new(55.70, 37.6002, Some(0.0)),
            TrackPoint::new(55.70, 37.6004, Some(f64::NAN)),
            TrackPoint::new(55.70, 37.6006, Some(4.0)),
        ];
        let track = TrackedRoute::from_points("t2", points, now, now);
        assert_eq!(track.mean_accuracy, 8.0);

        let zeros = vec![TrackPoint::new(55.70, 37.60, Some(0.0))];
        let track = TrackedRoute::from_points("t3", zeros, now, now);
        assert_eq!(track.mean_accuracy, 0.0);
    }

    #[test]
    fn test_empty_track() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let track = TrackedRoute::from_points("empty", Vec::new(), now, now);
        assert_eq!(track.distance, 0.0);
        assert!(track.bbox.is_none());
        assert!(track.waypoints.is_empty());
        assert_eq!(track.mean_accuracy, 0.0);
    }

    #[test]
    fn test_persisted_route_prefers_geometry() {
        let waypoints = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)];
        let geometry = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.5, 0.5),
            GeoPoint::new(0.0, 1.0),
        ];
        let straight = PersistedRoute::new("r1", waypoints.clone(), None);
        let curved = PersistedRoute::new("r2", waypoints, Some(geometry));
        assert_eq!(straight.path().len(), 2);
        assert_eq!(curved.path().len(), 3);
        assert!(curved.distance > straight.distance);
    }

    #[test]
    fn test_tracked_route_json_uses_camel_case() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let track = TrackedRoute::from_points("t1", sample_points(), now, now);
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["startTime"], "1970-01-01T00:00:00Z");
        assert!(json.get("meanAccuracy").is_some());
    }
}
