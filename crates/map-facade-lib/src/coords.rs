//! Geographic primitives and coordinate conversions
//!
//! All adapters share these value types, but not a projection: tile backends use
//! spherical Web Mercator (EPSG:3857) while the routing backend uses the ellipsoidal
//! variant (EPSG:3395). Both are provided here.

use geo::{BoundingRect, MultiPoint, Point};
use serde::{Deserialize, Serialize};

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;
pub const EARTH_SIZE_METERS: f64 = EARTH_MERCATOR_MAX - EARTH_MERCATOR_MIN;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_M: f64 = 6371000.0;

/// WGS84 semi-major axis
const WGS84_A: f64 = 6378137.0;

/// WGS84 first eccentricity
const WGS84_E: f64 = 0.0818191908426;

/// Pixel size of one map tile at every zoom level
pub const TILE_SIZE: f64 = 256.0;

const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

/// A WGS84 position in degrees
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// `[lon, lat]`, the axis order of GeoJSON and of the routing provider
    #[inline]
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

impl From<GeoPoint> for Point<f64> {
    fn from(p: GeoPoint) -> Self {
        Point::new(p.lon, p.lat)
    }
}

impl From<Point<f64>> for GeoPoint {
    fn from(p: Point<f64>) -> Self {
        GeoPoint::new(p.y(), p.x())
    }
}

/// A pixel position relative to the top-left corner of a map container
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Layout size of a map container in pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

impl ScreenSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// A container that has not been laid out yet reports zero in either axis
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Axis-aligned geographic bounding box
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl Bounds {
    /// Build bounds from any two opposite corners
    pub fn from_corners(a: GeoPoint, b: GeoPoint) -> Self {
        Self {
            south_west: GeoPoint::new(a.lat.min(b.lat), a.lon.min(b.lon)),
            north_east: GeoPoint::new(a.lat.max(b.lat), a.lon.max(b.lon)),
        }
    }

    /// Build bounds from the `[west, south, east, north]` order used by tile metadata
    pub fn from_wsen([west, south, east, north]: [f64; 4]) -> Self {
        Self::from_corners(GeoPoint::new(south, west), GeoPoint::new(north, east))
    }

    /// `[[south, west], [north, east]]`
    pub fn as_array(&self) -> [[f64; 2]; 2] {
        [
            [self.south_west.lat, self.south_west.lon],
            [self.north_east.lat, self.north_east.lon],
        ]
    }

    pub fn from_array([[south, west], [north, east]]: [[f64; 2]; 2]) -> Self {
        Self::from_corners(GeoPoint::new(south, west), GeoPoint::new(north, east))
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lon + self.north_east.lon) / 2.0,
        )
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.south_west.lat
            && p.lat <= self.north_east.lat
            && p.lon >= self.south_west.lon
            && p.lon <= self.north_east.lon
    }

    /// Closed ring of the four corners, starting and ending at the south-west corner
    pub fn ring(&self) -> Vec<GeoPoint> {
        let sw = self.south_west;
        let ne = self.north_east;
        vec![
            sw,
            GeoPoint::new(ne.lat, sw.lon),
            ne,
            GeoPoint::new(sw.lat, ne.lon),
            sw,
        ]
    }
}

/// Calculate the Haversine distance between two positions in meters
#[inline]
pub fn haversine_distance(p1: GeoPoint, p2: GeoPoint) -> f64 {
    let lat1 = p1.lat.to_radians();
    let lat2 = p2.lat.to_radians();
    let delta_lat = (p2.lat - p1.lat).to_radians();
    let delta_lon = (p2.lon - p1.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Sum of consecutive Haversine distances; zero for fewer than two points
pub fn path_distance(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(pair[0], pair[1]))
        .sum()
}

/// Tight bounding box of a set of positions, `None` when empty
pub fn bounding_box(points: impl IntoIterator<Item = GeoPoint>) -> Option<Bounds> {
    let multi: MultiPoint<f64> = points.into_iter().map(Point::from).collect();
    let rect = multi.bounding_rect()?;
    Some(Bounds::from_corners(
        GeoPoint::new(rect.min().y, rect.min().x),
        GeoPoint::new(rect.max().y, rect.max().x),
    ))
}

/// Convert WGS84 (lat, lon) to Web Mercator (x, y) in meters
///
/// Latitude is clamped to the representable range.
#[inline(always)]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lon * LON_TO_X_FACTOR;
    let lat_rad = lat.to_radians();
    let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR;
    Point::new(x, y)
}

/// Convert Web Mercator (x, y) in meters to WGS84 (lat, lon)
#[inline(always)]
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    (lat, lon)
}

/// Convert WGS84 (lat, lon) to ellipsoidal World Mercator (EPSG:3395) in meters
pub fn wgs84_to_elliptical_mercator(lat: f64, lon: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let phi = lat.to_radians();
    let con = WGS84_E * phi.sin();
    let ts = (std::f64::consts::FRAC_PI_4 + phi / 2.0).tan()
        * ((1.0 - con) / (1.0 + con)).powf(WGS84_E / 2.0);
    Point::new(WGS84_A * lon.to_radians(), WGS84_A * ts.ln())
}

/// Inverse of [`wgs84_to_elliptical_mercator`], returns (lat, lon)
pub fn elliptical_mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let ts = (-y / WGS84_A).exp();
    let mut phi = std::f64::consts::FRAC_PI_2 - 2.0 * ts.atan();
    for _ in 0..15 {
        let con = WGS84_E * phi.sin();
        let next = std::f64::consts::FRAC_PI_2
            - 2.0 * (ts * ((1.0 - con) / (1.0 + con)).powf(WGS84_E / 2.0)).atan();
        let delta = next - phi;
        phi = next;
        if delta.abs() < 1e-12 {
            break;
        }
    }
    (phi.to_degrees(), (x / WGS84_A).to_degrees())
}

/// Side length of the whole world in pixels at `zoom`
#[inline]
pub fn world_size_px(zoom: f64) -> f64 {
    TILE_SIZE * zoom.exp2()
}

/// Map projected meters to world pixels (origin top-left) at `zoom`
#[inline]
pub fn meters_to_world_px(point: Point<f64>, zoom: f64) -> ScreenPoint {
    let scale = world_size_px(zoom) / EARTH_SIZE_METERS;
    ScreenPoint::new(
        (point.x() - EARTH_MERCATOR_MIN) * scale,
        (EARTH_MERCATOR_MAX - point.y()) * scale,
    )
}

/// Inverse of [`meters_to_world_px`]
#[inline]
pub fn world_px_to_meters(px: ScreenPoint, zoom: f64) -> Point<f64> {
    let scale = EARTH_SIZE_METERS / world_size_px(zoom);
    Point::new(
        px.x * scale + EARTH_MERCATOR_MIN,
        EARTH_MERCATOR_MAX - px.y * scale,
    )
}
