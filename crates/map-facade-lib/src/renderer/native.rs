//! View state shared by every native map: center, zoom, size and projection

use super::{MapEvent, MapInstanceId};
use crate::coords::{self, Bounds, GeoPoint, ScreenPoint, ScreenSize};
use geo::Point;

/// Projection used by a backend's native engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Projection {
    /// EPSG:3857, used by the tile engines
    SphericalMercator,
    /// EPSG:3395, used by the routing provider
    EllipticalMercator,
}

impl Projection {
    fn to_meters(self, p: GeoPoint) -> Point<f64> {
        match self {
            Projection::SphericalMercator => coords::wgs84_to_mercator(p.lat, p.lon),
            Projection::EllipticalMercator => coords::wgs84_to_elliptical_mercator(p.lat, p.lon),
        }
    }

    fn to_geo(self, m: Point<f64>) -> GeoPoint {
        let (lat, lon) = match self {
            Projection::SphericalMercator => coords::mercator_to_wgs84(m.x(), m.y()),
            Projection::EllipticalMercator => coords::elliptical_mercator_to_wgs84(m.x(), m.y()),
        };
        GeoPoint::new(lat, lon)
    }
}

pub(crate) struct NativeMap {
    pub id: MapInstanceId,
    pub container_id: String,
    size: ScreenSize,
    center: GeoPoint,
    zoom: f64,
    min_zoom: f64,
    max_zoom: f64,
    projection: Projection,
    max_bounds: Option<Bounds>,
}

impl NativeMap {
    pub fn new(
        container_id: &str,
        size: ScreenSize,
        projection: Projection,
        max_zoom: f64,
        center: GeoPoint,
        zoom: f64,
    ) -> Self {
        Self {
            id: MapInstanceId::next(),
            container_id: container_id.to_string(),
            size,
            center,
            zoom: zoom.clamp(0.0, max_zoom),
            min_zoom: 0.0,
            max_zoom,
            projection,
            max_bounds: None,
        }
    }

    #[inline]
    pub fn center(&self) -> GeoPoint {
        self.center
    }

    #[inline]
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    #[inline]
    pub fn size(&self) -> ScreenSize {
        self.size
    }

    /// Move the view, returning the native events in firing order
    pub fn set_view(&mut self, center: GeoPoint, zoom: f64) -> Vec<MapEvent> {
        let zoom = zoom.clamp(self.min_zoom, self.max_zoom);
        let center = self.constrain(center);
        let zoom_changed = (zoom - self.zoom).abs() > f64::EPSILON;
        if center == self.center && !zoom_changed {
            return Vec::new();
        }

        let mut events = vec![MapEvent::MoveStart];
        if zoom_changed {
            events.push(MapEvent::ZoomStart);
        }
        self.center = center;
        self.zoom = zoom;
        events.push(MapEvent::Move { center });
        if zoom_changed {
            events.push(MapEvent::Zoom { zoom });
        }
        events
    }

    pub fn set_max_bounds(&mut self, bounds: Option<Bounds>) -> Vec<MapEvent> {
        self.max_bounds = bounds;
        let (center, zoom) = (self.center, self.zoom);
        self.set_view(center, zoom)
    }

    fn constrain(&self, p: GeoPoint) -> GeoPoint {
        match self.max_bounds {
            Some(b) => GeoPoint::new(
                p.lat.clamp(b.south_west.lat, b.north_east.lat),
                p.lon.clamp(b.south_west.lon, b.north_east.lon),
            ),
            None => p,
        }
    }

    fn world_px(&self, p: GeoPoint, zoom: f64) -> ScreenPoint {
        coords::meters_to_world_px(self.projection.to_meters(p), zoom)
    }

    fn from_world_px(&self, px: ScreenPoint, zoom: f64) -> GeoPoint {
        self.projection.to_geo(coords::world_px_to_meters(px, zoom))
    }

    pub fn project(&self, p: GeoPoint) -> ScreenPoint {
        let c = self.world_px(self.center, self.zoom);
        let w = self.world_px(p, self.zoom);
        ScreenPoint::new(
            w.x - c.x + self.size.width / 2.0,
            w.y - c.y + self.size.height / 2.0,
        )
    }

    pub fn unproject(&self, s: ScreenPoint) -> GeoPoint {
        let c = self.world_px(self.center, self.zoom);
        let w = ScreenPoint::new(
            s.x - self.size.width / 2.0 + c.x,
            s.y - self.size.height / 2.0 + c.y,
        );
        self.from_world_px(w, self.zoom)
    }

    pub fn visible_bounds(&self) -> Bounds {
        Bounds::from_corners(
            self.unproject(ScreenPoint::new(0.0, 0.0)),
            self.unproject(ScreenPoint::new(self.size.width, self.size.height)),
        )
    }

    /// Largest whole zoom at which `bounds` fits inside the padded viewport
    pub fn bounds_zoom(&self, bounds: Bounds, padding: f64) -> f64 {
        let avail_w = (self.size.width - 2.0 * padding).max(1.0);
        let avail_h = (self.size.height - 2.0 * padding).max(1.0);
        let sw = self.projection.to_meters(bounds.south_west);
        let ne = self.projection.to_meters(bounds.north_east);
        let span_x = (ne.x() - sw.x()).abs().max(1e-6);
        let span_y = (ne.y() - sw.y()).abs().max(1e-6);

        let zx = (avail_w * coords::EARTH_SIZE_METERS / (coords::TILE_SIZE * span_x)).log2();
        let zy = (avail_h * coords::EARTH_SIZE_METERS / (coords::TILE_SIZE * span_y)).log2();
        zx.min(zy).floor().clamp(self.min_zoom, self.max_zoom)
    }

    pub fn fit_bounds(&mut self, bounds: Bounds, padding: f64) -> Vec<MapEvent> {
        let zoom = self.bounds_zoom(bounds, padding);
        let sw = self.projection.to_meters(bounds.south_west);
        let ne = self.projection.to_meters(bounds.north_east);
        let mid = Point::new((sw.x() + ne.x()) / 2.0, (sw.y() + ne.y()) / 2.0);
        let center = self.projection.to_geo(mid);
        self.set_view(center, zoom)
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) -> Vec<MapEvent> {
        let c = self.world_px(self.center, self.zoom);
        let center = self.from_world_px(ScreenPoint::new(c.x - dx, c.y - dy), self.zoom);
        self.set_view(center, self.zoom)
    }

    /// Zoom by `delta` levels keeping the geographic position under `anchor` in place
    pub fn zoom_around(&mut self, delta: f64, anchor: ScreenPoint) -> Vec<MapEvent> {
        let target = (self.zoom + delta).clamp(self.min_zoom, self.max_zoom);
        let anchor_geo = self.unproject(anchor);
        let aw = self.world_px(anchor_geo, target);
        let cw = ScreenPoint::new(
            aw.x - (anchor.x - self.size.width / 2.0),
            aw.y - (anchor.y - self.size.height / 2.0),
        );
        let center = self.from_world_px(cw, target);
        self.set_view(center, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(projection: Projection) -> NativeMap {
        NativeMap::new(
            "map",
            ScreenSize::new(800.0, 600.0),
            projection,
            19.0,
            GeoPoint::new(55.7558, 37.6176),
            10.0,
        )
    }

    fn close(a: GeoPoint, b: GeoPoint) -> bool {
        (a.lat - b.lat).abs() < 1e-7 && (a.lon - b.lon).abs() < 1e-7
    }

    #[test]
    fn test_center_projects_to_middle() {
        for projection in [Projection::SphericalMercator, Projection::EllipticalMercator] {
            let m = map(projection);
            let p = m.project(m.center());
            assert!((p.x - 400.0).abs() < 1e-6);
            assert!((p.y - 300.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_unproject_inverts_project() {
        let m = map(Projection::EllipticalMercator);
        let target = GeoPoint::new(55.80, 37.70);
        assert!(close(m.unproject(m.project(target)), target));
    }

    #[test]
    fn test_projections_disagree_on_screen() {
        let spherical = map(Projection::SphericalMercator);
        let elliptical = map(Projection::EllipticalMercator);
        let target = GeoPoint::new(56.5, 37.6176);
        let a = spherical.project(target);
        let b = elliptical.project(target);
        assert!((a.y - b.y).abs() > 0.5);
    }

    #[test]
    fn test_set_view_event_order() {
        let mut m = map(Projection::SphericalMercator);
        let events = m.set_view(GeoPoint::new(50.0, 30.0), 12.0);
        assert_eq!(
            events,
            vec![
                MapEvent::MoveStart,
                MapEvent::ZoomStart,
                MapEvent::Move {
                    center: GeoPoint::new(50.0, 30.0)
                },
                MapEvent::Zoom { zoom: 12.0 },
            ]
        );
        assert!(m.set_view(GeoPoint::new(50.0, 30.0), 12.0).is_empty());

        let pan_only = m.set_view(GeoPoint::new(50.1, 30.0), 12.0);
        assert_eq!(pan_only.len(), 2);
    }

    #[test]
    fn test_fit_bounds_contains_bounds() {
        let mut m = map(Projection::SphericalMercator);
        let bounds = Bounds::from_wsen([40.0, 56.0, 41.0, 56.5]);
        m.fit_bounds(bounds, 20.0);
        let visible = m.visible_bounds();
        assert!(visible.contains(bounds.south_west));
        assert!(visible.contains(bounds.north_east));
        assert_eq!(m.zoom().fract(), 0.0);
    }

    #[test]
    fn test_max_bounds_clamps_center() {
        let mut m = map(Projection::SphericalMercator);
        m.set_max_bounds(Some(Bounds::from_wsen([40.0, 56.0, 41.0, 57.0])));
        assert_eq!(m.center(), GeoPoint::new(56.0, 40.0));
    }

    #[test]
    fn test_zoom_around_keeps_anchor() {
        let mut m = map(Projection::SphericalMercator);
        let anchor = ScreenPoint::new(100.0, 150.0);
        let before = m.unproject(anchor);
        m.zoom_around(2.0, anchor);
        assert_eq!(m.zoom(), 12.0);
        assert!(close(m.unproject(anchor), before));
    }

    #[test]
    fn test_pan_by_moves_center() {
        let mut m = map(Projection::SphericalMercator);
        let right = m.unproject(ScreenPoint::new(500.0, 300.0));
        m.pan_by(-100.0, 0.0);
        assert!(close(m.center(), right));
    }
}
