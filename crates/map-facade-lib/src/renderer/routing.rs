//! Routing-provider adapter
//!
//! The provider's engine keeps a flat geo-object collection: placemarks, route objects
//! keyed by route id and free polylines, all with coordinates in `[lon, lat]` order. Its
//! view uses the ellipsoidal Mercator projection. Drawing a route fires the
//! route-geometry event with the drawn coordinates.

use super::native::{NativeMap, Projection};
use super::{
    EventKind, ListenerTable, MapContext, MapEvent, MapRenderer, NativeListener, ObjectHandle,
    PointerInput, PolylineStyle, RendererHandle, wait_for_layout,
};
use crate::config::MapConfig;
use crate::coords::{Bounds, GeoPoint, ScreenPoint, ScreenSize};
use crate::host::ContainerHost;
use crate::marker::{self, UnifiedMarker};
use crate::route::PersistedRoute;
use crate::services::RoutingProvider;
use crate::{InitError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;

pub const ROUTING_DEFAULT_CENTER: GeoPoint = GeoPoint::new(55.7558, 37.6176);
pub const ROUTING_DEFAULT_ZOOM: f64 = 10.0;
pub const ROUTING_MAX_ZOOM: f64 = 21.0;

pub const DEFAULT_BEHAVIORS: [&str; 4] = ["drag", "scrollZoom", "dblClickZoom", "multiTouch"];

const ROUTE_COLOR: &str = "#2196F3";

fn lon_lat(p: GeoPoint) -> [f64; 2] {
    p.lon_lat()
}

fn from_lon_lat([lon, lat]: [f64; 2]) -> GeoPoint {
    GeoPoint::new(lat, lon)
}

struct Placemark {
    coordinates: [f64; 2],
    balloon_content: String,
    preset_color: String,
}

struct RouteObject {
    route: PersistedRoute,
    coordinates: Vec<[f64; 2]>,
}

struct PolylineObject {
    coordinates: Vec<[f64; 2]>,
    stroke_color: String,
}

/// Native object graph of the provider engine
struct ProviderMap {
    map: NativeMap,
    markers: HashMap<String, UnifiedMarker>,
    placemarks: BTreeMap<String, Placemark>,
    routes: BTreeMap<String, RouteObject>,
    polylines: BTreeMap<u64, PolylineObject>,
    next_object: u64,
    /// `[top, right, bottom, left]`
    margin: [f64; 4],
    behaviors: BTreeSet<String>,
}

impl ProviderMap {
    fn object_count(&self) -> usize {
        self.placemarks.len() + self.routes.len() + self.polylines.len()
    }

    fn apply_markers(&mut self, desired: &[UnifiedMarker]) {
        let diff = marker::diff_markers(&self.markers, desired);
        if diff.is_empty() {
            return;
        }
        for id in &diff.removed {
            self.placemarks.remove(id);
            self.markers.remove(id);
        }
        for m in diff.added.into_iter().chain(diff.updated) {
            self.placemarks.insert(
                m.id.clone(),
                Placemark {
                    coordinates: lon_lat(m.coordinates),
                    balloon_content: m.title.clone().unwrap_or_default(),
                    preset_color: m.color.clone(),
                },
            );
            self.markers.insert(m.id.clone(), m);
        }
    }
}

pub struct RoutingRenderer {
    host: Arc<dyn ContainerHost>,
    provider: Option<Arc<dyn RoutingProvider>>,
    alive: bool,
    listeners: ListenerTable,
    state: Option<ProviderMap>,
}

impl RoutingRenderer {
    pub fn new(host: Arc<dyn ContainerHost>, provider: Option<Arc<dyn RoutingProvider>>) -> Self {
        Self {
            host,
            provider,
            alive: true,
            listeners: ListenerTable::default(),
            state: None,
        }
    }

    fn state(&self) -> Option<&ProviderMap> {
        self.state.as_ref().filter(|_| self.alive)
    }

    /// Keep the map centered in the visible part when a side panel covers it
    pub fn set_map_margin(&mut self, right: f64) {
        if let Some(state) = self.state.as_mut() {
            state.margin = [0.0, right.max(0.0), 0.0, 0.0];
        }
    }

    pub fn reset_map_margin(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.margin = [0.0; 4];
        }
    }

    pub fn margin(&self) -> Option<[f64; 4]> {
        self.state().map(|s| s.margin)
    }

    pub fn enable_behavior(&mut self, id: &str) {
        if let Some(state) = self.state.as_mut() {
            state.behaviors.insert(id.to_string());
        }
    }

    pub fn disable_behavior(&mut self, id: &str) {
        if let Some(state) = self.state.as_mut() {
            state.behaviors.remove(id);
        }
    }

    pub fn behavior_enabled(&self, id: &str) -> bool {
        self.state().is_some_and(|s| s.behaviors.contains(id))
    }

    /// Route coordinates exactly as the engine stores them, `[lon, lat]`
    pub fn native_route_coordinates(&self, id: &str) -> Option<Vec<[f64; 2]>> {
        self.state()?.routes.get(id).map(|r| r.coordinates.clone())
    }

    /// Placemark position as the engine stores it, `[lon, lat]`
    pub fn native_placemark(&self, id: &str) -> Option<[f64; 2]> {
        self.state()?.placemarks.get(id).map(|p| p.coordinates)
    }

    /// Balloon text shown for a placemark
    pub fn placemark_balloon(&self, id: &str) -> Option<String> {
        self.state()?
            .placemarks
            .get(id)
            .map(|p| format!("{} ({})", p.balloon_content, p.preset_color))
    }

    /// Build a route through `waypoints` with the provider
    ///
    /// Provider failures yield a route without geometry instead of an error.
    pub async fn plan_route(&self, waypoints: &[GeoPoint]) -> PersistedRoute {
        let id = format!(
            "routing-{}",
            OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
        );
        let geometry = match &self.provider {
            Some(provider) => match provider.build_route(waypoints).await {
                Ok(geometry) => Some(geometry),
                Err(e) => {
                    tracing::warn!(error = %e, "routing provider failed to build route");
                    None
                }
            },
            None => {
                tracing::warn!("no routing provider configured");
                None
            }
        };
        PersistedRoute::new(id, waypoints.to_vec(), geometry)
    }

    fn emit(&self, events: Vec<MapEvent>) {
        self.listeners.emit_all(events);
    }
}

#[async_trait]
impl MapRenderer for RoutingRenderer {
    fn context(&self) -> MapContext {
        MapContext::RoutingProvider
    }

    async fn init(&mut self, container_id: &str, config: &MapConfig) -> Result<RendererHandle> {
        if !self.alive {
            return Err(InitError::RendererUnavailable(MapContext::RoutingProvider).into());
        }
        if let Some(previous) = self.state.take() {
            tracing::debug!(container = %previous.map.container_id, "tearing down previous provider map");
        }
        let size = wait_for_layout(self.host.clone(), container_id, config.layout).await?;
        let map = NativeMap::new(
            container_id,
            size,
            Projection::EllipticalMercator,
            ROUTING_MAX_ZOOM,
            config.center.unwrap_or(ROUTING_DEFAULT_CENTER),
            config.zoom.unwrap_or(ROUTING_DEFAULT_ZOOM),
        );
        self.state = Some(ProviderMap {
            map,
            markers: HashMap::new(),
            placemarks: BTreeMap::new(),
            routes: BTreeMap::new(),
            polylines: BTreeMap::new(),
            next_object: 1,
            margin: config.margin.unwrap_or([0.0; 4]),
            behaviors: DEFAULT_BEHAVIORS.iter().map(|b| b.to_string()).collect(),
        });

        let handle = self
            .handle()
            .ok_or(InitError::RendererUnavailable(MapContext::RoutingProvider))?;
        tracing::info!(container = %handle.container_id, "routing provider map ready");
        Ok(handle)
    }

    fn handle(&self) -> Option<RendererHandle> {
        let state = self.state()?;
        Some(RendererHandle {
            context: MapContext::RoutingProvider,
            container_id: state.map.container_id.clone(),
            map_id: state.map.id,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn set_view(&mut self, center: GeoPoint, zoom: f64) {
        if let Some(state) = self.state.as_mut() {
            let events = state.map.set_view(center, zoom);
            self.emit(events);
        }
    }

    fn view(&self) -> Option<(GeoPoint, f64)> {
        self.state().map(|s| (s.map.center(), s.map.zoom()))
    }

    fn size(&self) -> Option<ScreenSize> {
        self.state().map(|s| s.map.size())
    }

    fn visible_bounds(&self) -> Option<Bounds> {
        self.state().map(|s| s.map.visible_bounds())
    }

    fn set_max_bounds(&mut self, bounds: Option<Bounds>) {
        if let Some(state) = self.state.as_mut() {
            let events = state.map.set_max_bounds(bounds);
            self.emit(events);
        }
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding: f64) {
        if let Some(state) = self.state.as_mut() {
            let margin = state.margin.iter().copied().fold(0.0, f64::max);
            let events = state.map.fit_bounds(bounds, padding + margin);
            self.emit(events);
        }
    }

    fn render_markers(&mut self, markers: &[UnifiedMarker]) {
        if !self.alive {
            return;
        }
        if let Some(state) = self.state.as_mut() {
            state.apply_markers(markers);
        }
    }

    fn remove_marker(&mut self, id: &str) {
        if let Some(state) = self.state.as_mut() {
            state.placemarks.remove(id);
            state.markers.remove(id);
        }
    }

    fn marker_ids(&self) -> Vec<String> {
        self.state()
            .map(|s| s.placemarks.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn render_route(&mut self, route: &PersistedRoute) {
        if !self.alive {
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.routes.get(&route.id).is_some_and(|r| &r.route == route) {
            return;
        }
        let path = route.path();
        if path.len() < 2 {
            tracing::debug!(route = %route.id, "route has fewer than two points, not drawn");
            state.routes.remove(&route.id);
            return;
        }
        let coordinates: Vec<[f64; 2]> = path.iter().copied().map(lon_lat).collect();
        state.routes.insert(
            route.id.clone(),
            RouteObject {
                route: route.clone(),
                coordinates: coordinates.clone(),
            },
        );
        self.listeners.emit(&MapEvent::RouteGeometry {
            route_id: route.id.clone(),
            coordinates: coordinates.into_iter().map(from_lon_lat).collect(),
        });
    }

    fn remove_route(&mut self, id: &str) {
        if let Some(state) = self.state.as_mut() {
            state.routes.remove(id);
        }
    }

    fn route_ids(&self) -> Vec<String> {
        self.state()
            .map(|s| s.routes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn project(&self, position: GeoPoint) -> Option<ScreenPoint> {
        self.state().map(|s| s.map.project(position))
    }

    fn unproject(&self, point: ScreenPoint) -> Option<GeoPoint> {
        self.state().map(|s| s.map.unproject(point))
    }

    fn create_polyline(
        &mut self,
        points: &[GeoPoint],
        style: PolylineStyle,
    ) -> Option<ObjectHandle> {
        if !self.alive {
            return None;
        }
        let state = self.state.as_mut()?;
        let id = state.next_object;
        state.next_object += 1;
        state.polylines.insert(
            id,
            PolylineObject {
                coordinates: points.iter().copied().map(lon_lat).collect(),
                stroke_color: style.color,
            },
        );
        Some(ObjectHandle {
            context: MapContext::RoutingProvider,
            map_id: state.map.id,
            id,
        })
    }

    fn remove_object(&mut self, handle: ObjectHandle) -> bool {
        match self.state.as_mut() {
            Some(state)
                if handle.context == MapContext::RoutingProvider
                    && handle.map_id == state.map.id =>
            {
                state.polylines.remove(&handle.id).is_some()
            }
            _ => false,
        }
    }

    fn set_listener(&mut self, kind: EventKind, listener: Option<NativeListener>) {
        if self.alive {
            self.listeners.set(kind, listener);
        }
    }

    fn native_listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn native_layer_count(&self) -> usize {
        self.state().map(ProviderMap::object_count).unwrap_or(0)
    }

    fn handle_input(&mut self, input: PointerInput) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let events = match input {
            PointerInput::Click(screen) => vec![MapEvent::Click {
                position: state.map.unproject(screen),
                screen,
            }],
            PointerInput::Drag { dx, dy } if state.behaviors.contains("drag") => {
                state.map.pan_by(dx, dy)
            }
            PointerInput::Scroll { delta, anchor } if state.behaviors.contains("scrollZoom") => {
                state.map.zoom_around(delta, anchor)
            }
            _ => Vec::new(),
        };
        self.emit(events);
    }

    fn clear(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.markers.clear();
            state.placemarks.clear();
            state.routes.clear();
            state.polylines.clear();
        }
    }

    fn destroy(&mut self) {
        if !self.alive {
            return;
        }
        tracing::debug!("destroying routing provider renderer");
        self.listeners.clear();
        self.state = None;
        self.alive = false;
    }

    fn as_routing_mut(&mut self) -> Option<&mut RoutingRenderer> {
        Some(self)
    }
}

impl std::fmt::Debug for RoutingRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingRenderer")
            .field("alive", &self.alive)
            .field("handle", &self.handle())
            .field(
                "polylines",
                &self
                    .state()
                    .map(|s| {
                        s.polylines
                            .values()
                            .map(|p| (p.coordinates.len(), p.stroke_color.as_str()))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticHost;
    use crate::services::{ServiceError, ServiceResult, StraightLineRouting};
    use std::sync::Mutex;

    struct FailingRouting;

    #[async_trait]
    impl RoutingProvider for FailingRouting {
        async fn build_route(&self, _waypoints: &[GeoPoint]) -> ServiceResult<Vec<GeoPoint>> {
            Err(ServiceError::new("quota exceeded"))
        }
    }

    fn host() -> Arc<StaticHost> {
        Arc::new(StaticHost::with_container(
            "planner",
            ScreenSize::new(1024.0, 768.0),
        ))
    }

    async fn ready(provider: Option<Arc<dyn RoutingProvider>>) -> RoutingRenderer {
        let mut r = RoutingRenderer::new(host(), provider);
        r.init("planner", &MapConfig::default()).await.unwrap();
        r
    }

    #[tokio::test]
    async fn test_placemarks_use_lon_lat() {
        let mut r = ready(None).await;
        r.render_markers(&[UnifiedMarker::new("m", GeoPoint::new(55.1, 37.2)).with_title("Cafe")]);
        assert_eq!(r.native_placemark("m"), Some([37.2, 55.1]));
        assert_eq!(r.placemark_balloon("m").unwrap(), "Cafe (#3B82F6)");
        assert_eq!(r.marker_ids(), vec!["m".to_string()]);
    }

    #[tokio::test]
    async fn test_route_emits_geometry_once() {
        let mut r = ready(None).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        r.set_listener(
            EventKind::RouteGeometry,
            Some(Arc::new(move |e: &MapEvent| sink.lock().unwrap().push(e.clone()))),
        );

        let route = PersistedRoute::new(
            "r1",
            vec![GeoPoint::new(55.0, 37.0), GeoPoint::new(55.1, 37.1)],
            None,
        );
        r.render_route(&route);
        r.render_route(&route);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(
            r.native_route_coordinates("r1").unwrap(),
            vec![[37.0, 55.0], [37.1, 55.1]]
        );
        assert_eq!(r.route_ids(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_routes_are_kept_per_id() {
        let mut r = ready(None).await;
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        r.set_listener(
            EventKind::RouteGeometry,
            Some(Arc::new(move |_: &MapEvent| *sink.lock().unwrap() += 1)),
        );

        let first = PersistedRoute::new(
            "r1",
            vec![GeoPoint::new(55.0, 37.0), GeoPoint::new(55.1, 37.1)],
            None,
        );
        let second = PersistedRoute::new(
            "r2",
            vec![GeoPoint::new(50.0, 30.0), GeoPoint::new(50.1, 30.1)],
            None,
        );
        r.render_route(&first);
        r.render_route(&second);
        r.render_route(&first);
        r.render_route(&second);
        assert_eq!(*seen.lock().unwrap(), 2);
        assert_eq!(r.route_ids(), vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(r.native_layer_count(), 2);

        r.remove_route("r2");
        assert_eq!(r.route_ids(), vec!["r1".to_string()]);
        assert_eq!(
            r.native_route_coordinates("r1").unwrap(),
            vec![[37.0, 55.0], [37.1, 55.1]]
        );
        assert!(r.native_route_coordinates("r2").is_none());
    }

    #[tokio::test]
    async fn test_short_route_is_ignored() {
        let mut r = ready(None).await;
        r.render_route(&PersistedRoute::new("r", vec![GeoPoint::default()], None));
        assert!(r.route_ids().is_empty());
    }

    #[tokio::test]
    async fn test_plan_route() {
        let r = ready(Some(Arc::new(StraightLineRouting))).await;
        let waypoints = vec![GeoPoint::new(55.0, 37.0), GeoPoint::new(55.2, 37.3)];
        let planned = r.plan_route(&waypoints).await;
        assert!(planned.id.starts_with("routing-"));
        assert_eq!(planned.geometry.as_deref(), Some(&waypoints[..]));

        let r = ready(Some(Arc::new(FailingRouting))).await;
        let planned = r.plan_route(&waypoints).await;
        assert!(planned.geometry.is_none());
        assert_eq!(planned.waypoints, waypoints);
    }

    #[tokio::test]
    async fn test_behaviors_gate_input() {
        let mut r = ready(None).await;
        let before = r.view().unwrap();
        r.disable_behavior("drag");
        r.handle_input(PointerInput::Drag { dx: 50.0, dy: 0.0 });
        assert_eq!(r.view().unwrap(), before);

        r.enable_behavior("drag");
        r.handle_input(PointerInput::Drag { dx: 50.0, dy: 0.0 });
        assert_ne!(r.view().unwrap(), before);
    }

    #[tokio::test]
    async fn test_margin_and_clear() {
        let mut r = ready(None).await;
        r.set_map_margin(300.0);
        assert_eq!(r.margin(), Some([0.0, 300.0, 0.0, 0.0]));
        r.reset_map_margin();
        assert_eq!(r.margin(), Some([0.0; 4]));

        let handle = r
            .create_polyline(
                &[GeoPoint::new(1.0, 2.0), GeoPoint::new(3.0, 4.0)],
                PolylineStyle::default(),
            )
            .unwrap();
        r.render_markers(&[UnifiedMarker::new("m", GeoPoint::default())]);
        assert_eq!(r.native_layer_count(), 2);
        r.clear();
        assert_eq!(r.native_layer_count(), 0);
        assert!(!r.remove_object(handle));
    }
}
