//! Renderer adapters
//!
//! Each backend keeps its own native object graph behind the [`MapRenderer`] trait.
//! The tile adapters share a Leaflet-like layer scene ([`scene`]); the routing adapter
//! keeps a provider-style geo-object collection in `[lon, lat]` order with an
//! ellipsoidal projection. Nothing outside this module may assume the adapters are
//! interchangeable beyond the trait.

mod native;
pub mod offline;
pub mod online;
pub mod routing;
pub(crate) mod scene;

pub use offline::OfflineTileRenderer;
pub use online::OnlineTileRenderer;
pub use routing::RoutingRenderer;

use crate::config::{LayoutWait, MapConfig};
use crate::coords::{Bounds, GeoPoint, ScreenPoint, ScreenSize};
use crate::host::ContainerHost;
use crate::marker::UnifiedMarker;
use crate::route::PersistedRoute;
use crate::{InitError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which backend is rendering the map
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum MapContext {
    /// Public raster tiles
    #[default]
    OnlineTile,
    /// Third-party routing provider map
    RoutingProvider,
    /// Downloaded MBTiles served locally
    OfflineTile,
}

impl MapContext {
    pub const ALL: [MapContext; 3] = [
        MapContext::OnlineTile,
        MapContext::RoutingProvider,
        MapContext::OfflineTile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MapContext::OnlineTile => "online-tile",
            MapContext::RoutingProvider => "routing-provider",
            MapContext::OfflineTile => "offline-tile",
        }
    }
}

impl fmt::Display for MapContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown map context `{0}`")]
pub struct UnknownContext(pub String);

impl FromStr for MapContext {
    type Err = UnknownContext;

    /// Accepts context names as well as the legacy provider names
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online-tile" | "online" | "osm" | "leaflet" => Ok(MapContext::OnlineTile),
            "routing-provider" | "routing" | "planner" | "yandex" => {
                Ok(MapContext::RoutingProvider)
            }
            "offline-tile" | "offline" => Ok(MapContext::OfflineTile),
            other => Err(UnknownContext(other.to_string())),
        }
    }
}

/// Identity of one native map instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapInstanceId(u64);

impl MapInstanceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        MapInstanceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// What `init` hands back: which native map is bound where
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendererHandle {
    pub context: MapContext,
    pub container_id: String,
    pub map_id: MapInstanceId,
}

/// Native event kinds the bridge multiplexes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Click,
    RouteGeometry,
    Move,
    MoveStart,
    Zoom,
    ZoomStart,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Click,
        EventKind::RouteGeometry,
        EventKind::Move,
        EventKind::MoveStart,
        EventKind::Zoom,
        EventKind::ZoomStart,
    ];
}

#[derive(Clone, Debug, PartialEq)]
pub enum MapEvent {
    Click {
        position: GeoPoint,
        screen: ScreenPoint,
    },
    RouteGeometry {
        route_id: String,
        coordinates: Vec<GeoPoint>,
    },
    MoveStart,
    Move {
        center: GeoPoint,
    },
    ZoomStart,
    Zoom {
        zoom: f64,
    },
}

impl MapEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MapEvent::Click { .. } => EventKind::Click,
            MapEvent::RouteGeometry { .. } => EventKind::RouteGeometry,
            MapEvent::MoveStart => EventKind::MoveStart,
            MapEvent::Move { .. } => EventKind::Move,
            MapEvent::ZoomStart => EventKind::ZoomStart,
            MapEvent::Zoom { .. } => EventKind::Zoom,
        }
    }
}

/// The single native callback installed per event kind
pub type NativeListener = Arc<dyn Fn(&MapEvent) + Send + Sync>;

/// One listener slot per event kind
#[derive(Default, Clone)]
pub(crate) struct ListenerTable {
    slots: HashMap<EventKind, NativeListener>,
}

impl ListenerTable {
    pub fn set(&mut self, kind: EventKind, listener: Option<NativeListener>) {
        match listener {
            Some(listener) => {
                self.slots.insert(kind, listener);
            }
            None => {
                self.slots.remove(&kind);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn emit(&self, event: &MapEvent) {
        if let Some(listener) = self.slots.get(&event.kind()) {
            listener(event);
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = MapEvent>) {
        for event in events {
            self.emit(&event);
        }
    }
}

/// Host-originated interaction fed into a renderer
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerInput {
    Click(ScreenPoint),
    /// Pan by a pixel offset
    Drag { dx: f64, dy: f64 },
    /// Zoom by `delta` levels keeping `anchor` fixed on screen
    Scroll { delta: f64, anchor: ScreenPoint },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PolylineStyle {
    pub color: String,
    pub weight: f64,
    pub opacity: f32,
    pub dashed: bool,
}

impl Default for PolylineStyle {
    fn default() -> Self {
        Self {
            color: "#3B82F6".to_string(),
            weight: 4.0,
            opacity: 0.8,
            dashed: false,
        }
    }
}

/// Ad-hoc object created through a renderer, removable with `remove_object`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub context: MapContext,
    pub map_id: MapInstanceId,
    pub id: u64,
}

/// Contract every backend adapter fulfils
///
/// Mutating calls made before a successful `init` (or after `destroy`) are ignored.
#[async_trait]
pub trait MapRenderer: Send + Sync {
    fn context(&self) -> MapContext;

    /// Bind a fresh native map to `container_id`, tearing down any previous one
    async fn init(&mut self, container_id: &str, config: &MapConfig) -> Result<RendererHandle>;

    /// Handle of the native map currently bound, if any
    fn handle(&self) -> Option<RendererHandle>;

    /// False once `destroy` ran
    fn is_alive(&self) -> bool;

    fn is_ready(&self) -> bool {
        self.is_alive() && self.handle().is_some()
    }

    fn set_view(&mut self, center: GeoPoint, zoom: f64);
    /// Current center and zoom
    fn view(&self) -> Option<(GeoPoint, f64)>;
    fn size(&self) -> Option<ScreenSize>;
    fn visible_bounds(&self) -> Option<Bounds>;
    /// Restrict panning to `bounds`
    fn set_max_bounds(&mut self, bounds: Option<Bounds>);
    fn fit_bounds(&mut self, bounds: Bounds, padding: f64);

    /// Make the rendered marker set equal `markers`, diffing by id
    fn render_markers(&mut self, markers: &[UnifiedMarker]);
    fn remove_marker(&mut self, id: &str);
    fn marker_ids(&self) -> Vec<String>;

    /// Draw or replace a route; drawing an equal route again is a no-op
    fn render_route(&mut self, route: &PersistedRoute);
    fn remove_route(&mut self, id: &str);
    fn route_ids(&self) -> Vec<String>;

    fn project(&self, position: GeoPoint) -> Option<ScreenPoint>;
    fn unproject(&self, point: ScreenPoint) -> Option<GeoPoint>;

    fn create_polyline(&mut self, points: &[GeoPoint], style: PolylineStyle)
    -> Option<ObjectHandle>;
    fn remove_object(&mut self, handle: ObjectHandle) -> bool;

    fn set_listener(&mut self, kind: EventKind, listener: Option<NativeListener>);
    fn native_listener_count(&self) -> usize;
    /// Number of native objects (layers, placemarks) currently on the map
    fn native_layer_count(&self) -> usize;

    fn handle_input(&mut self, input: PointerInput);

    /// Remove markers, routes and ad-hoc objects, keeping the map itself
    fn clear(&mut self);

    /// Release listeners and the native map; safe to call twice
    fn destroy(&mut self);

    fn as_offline_mut(&mut self) -> Option<&mut OfflineTileRenderer> {
        None
    }

    fn as_routing_mut(&mut self) -> Option<&mut RoutingRenderer> {
        None
    }
}

/// Poll the host until the container has a non-zero size
///
/// A container missing from the host fails immediately.
pub(crate) async fn wait_for_layout(
    host: Arc<dyn ContainerHost>,
    container_id: &str,
    wait: LayoutWait,
) -> Result<ScreenSize> {
    let attempts = wait.max_attempts.max(1);
    for attempt in 1..=attempts {
        match host.container_size(container_id) {
            None => return Err(InitError::ContainerMissing(container_id.to_string()).into()),
            Some(size) if !size.is_empty() => return Ok(size),
            Some(_) => {
                tracing::trace!(container_id, attempt, "container not laid out yet");
                if attempt < attempts {
                    tokio::time::sleep(wait.interval()).await;
                }
            }
        }
    }
    Err(InitError::ZeroSize {
        container: container_id.to_string(),
        attempts,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticHost;
    use crate::{InitError, MapError};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_context_parsing() {
        assert_eq!("leaflet".parse::<MapContext>().unwrap(), MapContext::OnlineTile);
        assert_eq!("yandex".parse::<MapContext>().unwrap(), MapContext::RoutingProvider);
        assert_eq!("planner".parse::<MapContext>().unwrap(), MapContext::RoutingProvider);
        assert_eq!("Offline".parse::<MapContext>().unwrap(), MapContext::OfflineTile);
        assert!("bing".parse::<MapContext>().is_err());
        for ctx in MapContext::ALL {
            assert_eq!(ctx.as_str().parse::<MapContext>().unwrap(), ctx);
        }
    }

    #[test]
    fn test_listener_table_one_slot_per_kind() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = ListenerTable::default();
        for _ in 0..3 {
            let hits = hits.clone();
            table.set(
                EventKind::Move,
                Some(Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        assert_eq!(table.len(), 1);
        table.emit(&MapEvent::Move {
            center: GeoPoint::default(),
        });
        table.emit(&MapEvent::ZoomStart);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        table.set(EventKind::Move, None);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_layout_polls_until_sized() {
        let host = Arc::new(StaticHost::with_container("map", ScreenSize::new(640.0, 480.0)));
        host.delay_layout("map", 3);
        let size = wait_for_layout(host, "map", LayoutWait::default())
            .await
            .unwrap();
        assert_eq!(size, ScreenSize::new(640.0, 480.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_layout_gives_up() {
        let host = Arc::new(StaticHost::with_container("map", ScreenSize::default()));
        let wait = LayoutWait {
            interval_ms: 10,
            max_attempts: 5,
        };
        let err = wait_for_layout(host, "map", wait).await.unwrap_err();
        assert!(matches!(
            err,
            MapError::Init(InitError::ZeroSize { attempts: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_layout_missing_container() {
        let host = Arc::new(StaticHost::new());
        let err = wait_for_layout(host, "ghost", LayoutWait::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MapError::Init(InitError::ContainerMissing(_))));
    }
}
