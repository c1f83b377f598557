//! Layer scene shared by the tile-based adapters
//!
//! The tile engines keep every drawable as a layer with a numeric id: tile layers,
//! markers, polylines and rectangles. Markers and routes are indexed by their own ids
//! so repeated renders update layers in place instead of recreating them.

use super::native::{NativeMap, Projection};
use super::{
    EventKind, ListenerTable, MapContext, MapEvent, NativeListener, ObjectHandle, PointerInput,
    PolylineStyle, RendererHandle, wait_for_layout,
};
use crate::config::MapConfig;
use crate::coords::{self, Bounds, GeoPoint, ScreenPoint, ScreenSize};
use crate::host::ContainerHost;
use crate::marker::{self, UnifiedMarker};
use crate::route::PersistedRoute;
use crate::{InitError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use walkers::{TileId, sources::TileSource};

pub(crate) type LayerId = u64;

pub(crate) struct TileLayer {
    pub name: String,
    pub source: Box<dyn TileSource + Send + Sync>,
    pub opacity: f32,
}

pub(crate) enum Layer {
    Tiles(TileLayer),
    Marker(UnifiedMarker),
    Polyline {
        points: Vec<GeoPoint>,
        style: PolylineStyle,
    },
    Rectangle {
        bounds: Bounds,
        style: PolylineStyle,
    },
}

pub(crate) struct TileScene {
    pub map: NativeMap,
    layers: BTreeMap<LayerId, Layer>,
    next_layer: LayerId,
    markers: HashMap<String, UnifiedMarker>,
    marker_layers: HashMap<String, LayerId>,
    routes: HashMap<String, (LayerId, PersistedRoute)>,
    objects: HashSet<LayerId>,
}

impl TileScene {
    pub fn new(map: NativeMap) -> Self {
        Self {
            map,
            layers: BTreeMap::new(),
            next_layer: 1,
            markers: HashMap::new(),
            marker_layers: HashMap::new(),
            routes: HashMap::new(),
            objects: HashSet::new(),
        }
    }

    pub fn add_layer(&mut self, layer: Layer) -> LayerId {
        let id = self.next_layer;
        self.next_layer += 1;
        self.layers.insert(id, layer);
        id
    }

    pub fn remove_layer(&mut self, id: LayerId) -> bool {
        self.layers.remove(&id).is_some()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn tile_layers(&self) -> impl Iterator<Item = (LayerId, &TileLayer)> {
        self.layers.iter().filter_map(|(id, layer)| match layer {
            Layer::Tiles(tiles) => Some((*id, tiles)),
            _ => None,
        })
    }

    pub fn render_markers(&mut self, desired: &[UnifiedMarker]) {
        let diff = marker::diff_markers(&self.markers, desired);
        if diff.is_empty() {
            return;
        }
        tracing::debug!(
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "applying marker diff"
        );
        for id in &diff.removed {
            self.remove_marker(id);
        }
        for m in diff.updated {
            if let Some(layer_id) = self.marker_layers.get(&m.id).copied() {
                self.layers.insert(layer_id, Layer::Marker(m.clone()));
            }
            self.markers.insert(m.id.clone(), m);
        }
        for m in diff.added {
            let layer_id = self.add_layer(Layer::Marker(m.clone()));
            self.marker_layers.insert(m.id.clone(), layer_id);
            self.markers.insert(m.id.clone(), m);
        }
    }

    pub fn remove_marker(&mut self, id: &str) {
        if let Some(layer_id) = self.marker_layers.remove(id) {
            self.layers.remove(&layer_id);
        }
        self.markers.remove(id);
    }

    pub fn marker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.markers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn render_route(&mut self, route: &PersistedRoute) {
        if let Some((_, existing)) = self.routes.get(&route.id)
            && existing == route
        {
            return;
        }
        let layer = Layer::Polyline {
            points: route.path().to_vec(),
            style: PolylineStyle::default(),
        };
        match self.routes.get(&route.id).map(|(id, _)| *id) {
            Some(layer_id) => {
                self.layers.insert(layer_id, layer);
                self.routes.insert(route.id.clone(), (layer_id, route.clone()));
            }
            None => {
                let layer_id = self.add_layer(layer);
                self.routes.insert(route.id.clone(), (layer_id, route.clone()));
            }
        }
    }

    pub fn remove_route(&mut self, id: &str) {
        if let Some((layer_id, _)) = self.routes.remove(id) {
            self.layers.remove(&layer_id);
        }
    }

    pub fn route_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.routes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn create_polyline(&mut self, points: &[GeoPoint], style: PolylineStyle) -> LayerId {
        let id = self.add_layer(Layer::Polyline {
            points: points.to_vec(),
            style,
        });
        self.objects.insert(id);
        id
    }

    pub fn remove_object(&mut self, id: LayerId) -> bool {
        self.objects.remove(&id) && self.remove_layer(id)
    }

    /// Drop markers, routes and ad-hoc objects; tile layers and overlays stay
    pub fn clear(&mut self) {
        for (_, layer_id) in self.marker_layers.drain() {
            self.layers.remove(&layer_id);
        }
        self.markers.clear();
        for (_, (layer_id, _)) in self.routes.drain() {
            self.layers.remove(&layer_id);
        }
        for layer_id in self.objects.drain() {
            self.layers.remove(&layer_id);
        }
    }

    /// Tiles of one tile layer covering the current viewport
    pub fn visible_tiles(&self, layer_id: LayerId) -> Vec<TileId> {
        let Some(Layer::Tiles(tiles)) = self.layers.get(&layer_id) else {
            return Vec::new();
        };
        let zoom = self
            .map
            .zoom()
            .floor()
            .clamp(0.0, tiles.source.max_zoom() as f64) as u8;
        let bounds = self.map.visible_bounds();
        let nw = coords::meters_to_world_px(
            coords::wgs84_to_mercator(bounds.north_east.lat, bounds.south_west.lon),
            zoom as f64,
        );
        let se = coords::meters_to_world_px(
            coords::wgs84_to_mercator(bounds.south_west.lat, bounds.north_east.lon),
            zoom as f64,
        );
        let max_index = (1u32 << zoom) - 1;
        let to_index = |px: f64| ((px / coords::TILE_SIZE).floor().max(0.0) as u32).min(max_index);

        let mut tiles_out = Vec::new();
        for y in to_index(nw.y)..=to_index(se.y) {
            for x in to_index(nw.x)..=to_index(se.x) {
                tiles_out.push(TileId { x, y, zoom });
            }
        }
        tiles_out
    }

    pub fn visible_tile_urls(&self, layer_id: LayerId) -> Vec<String> {
        match self.layers.get(&layer_id) {
            Some(Layer::Tiles(tiles)) => self
                .visible_tiles(layer_id)
                .into_iter()
                .map(|tile| tiles.source.tile_url(tile))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// State common to both tile adapters
pub(crate) struct TileCore {
    pub context: MapContext,
    pub host: Arc<dyn ContainerHost>,
    pub alive: bool,
    pub listeners: ListenerTable,
    pub scene: Option<TileScene>,
}

impl TileCore {
    pub fn new(context: MapContext, host: Arc<dyn ContainerHost>) -> Self {
        Self {
            context,
            host,
            alive: true,
            listeners: ListenerTable::default(),
            scene: None,
        }
    }

    /// Replace any existing native map with a fresh one bound to `container_id`
    pub async fn attach(
        &mut self,
        container_id: &str,
        config: &MapConfig,
        max_zoom: f64,
        default_center: GeoPoint,
        default_zoom: f64,
    ) -> Result<()> {
        if !self.alive {
            return Err(InitError::RendererUnavailable(self.context).into());
        }
        if let Some(previous) = self.scene.take() {
            tracing::debug!(
                context = %self.context,
                container = %previous.map.container_id,
                "tearing down previous native map"
            );
        }
        let size = wait_for_layout(self.host.clone(), container_id, config.layout).await?;
        let map = NativeMap::new(
            container_id,
            size,
            Projection::SphericalMercator,
            max_zoom,
            config.center.unwrap_or(default_center),
            config.zoom.unwrap_or(default_zoom),
        );
        self.scene = Some(TileScene::new(map));
        Ok(())
    }

    pub fn handle(&self) -> Option<RendererHandle> {
        let scene = self.scene.as_ref()?;
        Some(RendererHandle {
            context: self.context,
            container_id: scene.map.container_id.clone(),
            map_id: scene.map.id,
        })
    }

    pub fn scene(&self) -> Option<&TileScene> {
        self.scene.as_ref().filter(|_| self.alive)
    }

    pub fn scene_mut(&mut self) -> Option<&mut TileScene> {
        if !self.alive {
            return None;
        }
        self.scene.as_mut()
    }

    pub fn set_view(&mut self, center: GeoPoint, zoom: f64) {
        if let Some(scene) = self.scene.as_mut() {
            let events = scene.map.set_view(center, zoom);
            self.listeners.emit_all(events);
        }
    }

    pub fn view(&self) -> Option<(GeoPoint, f64)> {
        self.scene().map(|s| (s.map.center(), s.map.zoom()))
    }

    pub fn size(&self) -> Option<ScreenSize> {
        self.scene().map(|s| s.map.size())
    }

    pub fn visible_bounds(&self) -> Option<Bounds> {
        self.scene().map(|s| s.map.visible_bounds())
    }

    pub fn set_max_bounds(&mut self, bounds: Option<Bounds>) {
        if let Some(scene) = self.scene.as_mut() {
            let events = scene.map.set_max_bounds(bounds);
            self.listeners.emit_all(events);
        }
    }

    pub fn fit_bounds(&mut self, bounds: Bounds, padding: f64) {
        if let Some(scene) = self.scene.as_mut() {
            let events = scene.map.fit_bounds(bounds, padding);
            self.listeners.emit_all(events);
        }
    }

    pub fn project(&self, position: GeoPoint) -> Option<ScreenPoint> {
        self.scene().map(|s| s.map.project(position))
    }

    pub fn unproject(&self, point: ScreenPoint) -> Option<GeoPoint> {
        self.scene().map(|s| s.map.unproject(point))
    }

    pub fn create_polyline(
        &mut self,
        points: &[GeoPoint],
        style: PolylineStyle,
    ) -> Option<ObjectHandle> {
        let context = self.context;
        let scene = self.scene_mut()?;
        let id = scene.create_polyline(points, style);
        Some(ObjectHandle {
            context,
            map_id: scene.map.id,
            id,
        })
    }

    pub fn remove_object(&mut self, handle: ObjectHandle) -> bool {
        let context = self.context;
        match self.scene_mut() {
            Some(scene) if handle.context == context && handle.map_id == scene.map.id => {
                scene.remove_object(handle.id)
            }
            _ => false,
        }
    }

    pub fn set_listener(&mut self, kind: EventKind, listener: Option<NativeListener>) {
        if self.alive {
            self.listeners.set(kind, listener);
        }
    }

    pub fn handle_input(&mut self, input: PointerInput) {
        let Some(scene) = self.scene.as_mut() else {
            return;
        };
        let events = match input {
            PointerInput::Click(screen) => vec![MapEvent::Click {
                position: scene.map.unproject(screen),
                screen,
            }],
            PointerInput::Drag { dx, dy } => scene.map.pan_by(dx, dy),
            PointerInput::Scroll { delta, anchor } => scene.map.zoom_around(delta, anchor),
        };
        self.listeners.emit_all(events);
    }

    pub fn destroy(&mut self) {
        if !self.alive {
            return;
        }
        tracing::debug!(context = %self.context, "destroying renderer");
        self.listeners.clear();
        self.scene = None;
        self.alive = false;
    }
}

/// Trait methods that both tile adapters forward to their [`TileCore`]
macro_rules! forward_tile_core {
    () => {
        fn handle(&self) -> Option<$crate::renderer::RendererHandle> {
            self.core.handle()
        }

        fn is_alive(&self) -> bool {
            self.core.alive
        }

        fn set_view(&mut self, center: $crate::coords::GeoPoint, zoom: f64) {
            self.core.set_view(center, zoom)
        }

        fn view(&self) -> Option<($crate::coords::GeoPoint, f64)> {
            self.core.view()
        }

        fn size(&self) -> Option<$crate::coords::ScreenSize> {
            self.core.size()
        }

        fn visible_bounds(&self) -> Option<$crate::coords::Bounds> {
            self.core.visible_bounds()
        }

        fn set_max_bounds(&mut self, bounds: Option<$crate::coords::Bounds>) {
            self.core.set_max_bounds(bounds)
        }

        fn fit_bounds(&mut self, bounds: $crate::coords::Bounds, padding: f64) {
            self.core.fit_bounds(bounds, padding)
        }

        fn render_markers(&mut self, markers: &[$crate::marker::UnifiedMarker]) {
            if let Some(scene) = self.core.scene_mut() {
                scene.render_markers(markers);
            }
        }

        fn remove_marker(&mut self, id: &str) {
            if let Some(scene) = self.core.scene_mut() {
                scene.remove_marker(id);
            }
        }

        fn marker_ids(&self) -> Vec<String> {
            self.core.scene().map(|s| s.marker_ids()).unwrap_or_default()
        }

        fn render_route(&mut self, route: &$crate::route::PersistedRoute) {
            if let Some(scene) = self.core.scene_mut() {
                scene.render_route(route);
            }
        }

        fn remove_route(&mut self, id: &str) {
            if let Some(scene) = self.core.scene_mut() {
                scene.remove_route(id);
            }
        }

        fn route_ids(&self) -> Vec<String> {
            self.core.scene().map(|s| s.route_ids()).unwrap_or_default()
        }

        fn project(
            &self,
            position: $crate::coords::GeoPoint,
        ) -> Option<$crate::coords::ScreenPoint> {
            self.core.project(position)
        }

        fn unproject(
            &self,
            point: $crate::coords::ScreenPoint,
        ) -> Option<$crate::coords::GeoPoint> {
            self.core.unproject(point)
        }

        fn create_polyline(
            &mut self,
            points: &[$crate::coords::GeoPoint],
            style: $crate::renderer::PolylineStyle,
        ) -> Option<$crate::renderer::ObjectHandle> {
            self.core.create_polyline(points, style)
        }

        fn remove_object(&mut self, handle: $crate::renderer::ObjectHandle) -> bool {
            self.core.remove_object(handle)
        }

        fn set_listener(
            &mut self,
            kind: $crate::renderer::EventKind,
            listener: Option<$crate::renderer::NativeListener>,
        ) {
            self.core.set_listener(kind, listener)
        }

        fn native_listener_count(&self) -> usize {
            self.core.listeners.len()
        }

        fn native_layer_count(&self) -> usize {
            self.core.scene().map(|s| s.layer_count()).unwrap_or(0)
        }

        fn handle_input(&mut self, input: $crate::renderer::PointerInput) {
            self.core.handle_input(input)
        }

        fn clear(&mut self) {
            if let Some(scene) = self.core.scene_mut() {
                scene.clear();
            }
        }
    };
}

pub(crate) use forward_tile_core;

#[cfg(test)]
mod tests {
    use super::*;
    use walkers::sources::OpenStreetMap;

    fn scene() -> TileScene {
        TileScene::new(NativeMap::new(
            "map",
            ScreenSize::new(512.0, 512.0),
            Projection::SphericalMercator,
            19.0,
            GeoPoint::new(0.0, 0.0),
            2.0,
        ))
    }

    fn marker(id: &str, lat: f64) -> UnifiedMarker {
        UnifiedMarker::new(id, GeoPoint::new(lat, 10.0))
    }

    #[test]
    fn test_markers_update_in_place() {
        let mut s = scene();
        s.render_markers(&[marker("a", 1.0), marker("b", 2.0)]);
        assert_eq!(s.layer_count(), 2);
        let layer_a = s.marker_layers["a"];

        s.render_markers(&[marker("a", 1.5), marker("b", 2.0)]);
        assert_eq!(s.layer_count(), 2);
        assert_eq!(s.marker_layers["a"], layer_a);
        assert!(matches!(s.layer(layer_a), Some(Layer::Marker(m)) if m.coordinates.lat == 1.5));

        s.render_markers(&[marker("b", 2.0)]);
        assert_eq!(s.marker_ids(), vec!["b".to_string()]);
        assert_eq!(s.layer_count(), 1);
    }

    #[test]
    fn test_equal_route_is_noop() {
        let mut s = scene();
        let route = PersistedRoute::new(
            "r",
            vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)],
            None,
        );
        s.render_route(&route);
        let before = s.routes["r"].0;
        s.render_route(&route);
        assert_eq!(s.routes["r"].0, before);
        assert_eq!(s.layer_count(), 1);
    }

    #[test]
    fn test_clear_keeps_tile_layers() {
        let mut s = scene();
        s.add_layer(Layer::Tiles(TileLayer {
            name: "osm".into(),
            source: Box::new(OpenStreetMap),
            opacity: 1.0,
        }));
        s.render_markers(&[marker("a", 1.0)]);
        let object = s.create_polyline(&[GeoPoint::default()], PolylineStyle::default());
        assert_eq!(s.layer_count(), 3);
        s.clear();
        assert_eq!(s.layer_count(), 1);
        assert!(!s.remove_object(object));
    }

    #[test]
    fn test_visible_tiles_cover_world_at_low_zoom() {
        let mut s = scene();
        let layer = s.add_layer(Layer::Tiles(TileLayer {
            name: "osm".into(),
            source: Box::new(OpenStreetMap),
            opacity: 1.0,
        }));
        // 512 px viewport at zoom 1 shows the whole 2x2 tile world
        s.map.set_view(GeoPoint::new(0.0, 0.0), 1.0);
        let tiles = s.visible_tiles(layer);
        assert_eq!(tiles.len(), 4);
        let urls = s.visible_tile_urls(layer);
        assert!(urls.contains(&"https://tile.openstreetmap.org/1/0/0.png".to_string()));
    }
}
