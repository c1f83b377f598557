//! The one map API the application talks to
//!
//! [`MapContextFacade`] owns the renderer pool, the event bridge and the tracking
//! session. It keeps the marker and route sets the caller asked for, so switching
//! to another backend (or back) redraws exactly the same content.

use crate::config::{FacadeConfig, MapConfig};
use crate::coords::{Bounds, GeoPoint, ScreenPoint, ScreenSize};
use crate::events::{EventBridge, HandlerResult, SubscriptionId};
use crate::export::{self, ExportFormat, ExportPayload};
use crate::host::{ContainerRef, generate_container_id};
use crate::marker::{self, MapMarker, UnifiedMarker};
use crate::pool::RendererPool;
use crate::renderer::{
    EventKind, MapContext, MapEvent, MapInstanceId, MapRenderer, ObjectHandle,
    OfflineTileRenderer, OnlineTileRenderer, PointerInput, PolylineStyle, RendererHandle,
    RoutingRenderer,
};
use crate::route::{PersistedRoute, TrackedRoute};
use crate::services::{
    DraftKind, FacadeDependencies, FavoritePlace, MapAnalyticsEvent, Notification,
    NotificationLevel, OfflineDraft, PostDraft, SyncReport,
};
use crate::tracking::{TrackingSession, TrackingSubscription};
use crate::{MapError, Result};
use serde_json::json;
use time::OffsetDateTime;

/// Zoom used by `set_center` when none is given
const DEFAULT_CENTER_ZOOM: f64 = 13.0;

/// Progress of the last `initialize`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    /// Message shown to the user
    Failed(String),
}

/// The map API handed out after initialization
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredApi {
    pub context: MapContext,
    pub container_id: String,
    pub map_id: Option<MapInstanceId>,
    /// Registered out of band through `register_background_api`
    pub background: bool,
}

impl RegisteredApi {
    pub fn handle(&self) -> Option<RendererHandle> {
        Some(RendererHandle {
            context: self.context,
            container_id: self.container_id.clone(),
            map_id: self.map_id?,
        })
    }
}

/// Live statistics of the running tracking session
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackingStats {
    pub points: usize,
    /// Meters
    pub distance: f64,
    pub started_at: OffsetDateTime,
}

pub struct MapContextFacade {
    deps: FacadeDependencies,
    config: FacadeConfig,
    active: MapContext,
    online: bool,
    pool: RendererPool,
    bridge: EventBridge,
    /// Markers owned by an outside component, replaced as a whole
    external_markers: Vec<UnifiedMarker>,
    /// Markers added one by one through the facade
    added_markers: Vec<UnifiedMarker>,
    routes: Vec<PersistedRoute>,
    /// Marker set not yet drawn because no renderer was ready
    markers_pending: bool,
    registered: Option<RegisteredApi>,
    background: Option<Box<dyn MapRenderer>>,
    last_init: Option<(String, MapConfig)>,
    load_state: LoadState,
    tracking: Option<TrackingSession>,
}

impl MapContextFacade {
    /// Build a facade and select its default context
    ///
    /// No renderer is bound to a container until `initialize` runs.
    pub fn new(deps: FacadeDependencies, config: FacadeConfig) -> Self {
        let mut facade = Self {
            active: config.default_context,
            online: config.online,
            deps,
            config,
            pool: RendererPool::new(),
            bridge: EventBridge::new(),
            external_markers: Vec::new(),
            added_markers: Vec::new(),
            routes: Vec::new(),
            markers_pending: false,
            registered: None,
            background: None,
            last_init: None,
            load_state: LoadState::Idle,
            tracking: None,
        };
        facade.select_renderer(None);
        facade
    }

    // === Context and mode ===

    pub fn active_context(&self) -> MapContext {
        self.active
    }

    /// Make `context` the active backend; a no-op when it already is
    pub fn set_active_context(&mut self, context: MapContext) {
        if self.active == context {
            return;
        }
        let from = self.active;
        self.active = context;
        tracing::info!(%from, to = %context, "switching map context");
        self.select_renderer(Some(from));
        self.deps
            .analytics
            .track_map_interaction(MapAnalyticsEvent::ContextSwitch { from, to: context });
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Switch between online and offline mode, re-running renderer selection
    pub fn set_online_mode(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;
        tracing::info!(online, "map connectivity changed");
        self.select_renderer(None);
    }

    /// Premium users with at least one downloaded region may use offline tiles
    pub fn is_offline_capable(&self) -> bool {
        self.deps.entitlements.is_premium() && !self.deps.storage.downloaded_regions().is_empty()
    }

    /// Whether the current mode lets `context` have a renderer
    ///
    /// Offline mode only allows offline tiles; offline tiles always need the entitlement.
    fn context_allowed(&self, context: MapContext) -> bool {
        match context {
            MapContext::OfflineTile => self.is_offline_capable(),
            _ => self.online,
        }
    }

    fn create_renderer(&self, context: MapContext) -> Option<Box<dyn MapRenderer>> {
        if !self.context_allowed(context) {
            return None;
        }
        let host = self.deps.host.clone();
        Some(match context {
            MapContext::OnlineTile => Box::new(OnlineTileRenderer::new(host)),
            MapContext::RoutingProvider => {
                Box::new(RoutingRenderer::new(host, self.deps.routing.clone()))
            }
            MapContext::OfflineTile => Box::new(OfflineTileRenderer::new(
                host,
                self.deps.tile_metadata.clone(),
            )),
        })
    }

    /// Pick or create the renderer for the active context, then rebind and redraw
    fn select_renderer(&mut self, previous: Option<MapContext>) {
        if let Some(previous) = previous
            && previous != self.active
            && let Some(renderer) = self.pool.get_mut(previous)
        {
            self.bridge.unbind(renderer);
        }

        let context = self.active;
        if !self.context_allowed(context) && self.pool.evict(context) {
            tracing::debug!(%context, online = self.online, "renderer no longer allowed, evicted");
        }
        if self.pool.checkout(context).is_none() {
            match self.create_renderer(context) {
                Some(renderer) => {
                    tracing::debug!(%context, "creating renderer");
                    self.pool.insert(renderer);
                }
                None => {
                    tracing::info!(%context, online = self.online, "no renderer available for context");
                }
            }
        }

        if let Some(renderer) = self.pool.get_mut(context) {
            self.bridge.bind(renderer);
        }
        self.apply_scene();
    }

    /// Renderer calls go to: the active pooled renderer, else the background one
    fn current(&self) -> Option<&dyn MapRenderer> {
        match self.pool.get(self.active) {
            Some(renderer) => Some(renderer),
            None => self.background.as_deref().filter(|r| r.is_alive()),
        }
    }

    fn current_mut(&mut self) -> Option<&mut (dyn MapRenderer + 'static)> {
        if self.pool.contains(self.active) {
            return self.pool.get_mut(self.active);
        }
        self.background.as_deref_mut().filter(|r| r.is_alive())
    }

    pub fn active_renderer(&self) -> Option<&dyn MapRenderer> {
        self.current()
    }

    pub fn active_renderer_mut(&mut self) -> Option<&mut (dyn MapRenderer + 'static)> {
        self.current_mut()
    }

    pub fn pool(&self) -> &RendererPool {
        &self.pool
    }

    /// Marker set the caller expects to see: external markers first, then added ones
    pub fn desired_markers(&self) -> Vec<UnifiedMarker> {
        let all: Vec<UnifiedMarker> = self
            .external_markers
            .iter()
            .chain(&self.added_markers)
            .cloned()
            .collect();
        marker::dedup_markers(&all)
    }

    /// Whether markers are waiting for a renderer to become ready
    pub fn markers_pending(&self) -> bool {
        self.markers_pending
    }

    /// Draw the desired markers and routes on the current renderer if it is ready
    ///
    /// Used when a renderer is (re)bound. Marker updates go through `apply_markers`
    /// and leave the drawn routes alone.
    fn apply_scene(&mut self) {
        self.draw(true);
    }

    fn apply_markers(&mut self) {
        self.draw(false);
    }

    fn draw(&mut self, with_routes: bool) {
        let markers = self.desired_markers();
        let routes = if with_routes { self.routes.clone() } else { Vec::new() };
        let drawn = match self.current_mut() {
            Some(renderer) if renderer.is_ready() => {
                renderer.render_markers(&markers);
                if with_routes {
                    // routes removed while another renderer was active
                    for id in renderer.route_ids() {
                        if !routes.iter().any(|r| r.id == id) {
                            renderer.remove_route(&id);
                        }
                    }
                    for route in &routes {
                        renderer.render_route(route);
                    }
                }
                true
            }
            _ => false,
        };
        self.markers_pending = !drawn && !markers.is_empty();
        if self.markers_pending {
            tracing::debug!(count = markers.len(), "markers pending until a renderer is ready");
        }
    }

    // === Initialization ===

    /// Bind the context requested by `config` to `container`
    pub async fn initialize(
        &mut self,
        container: impl Into<ContainerRef>,
        config: MapConfig,
    ) -> Result<RendererHandle> {
        let context = config.resolve_context();
        self.set_active_context(context);
        let container_id = self.resolve_container_id(container.into());
        tracing::debug!(%context, container = %container_id, size = ?self.deps.host.container_size(&container_id), "initializing map");
        self.last_init = Some((container_id.clone(), config.clone()));
        self.run_init(container_id, config).await
    }

    /// Initialize again with the container and config of the last attempt
    pub async fn retry_initialize(&mut self) -> Result<RendererHandle> {
        let (container_id, config) = self.last_init.clone().ok_or(MapError::NotInitialized)?;
        self.set_active_context(config.resolve_context());
        self.run_init(container_id, config).await
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    fn resolve_container_id(&self, container: ContainerRef) -> String {
        match container {
            ContainerRef::Id(id) => id,
            ContainerRef::Node(node) => match self.deps.host.element_id(node) {
                Some(id) => id,
                None => {
                    let id = generate_container_id();
                    self.deps.host.assign_element_id(node, &id);
                    id
                }
            },
        }
    }

    /// Handle of the registered API if its map is still alive on `container_id`
    fn live_registered_handle(&self, container_id: &str) -> Option<RendererHandle> {
        let api = self.registered.as_ref()?;
        if api.container_id != container_id {
            return None;
        }
        let owner = if api.background {
            self.background.as_deref()
        } else {
            self.pool.get(api.context)
        };
        let handle = owner.filter(|r| r.is_alive())?.handle()?;
        (Some(handle.map_id) == api.map_id).then_some(handle)
    }

    async fn run_init(&mut self, container_id: String, config: MapConfig) -> Result<RendererHandle> {
        if config.preserve_state
            && let Some(handle) = self.live_registered_handle(&container_id)
        {
            tracing::debug!(container = %container_id, "reusing preserved map");
            self.load_state = LoadState::Ready;
            return Ok(handle);
        }

        self.load_state = LoadState::Loading;
        let context = self.active;
        let result = match self.pool.checkout(context) {
            Some(renderer) => renderer.init(&container_id, &config).await,
            None => Err(MapError::RendererUnavailable(context)),
        };
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(%context, container = %container_id, error = %e, "map initialization failed");
                self.load_state = LoadState::Failed(e.to_string());
                return Err(e);
            }
        };

        self.pool.bind_container(context, &container_id);
        if self
            .background
            .as_ref()
            .and_then(|r| r.handle())
            .is_some_and(|h| h.container_id == container_id)
            && let Some(mut stale) = self.background.take()
        {
            tracing::debug!(container = %container_id, "container taken over, destroying background map");
            stale.destroy();
        }
        self.registered = Some(RegisteredApi {
            context,
            container_id: container_id.clone(),
            map_id: Some(handle.map_id),
            background: false,
        });

        if let Some(renderer) = self.pool.get_mut(context) {
            self.bridge.bind(renderer);
        }
        for m in config.markers {
            upsert_marker(&mut self.added_markers, m);
        }
        self.apply_scene();
        self.load_state = LoadState::Ready;
        tracing::info!(%context, container = %container_id, "map initialized");
        Ok(handle)
    }

    /// Hand over a map created outside the facade
    ///
    /// Helpers fall back to it while no pooled renderer is active.
    pub fn register_background_api(&mut self, renderer: Box<dyn MapRenderer>, container_id: &str) {
        if let Some(mut previous) = self.background.take() {
            previous.destroy();
        }
        self.registered = Some(RegisteredApi {
            context: renderer.context(),
            container_id: container_id.to_string(),
            map_id: renderer.handle().map(|h| h.map_id),
            background: true,
        });
        self.background = Some(renderer);
        tracing::debug!(container = container_id, "background map registered");
    }

    pub fn registered_api(&self) -> Option<&RegisteredApi> {
        self.registered.as_ref()
    }

    // === Events ===

    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl Fn(&MapEvent) -> HandlerResult + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.bridge.subscribe(kind, handler);
        self.rebind();
        id
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let removed = self.bridge.unsubscribe(id);
        if removed {
            self.rebind();
        }
        removed
    }

    fn rebind(&mut self) {
        if let Some(renderer) = self.pool.get_mut(self.active) {
            self.bridge.bind(renderer);
        }
    }

    pub fn event_bridge(&self) -> &EventBridge {
        &self.bridge
    }

    // === Markers ===

    /// Replace the externally owned marker set, diffed against what is drawn
    pub fn set_external_markers(&mut self, markers: Vec<UnifiedMarker>) {
        self.external_markers = marker::dedup_markers(&markers);
        self.apply_markers();
    }

    /// Add or update a single marker, returning its id
    pub fn add_marker(&mut self, marker: MapMarker) -> String {
        let unified = UnifiedMarker::from(marker);
        let id = unified.id.clone();
        upsert_marker(&mut self.added_markers, unified);
        self.apply_markers();
        id
    }

    pub fn remove_marker(&mut self, id: &str) {
        self.external_markers.retain(|m| m.id != id);
        self.added_markers.retain(|m| m.id != id);
        if let Some(renderer) = self.current_mut() {
            renderer.remove_marker(id);
        }
    }

    // === Routes ===

    pub fn display_route(&mut self, route: PersistedRoute) {
        self.routes.retain(|r| r.id != route.id);
        if let Some(renderer) = self.current_mut() {
            renderer.render_route(&route);
        }
        self.routes.push(route);
    }

    pub fn remove_route(&mut self, id: &str) {
        self.routes.retain(|r| r.id != id);
        if let Some(renderer) = self.current_mut() {
            renderer.remove_route(id);
        }
    }

    /// Plan a route with the routing provider and save it
    ///
    /// Only available online with the routing context active.
    pub async fn plan_route(&mut self, waypoints: Vec<GeoPoint>) -> Result<PersistedRoute> {
        if self.active != MapContext::RoutingProvider || !self.online {
            return Err(MapError::PlanningUnavailable);
        }
        let route = match self
            .pool
            .get_mut(MapContext::RoutingProvider)
            .and_then(|r| r.as_routing_mut())
        {
            Some(routing) => routing.plan_route(&waypoints).await,
            None => return Err(MapError::PlanningUnavailable),
        };
        self.save_route(route.clone()).await?;
        Ok(route)
    }

    pub async fn save_route(&self, route: PersistedRoute) -> Result<()> {
        self.deps.storage.save_route(route).await?;
        Ok(())
    }

    // === View ===

    pub fn set_view(&mut self, center: GeoPoint, zoom: f64) {
        if let Some(renderer) = self.current_mut() {
            renderer.set_view(center, zoom);
        }
    }

    pub fn set_center(&mut self, center: GeoPoint, zoom: Option<f64>) {
        self.set_view(center, zoom.unwrap_or(DEFAULT_CENTER_ZOOM));
    }

    /// Move to `center`, keeping the current zoom unless one is given
    pub fn fly_to(&mut self, center: GeoPoint, zoom: Option<f64>) {
        let zoom = zoom.or_else(|| self.zoom()).unwrap_or(DEFAULT_CENTER_ZOOM);
        self.set_view(center, zoom);
    }

    pub fn fit_bounds(&mut self, bounds: Bounds, padding: f64) {
        if let Some(renderer) = self.current_mut() {
            renderer.fit_bounds(bounds, padding);
        }
    }

    /// Restrict panning to `bounds`, or lift the restriction with `None`
    pub fn limit_bounds(&mut self, bounds: Option<Bounds>) {
        if let Some(renderer) = self.current_mut() {
            renderer.set_max_bounds(bounds);
        }
    }

    pub fn center(&self) -> Option<GeoPoint> {
        self.current()?.view().map(|(center, _)| center)
    }

    pub fn zoom(&self) -> Option<f64> {
        self.current()?.view().map(|(_, zoom)| zoom)
    }

    pub fn size(&self) -> Option<ScreenSize> {
        self.current()?.size()
    }

    pub fn visible_bounds(&self) -> Option<Bounds> {
        self.current()?.visible_bounds()
    }

    pub fn project(&self, position: GeoPoint) -> Option<ScreenPoint> {
        self.current()?.project(position)
    }

    pub fn unproject(&self, point: ScreenPoint) -> Option<GeoPoint> {
        self.current()?.unproject(point)
    }

    pub fn create_polyline(
        &mut self,
        points: &[GeoPoint],
        style: PolylineStyle,
    ) -> Option<ObjectHandle> {
        self.current_mut()?.create_polyline(points, style)
    }

    /// Remove an object created earlier; stale handles are ignored
    pub fn remove_object(&mut self, handle: ObjectHandle) -> bool {
        self.current_mut()
            .is_some_and(|renderer| renderer.remove_object(handle))
    }

    /// Forward host pointer input to the current renderer
    pub fn dispatch_input(&mut self, input: PointerInput) {
        if let Some(renderer) = self.current_mut() {
            renderer.handle_input(input);
        }
    }

    /// Remove markers, routes and objects
    ///
    /// With `force` the active renderer is destroyed and the registered API dropped.
    pub fn clear(&mut self, force: bool) {
        self.external_markers.clear();
        self.added_markers.clear();
        self.routes.clear();
        self.markers_pending = false;
        if force {
            if !self.pool.evict(self.active)
                && let Some(mut background) = self.background.take()
            {
                background.destroy();
            }
            self.registered = None;
            self.load_state = LoadState::Idle;
            tracing::debug!(context = %self.active, "map cleared and renderer destroyed");
        } else if let Some(renderer) = self.current_mut() {
            renderer.clear();
        }
    }

    /// Swap the offline tileset on the live offline map
    pub async fn switch_tileset(&mut self, tileset: &str) -> Result<()> {
        let renderer = self
            .pool
            .get_mut(self.active)
            .and_then(|r| r.as_offline_mut())
            .ok_or_else(|| MapError::Capability("tileset switching needs the offline map".into()))?;
        renderer.switch_tileset(tileset).await
    }

    // === Favorites ===

    pub fn add_favorite(&self, place: FavoritePlace) -> Result<()> {
        let id = place.id.clone();
        self.deps.storage.add_favorite(place)?;
        self.deps
            .analytics
            .track_map_interaction(MapAnalyticsEvent::FavoriteAdded { id });
        Ok(())
    }

    pub fn favorites(&self) -> Vec<FavoritePlace> {
        self.deps.storage.favorites()
    }

    pub fn remove_favorite(&self, id: &str) -> Result<()> {
        Ok(self.deps.storage.remove_favorite(id)?)
    }

    // === Regions ===

    pub async fn download_region(&self, region_id: &str) -> Result<()> {
        if !self.deps.entitlements.is_premium() {
            return Err(MapError::Permission("Region download".into()));
        }
        self.deps.storage.download_region(region_id).await?;
        tracing::info!(region = region_id, "region downloaded");
        Ok(())
    }

    pub fn downloaded_regions(&self) -> Vec<String> {
        self.deps.storage.downloaded_regions()
    }

    pub async fn delete_region(&self, region_id: &str) -> Result<()> {
        Ok(self.deps.storage.delete_region(region_id).await?)
    }

    // === Offline drafts and posts ===

    pub async fn save_offline_draft(
        &self,
        kind: DraftKind,
        payload: serde_json::Value,
    ) -> Result<String> {
        Ok(self.deps.drafts.save_draft(kind, payload).await?)
    }

    pub async fn offline_drafts(&self, kind: Option<DraftKind>) -> Result<Vec<OfflineDraft>> {
        Ok(self.deps.drafts.drafts(kind).await?)
    }

    pub async fn sync_all_offline_content(&self) -> Result<SyncReport> {
        let report = self.deps.drafts.sync_all().await?;
        tracing::info!(synced = report.synced, failed = report.failed, "offline content synced");
        Ok(report)
    }

    /// Publish a post, or queue it as a draft while offline
    ///
    /// Returns the draft id offline and the moderation id online.
    pub async fn create_post(&self, post: PostDraft) -> Result<String> {
        if !self.online {
            let payload = serde_json::to_value(&post)?;
            return self.save_offline_draft(DraftKind::Post, payload).await;
        }
        let id = self.deps.moderation.submit_post(&post).await?;
        if let Err(e) = self
            .register_gamified_action("create_post", json!({ "hasPhoto": !post.photos.is_empty() }))
            .await
        {
            tracing::warn!(error = %e, "post gamification skipped");
        }
        self.deps
            .activity
            .record_activity("post_created", json!({ "coordinates": post.coordinates }));
        Ok(id)
    }

    pub fn attach_geo_to_post(&self, post_id: &str, coordinates: GeoPoint) {
        self.deps
            .analytics
            .track_map_interaction(MapAnalyticsEvent::GeoAttached {
                post_id: post_id.to_string(),
                context: self.active,
                coordinates,
            });
    }

    pub async fn register_gamified_action(
        &self,
        action: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        if self.deps.gamification.is_rate_limited(action) {
            return Err(MapError::RateLimited(action.to_string()));
        }
        Ok(self.deps.gamification.record_action(action, metadata).await?)
    }

    pub fn track_map_event(&self, event: MapAnalyticsEvent) {
        self.deps.analytics.track_map_interaction(event);
    }

    // === Tracking ===

    /// Start recording, or return the running session's subscription
    pub fn start_tracking(&mut self) -> Result<TrackingSubscription> {
        if !self.deps.entitlements.is_premium() {
            return Err(MapError::Permission("GPS tracking".into()));
        }
        if let Some(session) = &self.tracking {
            return Ok(session.subscription());
        }
        let geolocation = self
            .deps
            .geolocation
            .clone()
            .ok_or_else(|| MapError::Capability("geolocation".into()))?;
        let session = TrackingSession::start(
            geolocation.as_ref(),
            self.config.tracking,
            self.deps.notifier.clone(),
        )?;
        let subscription = session.subscription();
        self.tracking = Some(session);
        Ok(subscription)
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_some()
    }

    pub fn tracking_stats(&self) -> Option<TrackingStats> {
        let session = self.tracking.as_ref()?;
        let (points, distance) = session.progress();
        Some(TrackingStats {
            points,
            distance,
            started_at: session.started_at(),
        })
    }

    /// Finish the session and persist the track
    ///
    /// The track is queued as an offline draft; if that fails it is saved as a
    /// route instead. Either way the finished track is returned.
    pub async fn stop_tracking(&mut self) -> Result<TrackedRoute> {
        let session = self.tracking.take().ok_or(MapError::NotActive)?;
        let track = session.finish();

        let payload = json!({
            "id": track.id,
            "track": serde_json::to_value(&track)?,
            "isTracked": true,
        });
        match self.deps.drafts.save_draft(DraftKind::Route, payload).await {
            Ok(_) => {
                self.deps.notifier.notify(Notification::new(
                    NotificationLevel::Info,
                    "Track saved",
                    format!("Distance {:.2} km", track.distance_km()),
                ));
                let metadata = json!({
                    "trackId": track.id,
                    "distance": track.distance,
                    "isTracked": true,
                });
                if let Err(e) = self.register_gamified_action("track_recorded", metadata).await {
                    tracing::warn!(id = %track.id, error = %e, "track gamification skipped");
                }
            }
            Err(e) => {
                tracing::error!(id = %track.id, error = %e, "failed to queue track draft, saving as route");
                if let Err(e) = self.deps.storage.save_route(PersistedRoute::from(&track)).await {
                    tracing::debug!(id = %track.id, error = %e, "route fallback failed");
                }
            }
        }
        self.deps
            .analytics
            .track_map_interaction(MapAnalyticsEvent::TrackRecorded {
                id: track.id.clone(),
                distance: track.distance,
            });
        Ok(track)
    }

    // === Export ===

    /// Serialize a track; premium only
    pub fn export_track(&self, track: &TrackedRoute, format: ExportFormat) -> Result<ExportPayload> {
        if !self.deps.entitlements.is_premium() {
            return Err(MapError::Permission("Track export".into()));
        }
        let payload = export::export_track(track, format)?;
        self.deps
            .analytics
            .track_map_interaction(MapAnalyticsEvent::TrackExported {
                id: track.id.clone(),
                format,
            });
        Ok(payload)
    }

    // === Teardown ===

    /// Stop tracking and destroy every renderer
    pub fn shutdown(&mut self) {
        if let Some(session) = self.tracking.take() {
            session.subscription().cancel();
        }
        self.pool.shutdown();
        if let Some(mut background) = self.background.take() {
            background.destroy();
        }
        self.registered = None;
        self.load_state = LoadState::Idle;
        tracing::info!("map facade shut down");
    }
}

fn upsert_marker(markers: &mut Vec<UnifiedMarker>, marker: UnifiedMarker) {
    match markers.iter_mut().find(|m| m.id == marker.id) {
        Some(existing) => *existing = marker,
        None => markers.push(marker),
    }
}

impl std::fmt::Debug for MapContextFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapContextFacade")
            .field("active", &self.active)
            .field("online", &self.online)
            .field("pool", &self.pool)
            .field("load_state", &self.load_state)
            .field("tracking", &self.tracking.is_some())
            .finish()
    }
}
