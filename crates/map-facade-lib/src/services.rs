//! Collaborator interfaces consumed by the facade
//!
//! The facade never reaches for globals: everything it talks to is injected through
//! [`FacadeDependencies`]. Every trait has a harmless default so a facade can be built
//! with only the collaborators a caller cares about. The in-memory implementations in
//! this module back headless use and tests.

use crate::coords::GeoPoint;
use crate::export::ExportFormat;
use crate::host::{ContainerHost, StaticHost};
use crate::renderer::MapContext;
use crate::route::PersistedRoute;
use crate::tiles::TileMetadataSource;
use crate::tracking::Geolocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;

/// Failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// === Entitlements ===

pub trait Entitlements: Send + Sync {
    fn is_premium(&self) -> bool;
}

/// Fixed entitlement, switchable at runtime
#[derive(Debug, Default)]
pub struct StaticEntitlements(AtomicBool);

impl StaticEntitlements {
    pub fn new(premium: bool) -> Self {
        Self(AtomicBool::new(premium))
    }

    pub fn set_premium(&self, premium: bool) {
        self.0.store(premium, Ordering::SeqCst);
    }
}

impl Entitlements for StaticEntitlements {
    fn is_premium(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// === Storage ===

/// A place the user pinned
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FavoritePlace {
    pub id: String,
    pub name: Option<String>,
    pub position: GeoPoint,
    /// `marker`, `route` or `event`
    pub kind: String,
}

#[async_trait]
pub trait MapStorage: Send + Sync {
    fn downloaded_regions(&self) -> Vec<String>;
    async fn download_region(&self, region_id: &str) -> ServiceResult<()>;
    async fn delete_region(&self, region_id: &str) -> ServiceResult<()>;

    fn favorites(&self) -> Vec<FavoritePlace>;
    fn add_favorite(&self, place: FavoritePlace) -> ServiceResult<()>;
    fn remove_favorite(&self, id: &str) -> ServiceResult<()>;

    async fn save_route(&self, route: PersistedRoute) -> ServiceResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    regions: Mutex<Vec<String>>,
    favorites: Mutex<Vec<FavoritePlace>>,
    routes: Mutex<Vec<PersistedRoute>>,
}

impl MemoryStorage {
    pub fn with_regions(regions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let storage = Self::default();
        lock(&storage.regions).extend(regions.into_iter().map(Into::into));
        storage
    }

    pub fn routes(&self) -> Vec<PersistedRoute> {
        lock(&self.routes).clone()
    }
}

#[async_trait]
impl MapStorage for MemoryStorage {
    fn downloaded_regions(&self) -> Vec<String> {
        lock(&self.regions).clone()
    }

    async fn download_region(&self, region_id: &str) -> ServiceResult<()> {
        let mut regions = lock(&self.regions);
        if !regions.iter().any(|r| r == region_id) {
            regions.push(region_id.to_string());
        }
        Ok(())
    }

    async fn delete_region(&self, region_id: &str) -> ServiceResult<()> {
        lock(&self.regions).retain(|r| r != region_id);
        Ok(())
    }

    fn favorites(&self) -> Vec<FavoritePlace> {
        lock(&self.favorites).clone()
    }

    fn add_favorite(&self, place: FavoritePlace) -> ServiceResult<()> {
        let mut favorites = lock(&self.favorites);
        favorites.retain(|f| f.id != place.id);
        favorites.push(place);
        Ok(())
    }

    fn remove_favorite(&self, id: &str) -> ServiceResult<()> {
        lock(&self.favorites).retain(|f| f.id != id);
        Ok(())
    }

    async fn save_route(&self, route: PersistedRoute) -> ServiceResult<()> {
        let mut routes = lock(&self.routes);
        routes.retain(|r| r.id != route.id);
        routes.push(route);
        Ok(())
    }
}

// === Offline drafts ===

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftKind {
    Route,
    Post,
    Marker,
    Event,
}

impl DraftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftKind::Route => "route",
            DraftKind::Post => "post",
            DraftKind::Marker => "marker",
            DraftKind::Event => "event",
        }
    }
}

/// Content queued while offline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfflineDraft {
    pub id: String,
    pub kind: DraftKind,
    pub payload: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl OfflineDraft {
    pub fn new(kind: DraftKind, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

/// Offline content queue; only its save/list/sync contract is used here
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Queue a draft, returning its id
    async fn save_draft(&self, kind: DraftKind, payload: serde_json::Value)
    -> ServiceResult<String>;
    /// Pending drafts, optionally restricted to one kind
    async fn drafts(&self, kind: Option<DraftKind>) -> ServiceResult<Vec<OfflineDraft>>;
    /// Push every pending draft upstream
    async fn sync_all(&self) -> ServiceResult<SyncReport>;
}

/// Draft queue kept in memory; `sync_all` simply drains it
#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    pending: Mutex<Vec<OfflineDraft>>,
    reject_saves: AtomicBool,
}

impl MemoryDraftStore {
    /// Make every following `save_draft` fail
    pub fn reject_saves(&self, reject: bool) {
        self.reject_saves.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn save_draft(
        &self,
        kind: DraftKind,
        payload: serde_json::Value,
    ) -> ServiceResult<String> {
        if self.reject_saves.load(Ordering::SeqCst) {
            return Err(ServiceError::new("draft queue unavailable"));
        }
        let draft = OfflineDraft::new(kind, payload);
        let id = draft.id.clone();
        lock(&self.pending).push(draft);
        Ok(id)
    }

    async fn drafts(&self, kind: Option<DraftKind>) -> ServiceResult<Vec<OfflineDraft>> {
        Ok(lock(&self.pending)
            .iter()
            .filter(|d| kind.is_none_or(|k| d.kind == k))
            .cloned()
            .collect())
    }

    async fn sync_all(&self) -> ServiceResult<SyncReport> {
        let drained = std::mem::take(&mut *lock(&self.pending));
        Ok(SyncReport {
            synced: drained.len(),
            failed: 0,
        })
    }
}

// === Notifications ===

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        match n.level {
            NotificationLevel::Error | NotificationLevel::Warning => {
                tracing::warn!(title = %n.title, "{}", n.message)
            }
            _ => tracing::info!(title = %n.title, "{}", n.message),
        }
    }
}

/// Keeps every notification for later inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier(Mutex<Vec<Notification>>);

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.0).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        lock(&self.0).push(notification);
    }
}

// === Analytics ===

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MapAnalyticsEvent {
    ContextSwitch {
        from: MapContext,
        to: MapContext,
    },
    FavoriteAdded {
        id: String,
    },
    GeoAttached {
        post_id: String,
        context: MapContext,
        coordinates: GeoPoint,
    },
    TrackRecorded {
        id: String,
        distance: f64,
    },
    TrackExported {
        id: String,
        format: ExportFormat,
    },
}

pub trait Analytics: Send + Sync {
    fn track_map_interaction(&self, event: MapAnalyticsEvent);
}

#[derive(Debug, Default)]
pub struct LogAnalytics;

impl Analytics for LogAnalytics {
    fn track_map_interaction(&self, event: MapAnalyticsEvent) {
        tracing::debug!(?event, "map interaction");
    }
}

#[derive(Debug, Default)]
pub struct RecordingAnalytics(Mutex<Vec<MapAnalyticsEvent>>);

impl RecordingAnalytics {
    pub fn events(&self) -> Vec<MapAnalyticsEvent> {
        lock(&self.0).clone()
    }
}

impl Analytics for RecordingAnalytics {
    fn track_map_interaction(&self, event: MapAnalyticsEvent) {
        lock(&self.0).push(event);
    }
}

// === Gamification ===

#[async_trait]
pub trait Gamification: Send + Sync {
    fn is_rate_limited(&self, _action: &str) -> bool {
        false
    }
    async fn record_action(&self, action: &str, metadata: serde_json::Value) -> ServiceResult<()>;
}

#[derive(Debug, Default)]
pub struct NoGamification;

#[async_trait]
impl Gamification for NoGamification {
    async fn record_action(&self, _action: &str, _metadata: serde_json::Value) -> ServiceResult<()> {
        Ok(())
    }
}

/// Records actions and rate limits the ones listed
#[derive(Debug, Default)]
pub struct RecordingGamification {
    actions: Mutex<Vec<(String, serde_json::Value)>>,
    limited: Mutex<Vec<String>>,
}

impl RecordingGamification {
    pub fn limit(&self, action: impl Into<String>) {
        lock(&self.limited).push(action.into());
    }

    pub fn actions(&self) -> Vec<(String, serde_json::Value)> {
        lock(&self.actions).clone()
    }
}

#[async_trait]
impl Gamification for RecordingGamification {
    fn is_rate_limited(&self, action: &str) -> bool {
        lock(&self.limited).iter().any(|a| a == action)
    }

    async fn record_action(&self, action: &str, metadata: serde_json::Value) -> ServiceResult<()> {
        lock(&self.actions).push((action.to_string(), metadata));
        Ok(())
    }
}

// === Posts ===

/// User generated post, optionally geotagged
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub photos: Vec<String>,
}

#[async_trait]
pub trait ModerationQueue: Send + Sync {
    /// Submit a post for review, returning its id
    async fn submit_post(&self, post: &PostDraft) -> ServiceResult<String>;
}

#[derive(Debug, Default)]
pub struct NoModeration;

#[async_trait]
impl ModerationQueue for NoModeration {
    async fn submit_post(&self, _post: &PostDraft) -> ServiceResult<String> {
        Err(ServiceError::new("no moderation service configured"))
    }
}

pub trait ActivityLog: Send + Sync {
    fn record_activity(&self, kind: &str, metadata: serde_json::Value);
}

#[derive(Debug, Default)]
pub struct LogActivity;

impl ActivityLog for LogActivity {
    fn record_activity(&self, kind: &str, metadata: serde_json::Value) {
        tracing::debug!(kind, %metadata, "activity recorded");
    }
}

// === Routing ===

/// Third-party route builder used by the routing renderer
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Road-following geometry through `waypoints`
    async fn build_route(&self, waypoints: &[GeoPoint]) -> ServiceResult<Vec<GeoPoint>>;
}

/// Joins waypoints with straight legs
#[derive(Debug, Default)]
pub struct StraightLineRouting;

#[async_trait]
impl RoutingProvider for StraightLineRouting {
    async fn build_route(&self, waypoints: &[GeoPoint]) -> ServiceResult<Vec<GeoPoint>> {
        Ok(waypoints.to_vec())
    }
}

// === Bundle ===

/// Everything the facade depends on
#[derive(Clone)]
pub struct FacadeDependencies {
    pub host: Arc<dyn ContainerHost>,
    pub entitlements: Arc<dyn Entitlements>,
    pub storage: Arc<dyn MapStorage>,
    pub drafts: Arc<dyn DraftStore>,
    pub notifier: Arc<dyn Notifier>,
    pub analytics: Arc<dyn Analytics>,
    pub gamification: Arc<dyn Gamification>,
    pub moderation: Arc<dyn ModerationQueue>,
    pub activity: Arc<dyn ActivityLog>,
    /// Platform positioning; tracking reports a capability error without it
    pub geolocation: Option<Arc<dyn Geolocation>>,
    /// Route builder for the routing renderer
    pub routing: Option<Arc<dyn RoutingProvider>>,
    /// Tile metadata source; the offline renderer falls back to HTTP without it
    pub tile_metadata: Option<Arc<dyn TileMetadataSource>>,
}

impl Default for FacadeDependencies {
    fn default() -> Self {
        Self {
            host: Arc::new(StaticHost::new()),
            entitlements: Arc::new(StaticEntitlements::new(false)),
            storage: Arc::new(MemoryStorage::default()),
            drafts: Arc::new(MemoryDraftStore::default()),
            notifier: Arc::new(LogNotifier),
            analytics: Arc::new(LogAnalytics),
            gamification: Arc::new(NoGamification),
            moderation: Arc::new(NoModeration),
            activity: Arc::new(LogActivity),
            geolocation: None,
            routing: None,
            tile_metadata: None,
        }
    }
}

impl FacadeDependencies {
    pub fn with_host(mut self, host: Arc<dyn ContainerHost>) -> Self {
        self.host = host;
        self
    }

    pub fn with_entitlements(mut self, entitlements: Arc<dyn Entitlements>) -> Self {
        self.entitlements = entitlements;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn MapStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_drafts(mut self, drafts: Arc<dyn DraftStore>) -> Self {
        self.drafts = drafts;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn Analytics>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn with_gamification(mut self, gamification: Arc<dyn Gamification>) -> Self {
        self.gamification = gamification;
        self
    }

    pub fn with_moderation(mut self, moderation: Arc<dyn ModerationQueue>) -> Self {
        self.moderation = moderation;
        self
    }

    pub fn with_activity(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_geolocation(mut self, geolocation: Arc<dyn Geolocation>) -> Self {
        self.geolocation = Some(geolocation);
        self
    }

    pub fn with_routing(mut self, routing: Arc<dyn RoutingProvider>) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_tile_metadata(mut self, source: Arc<dyn TileMetadataSource>) -> Self {
        self.tile_metadata = Some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_draft_store_filters_and_syncs() {
        let store = MemoryDraftStore::default();
        store.save_draft(DraftKind::Route, json!({"id": "r"})).await.unwrap();
        store.save_draft(DraftKind::Post, json!({"title": "p"})).await.unwrap();

        assert_eq!(store.drafts(None).await.unwrap().len(), 2);
        assert_eq!(store.drafts(Some(DraftKind::Post)).await.unwrap().len(), 1);

        let report = store.sync_all().await.unwrap();
        assert_eq!(report.synced, 2);
        assert!(store.drafts(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejecting_draft_store() {
        let store = MemoryDraftStore::default();
        store.reject_saves(true);
        assert!(store.save_draft(DraftKind::Route, json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_storage_regions_and_favorites() {
        let storage = MemoryStorage::with_regions(["moscow"]);
        storage.download_region("moscow").await.unwrap();
        storage.download_region("vladimir").await.unwrap();
        assert_eq!(storage.downloaded_regions(), vec!["moscow", "vladimir"]);
        storage.delete_region("moscow").await.unwrap();
        assert_eq!(storage.downloaded_regions(), vec!["vladimir"]);

        let place = FavoritePlace {
            id: "f1".into(),
            name: None,
            position: GeoPoint::new(1.0, 2.0),
            kind: "marker".into(),
        };
        storage.add_favorite(place.clone()).unwrap();
        storage.add_favorite(place).unwrap();
        assert_eq!(storage.favorites().len(), 1);
        storage.remove_favorite("f1").unwrap();
        assert!(storage.favorites().is_empty());
    }

    #[test]
    fn test_analytics_event_shape() {
        let event = MapAnalyticsEvent::ContextSwitch {
            from: MapContext::OnlineTile,
            to: MapContext::OfflineTile,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"action": "context_switch", "from": "online-tile", "to": "offline-tile"})
        );
    }
}
