//! Map Facade Library - Provider-agnostic map engine
//!
//! This library hides three independent, stateful map rendering backends behind one
//! stable API and adds a GPS track recorder with GPX/KML/GeoJSON export.
//!
//! # Architecture
//!
//! - **[`MapRenderer`]**: Contract implemented by every backend adapter
//!   ([`OnlineTileRenderer`], [`OfflineTileRenderer`], [`RoutingRenderer`])
//! - **[`RendererPool`]**: Keeps one live adapter per [`MapContext`] across switches
//! - **[`EventBridge`]**: Subscriber lists per event kind, rebound onto the active adapter
//! - **[`TrackingSession`]**: Filters geolocation samples into a [`TrackedRoute`]
//! - **[`export`]**: Pure serializers from a [`TrackedRoute`] to interchange formats
//! - **[`MapContextFacade`]**: Owns all of the above and is the only type the app talks to
//!
//! Collaborators (storage, drafts, entitlements, notifications, analytics, gamification,
//! geolocation, routing) are injected through [`FacadeDependencies`].

mod config;
pub mod coords;
mod events;
pub mod export;
mod facade;
mod host;
mod marker;
mod pool;
pub mod renderer;
mod route;
pub mod services;
mod tiles;
mod tracking;

// Public API exports
pub use config::{FacadeConfig, LayoutWait, MapConfig, OfflineOptions, TrackingConfig};
pub use coords::{Bounds, GeoPoint, ScreenPoint, ScreenSize};
pub use events::{EventBridge, HandlerResult, SubscriptionId};
pub use export::{ExportFormat, ExportPayload};
pub use facade::{LoadState, MapContextFacade, RegisteredApi, TrackingStats};
pub use host::{ContainerHost, ContainerRef, NodeId, StaticHost};
pub use marker::{
    MapMarker, MarkerDiff, MarkerShape, MarkerSize, UnifiedMarker, dedup_markers, diff_markers,
};
pub use pool::RendererPool;
pub use renderer::{
    EventKind, MapContext, MapEvent, MapInstanceId, MapRenderer, ObjectHandle, OfflineTileRenderer,
    OnlineTileRenderer, PointerInput, PolylineStyle, RendererHandle, RoutingRenderer,
};
pub use route::{PersistedRoute, TrackPoint, TrackedRoute};
pub use services::FacadeDependencies;
pub use tiles::{
    HttpTileMetadataSource, OfflineTiles, StaticTileMetadata, TileMetadata, TileMetadataSource,
};
pub use tracking::{
    Geolocation, ManualGeolocation, PositionCallback, PositionEvent, PositionWatch, TrackRecorder,
    TrackingSession, TrackingSubscription, WatchOptions,
};

/// Reasons a renderer could not bind to its container
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("container `{0}` not found")]
    ContainerMissing(String),

    #[error("container `{container}` still has zero size after {attempts} layout checks")]
    ZeroSize { container: String, attempts: u32 },

    #[error("{0} renderer cannot be used on this host")]
    RendererUnavailable(MapContext),
}

/// Error types for the map facade
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Initialization failed: {0}")]
    Init(#[from] InitError),

    #[error("{0} requires a premium subscription")]
    Permission(String),

    #[error("Capability unavailable: {0}")]
    Capability(String),

    /// No adapter exists for the context, e.g. offline tiles without the entitlement
    #[error("No renderer available for context {0}")]
    RendererUnavailable(MapContext),

    #[error("No active tracking session")]
    NotActive,

    #[error("Map has not been initialized")]
    NotInitialized,

    #[error("Route planning is unavailable in the current context")]
    PlanningUnavailable,

    #[error("Action `{0}` is rate limited")]
    RateLimited(String),

    #[error("Tile metadata error: {0}")]
    Metadata(String),

    #[error("Collaborator error: {0}")]
    Service(#[from] services::ServiceError),

    #[error("GPX write error: {0}")]
    GpxWrite(#[from] gpx::errors::GpxError),

    #[error("Time format error: {0}")]
    TimeFormat(#[from] time::error::Format),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that the main entry points are reachable from the crate root
        let _: fn(FacadeDependencies, FacadeConfig) -> MapContextFacade = MapContextFacade::new;
        let _: fn() -> TrackingConfig = TrackingConfig::default;
    }

    #[test]
    fn test_error_messages() {
        let err = MapError::from(InitError::ZeroSize {
            container: "map-abc".into(),
            attempts: 100,
        });
        assert_eq!(
            err.to_string(),
            "Initialization failed: container `map-abc` still has zero size after 100 layout checks"
        );
        assert_eq!(
            MapError::Permission("Track export".into()).to_string(),
            "Track export requires a premium subscription"
        );
    }
}
