//! Configuration for the facade, the renderers and the tracking session

use crate::coords::GeoPoint;
use crate::marker::UnifiedMarker;
use crate::renderer::MapContext;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded polling used while waiting for a container to get a layout size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutWait {
    /// Delay between two size checks in milliseconds.
    /// Default: 100
    pub interval_ms: u64,
    /// Checks performed before giving up.
    /// Default: 100
    pub max_attempts: u32,
}

impl Default for LayoutWait {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            max_attempts: 100,
        }
    }
}

impl LayoutWait {
    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Options specific to the offline tile renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineOptions {
    /// Tileset served by the backend
    pub tileset: String,
    /// Base URL of the tile API; tiles live under `{api_base}/tiles/{tileset}/`
    pub api_base: String,
    /// Draw the online tiles underneath the offline ones
    pub online_fallback: bool,
    /// Opacity of the online fallback layer
    pub fallback_opacity: f32,
    /// Draw a dashed rectangle around the tileset coverage
    pub show_bounds_overlay: bool,
    /// Fit the view to the tileset coverage once metadata is loaded
    pub fit_to_bounds: bool,
}

impl Default for OfflineOptions {
    fn default() -> Self {
        Self {
            tileset: "test-raster".to_string(),
            api_base: "http://localhost:8000/api".to_string(),
            online_fallback: true,
            fallback_opacity: 0.3,
            show_bounds_overlay: true,
            fit_to_bounds: true,
        }
    }
}

/// Per-initialization map configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Explicit context; takes precedence over `provider`
    pub context: Option<MapContext>,
    /// Legacy provider name (`leaflet`, `yandex`)
    pub provider: Option<String>,
    /// Initial center; each renderer has its own default
    pub center: Option<GeoPoint>,
    pub zoom: Option<f64>,
    /// Markers rendered right after initialization
    pub markers: Vec<UnifiedMarker>,
    /// Reuse an already registered map bound to the same container
    pub preserve_state: bool,
    pub offline: OfflineOptions,
    pub layout: LayoutWait,
    /// Routing renderer viewport margin `[top, right, bottom, left]` in pixels
    pub margin: Option<[f64; 4]>,
}

impl MapConfig {
    /// Context requested by this configuration, online tiles when unspecified
    pub fn resolve_context(&self) -> MapContext {
        self.context
            .or_else(|| {
                self.provider
                    .as_deref()
                    .and_then(|p| p.parse::<MapContext>().ok())
            })
            .unwrap_or_default()
    }
}

/// Filtering thresholds applied to incoming GPS samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Samples reporting a worse horizontal accuracy are dropped.
    /// Default: 50 m
    pub max_accuracy_m: f64,
    /// Samples closer than this to the last accepted point are dropped.
    /// Default: 5 m
    pub min_step_m: f64,
    /// Ask the platform for its most accurate positioning
    pub high_accuracy: bool,
    /// Platform timeout for a single fix in milliseconds
    pub timeout_ms: u64,
    /// Oldest cached fix the platform may return, in milliseconds
    pub maximum_age_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            min_step_m: 5.0,
            high_accuracy: true,
            timeout_ms: 10_000,
            maximum_age_ms: 1_000,
        }
    }
}

/// Facade-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Context activated on construction
    pub default_context: MapContext,
    /// Start in online mode; offline mode only allows the offline renderer
    pub online: bool,
    pub tracking: TrackingConfig,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            default_context: MapContext::OnlineTile,
            online: true,
            tracking: TrackingConfig::default(),
        }
    }
}
