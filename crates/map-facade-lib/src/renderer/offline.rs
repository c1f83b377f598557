//! Offline tile adapter
//!
//! Draws locally served MBTiles raster tiles over a faded online layer, outlines the
//! tileset coverage from its metadata and fits the view to it. Tilesets can be swapped
//! on a live map without recreating it.

use super::scene::{Layer, LayerId, TileCore, TileLayer, forward_tile_core};
use super::{MapContext, MapRenderer, PolylineStyle, RendererHandle};
use crate::config::{MapConfig, OfflineOptions};
use crate::coords::{Bounds, GeoPoint};
use crate::host::ContainerHost;
use crate::tiles::{
    HttpTileMetadataSource, OFFLINE_MAX_ZOOM, OfflineTiles, TileMetadata, TileMetadataSource,
};
use crate::{InitError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use walkers::sources::OpenStreetMap;

pub const OFFLINE_DEFAULT_CENTER: GeoPoint = GeoPoint::new(56.13, 40.41);
pub const OFFLINE_DEFAULT_ZOOM: f64 = 10.0;

/// Padding in pixels used when fitting the view to the tileset coverage
const COVERAGE_PADDING: f64 = 20.0;

pub struct OfflineTileRenderer {
    core: TileCore,
    options: OfflineOptions,
    metadata_source: Option<Arc<dyn TileMetadataSource>>,
    fallback_layer: Option<LayerId>,
    tile_layer: Option<LayerId>,
    coverage_layer: Option<LayerId>,
    metadata: Option<TileMetadata>,
}

impl OfflineTileRenderer {
    /// Without a metadata source the tile backend is queried over HTTP
    pub fn new(
        host: Arc<dyn ContainerHost>,
        metadata_source: Option<Arc<dyn TileMetadataSource>>,
    ) -> Self {
        Self {
            core: TileCore::new(MapContext::OfflineTile, host),
            options: OfflineOptions::default(),
            metadata_source,
            fallback_layer: None,
            tile_layer: None,
            coverage_layer: None,
            metadata: None,
        }
    }

    pub fn tileset(&self) -> &str {
        &self.options.tileset
    }

    pub fn metadata(&self) -> Option<&TileMetadata> {
        self.metadata.as_ref()
    }

    /// Coverage of the current tileset, once its metadata is known
    pub fn coverage(&self) -> Option<Bounds> {
        self.metadata.as_ref().and_then(TileMetadata::coverage)
    }

    pub fn has_coverage_overlay(&self) -> bool {
        self.coverage_layer.is_some()
    }

    /// Opacity of the online layer drawn underneath, `None` without fallback
    pub fn fallback_opacity(&self) -> Option<f32> {
        let scene = self.core.scene()?;
        match scene.layer(self.fallback_layer?) {
            Some(Layer::Tiles(tiles)) => Some(tiles.opacity),
            _ => None,
        }
    }

    /// Offline tile URLs needed for the current viewport
    pub fn visible_tile_urls(&self) -> Vec<String> {
        match (self.core.scene(), self.tile_layer) {
            (Some(scene), Some(layer)) => scene.visible_tile_urls(layer),
            _ => Vec::new(),
        }
    }

    /// Swap the raster source on the live map and reload its coverage
    ///
    /// Before `init` this only records the tileset for the next initialization.
    pub async fn switch_tileset(&mut self, tileset: &str) -> Result<()> {
        self.options.tileset = tileset.to_string();
        let tiles = self.tiles();
        let Some(scene) = self.core.scene_mut() else {
            return Ok(());
        };
        if let Some(previous) = self.tile_layer.take() {
            scene.remove_layer(previous);
        }
        self.tile_layer = Some(scene.add_layer(Layer::Tiles(TileLayer {
            name: tiles.tileset.clone(),
            source: Box::new(tiles),
            opacity: 1.0,
        })));
        tracing::info!(tileset, "switched offline tileset");
        self.load_coverage().await;
        Ok(())
    }

    fn tiles(&self) -> OfflineTiles {
        OfflineTiles::new(&self.options.api_base, &self.options.tileset)
    }

    /// Fetch tileset metadata, then outline and fit its coverage
    ///
    /// Metadata failures leave the map usable without an overlay.
    async fn load_coverage(&mut self) {
        if let Some(layer) = self.coverage_layer.take()
            && let Some(scene) = self.core.scene_mut()
        {
            scene.remove_layer(layer);
        }
        self.metadata = None;

        let source = match &self.metadata_source {
            Some(source) => source.clone(),
            None => match HttpTileMetadataSource::new() {
                Ok(http) => {
                    let http: Arc<dyn TileMetadataSource> = Arc::new(http);
                    self.metadata_source = Some(http.clone());
                    http
                }
                Err(e) => {
                    tracing::warn!(error = %e, "no tile metadata source available");
                    return;
                }
            },
        };

        let tiles = self.tiles();
        let metadata = match source.fetch_metadata(&tiles).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(tileset = %tiles.tileset, error = %e, "failed to load tileset bounds");
                return;
            }
        };

        if let Some(coverage) = metadata.coverage() {
            if self.options.show_bounds_overlay
                && let Some(scene) = self.core.scene_mut()
            {
                self.coverage_layer = Some(scene.add_layer(Layer::Rectangle {
                    bounds: coverage,
                    style: PolylineStyle {
                        color: "#1D4ED8".to_string(),
                        weight: 2.0,
                        opacity: 0.8,
                        dashed: true,
                    },
                }));
            }
            if self.options.fit_to_bounds {
                self.core.fit_bounds(coverage, COVERAGE_PADDING);
            }
        }
        self.metadata = Some(metadata);
    }
}

#[async_trait]
impl MapRenderer for OfflineTileRenderer {
    fn context(&self) -> MapContext {
        MapContext::OfflineTile
    }

    async fn init(&mut self, container_id: &str, config: &MapConfig) -> Result<RendererHandle> {
        self.fallback_layer = None;
        self.tile_layer = None;
        self.coverage_layer = None;
        self.metadata = None;
        self.options = config.offline.clone();

        self.core
            .attach(
                container_id,
                config,
                OFFLINE_MAX_ZOOM as f64,
                OFFLINE_DEFAULT_CENTER,
                OFFLINE_DEFAULT_ZOOM,
            )
            .await?;

        let tiles = self.tiles();
        let scene = self
            .core
            .scene_mut()
            .ok_or(InitError::RendererUnavailable(MapContext::OfflineTile))?;
        if self.options.online_fallback {
            self.fallback_layer = Some(scene.add_layer(Layer::Tiles(TileLayer {
                name: "online-fallback".to_string(),
                source: Box::new(OpenStreetMap),
                opacity: self.options.fallback_opacity,
            })));
        }
        self.tile_layer = Some(scene.add_layer(Layer::Tiles(TileLayer {
            name: tiles.tileset.clone(),
            source: Box::new(tiles),
            opacity: 1.0,
        })));

        self.load_coverage().await;

        let handle = self
            .core
            .handle()
            .ok_or(InitError::RendererUnavailable(MapContext::OfflineTile))?;
        tracing::info!(
            container = %handle.container_id,
            tileset = %self.options.tileset,
            "offline tile map ready"
        );
        Ok(handle)
    }

    fn destroy(&mut self) {
        self.fallback_layer = None;
        self.tile_layer = None;
        self.coverage_layer = None;
        self.core.destroy();
    }

    fn as_offline_mut(&mut self) -> Option<&mut OfflineTileRenderer> {
        Some(self)
    }

    forward_tile_core!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::ScreenSize;
    use crate::host::StaticHost;
    use crate::tiles::StaticTileMetadata;

    fn metadata(bounds: [f64; 4]) -> TileMetadata {
        TileMetadata {
            bounds: Some(bounds),
            minzoom: Some(0),
            maxzoom: Some(14),
            format: Some("png".into()),
            name: None,
        }
    }

    fn renderer() -> OfflineTileRenderer {
        let host = Arc::new(StaticHost::with_container(
            "map",
            ScreenSize::new(800.0, 600.0),
        ));
        let source = Arc::new(StaticTileMetadata::new());
        source.insert("test-raster", metadata([40.0, 56.0, 41.0, 56.5]));
        source.insert("vladimir", metadata([40.2, 56.05, 40.6, 56.25]));
        OfflineTileRenderer::new(host, Some(source))
    }

    #[tokio::test]
    async fn test_init_builds_layers_and_fits_coverage() {
        let mut r = renderer();
        r.init("map", &MapConfig::default()).await.unwrap();

        // fallback + offline tiles + coverage rectangle
        assert_eq!(r.native_layer_count(), 3);
        assert_eq!(r.fallback_opacity(), Some(0.3));
        assert!(r.has_coverage_overlay());

        let coverage = r.coverage().unwrap();
        let visible = r.visible_bounds().unwrap();
        assert!(visible.contains(coverage.south_west));
        assert!(visible.contains(coverage.north_east));
        assert!(
            r.visible_tile_urls()
                .iter()
                .all(|u| u.starts_with("http://localhost:8000/api/tiles/test-raster/"))
        );
    }

    #[tokio::test]
    async fn test_switch_tileset_keeps_map() {
        let mut r = renderer();
        let before = r.init("map", &MapConfig::default()).await.unwrap();
        r.switch_tileset("vladimir").await.unwrap();

        assert_eq!(r.handle().unwrap().map_id, before.map_id);
        assert_eq!(r.tileset(), "vladimir");
        assert_eq!(r.native_layer_count(), 3);
        assert_eq!(r.coverage(), Some(Bounds::from_wsen([40.2, 56.05, 40.6, 56.25])));
        assert!(
            r.visible_tile_urls()
                .iter()
                .all(|u| u.contains("/tiles/vladimir/"))
        );
    }

    #[tokio::test]
    async fn test_missing_metadata_is_not_fatal() {
        let mut r = renderer();
        let config = MapConfig {
            offline: OfflineOptions {
                tileset: "unknown".into(),
                online_fallback: false,
                ..Default::default()
            },
            ..Default::default()
        };
        r.init("map", &config).await.unwrap();
        assert!(r.coverage().is_none());
        assert!(!r.has_coverage_overlay());
        assert_eq!(r.fallback_opacity(), None);
        assert_eq!(
            r.view(),
            Some((OFFLINE_DEFAULT_CENTER, OFFLINE_DEFAULT_ZOOM))
        );
    }
}
