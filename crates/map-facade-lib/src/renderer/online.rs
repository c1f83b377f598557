//! Online tile adapter backed by public OpenStreetMap raster tiles

use super::scene::{Layer, LayerId, TileCore, TileLayer, forward_tile_core};
use super::{MapContext, MapRenderer, RendererHandle};
use crate::config::MapConfig;
use crate::coords::GeoPoint;
use crate::host::ContainerHost;
use crate::{InitError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use walkers::sources::OpenStreetMap;

pub const ONLINE_DEFAULT_CENTER: GeoPoint = GeoPoint::new(55.7558, 37.6176);
pub const ONLINE_DEFAULT_ZOOM: f64 = 6.0;
pub const ONLINE_MAX_ZOOM: f64 = 19.0;

pub struct OnlineTileRenderer {
    core: TileCore,
    base_layer: Option<LayerId>,
}

impl OnlineTileRenderer {
    pub fn new(host: Arc<dyn ContainerHost>) -> Self {
        Self {
            core: TileCore::new(MapContext::OnlineTile, host),
            base_layer: None,
        }
    }

    /// Tile URLs the base layer needs for the current viewport
    pub fn visible_tile_urls(&self) -> Vec<String> {
        match (self.core.scene(), self.base_layer) {
            (Some(scene), Some(layer)) => scene.visible_tile_urls(layer),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl MapRenderer for OnlineTileRenderer {
    fn context(&self) -> MapContext {
        MapContext::OnlineTile
    }

    async fn init(&mut self, container_id: &str, config: &MapConfig) -> Result<RendererHandle> {
        self.base_layer = None;
        self.core
            .attach(
                container_id,
                config,
                ONLINE_MAX_ZOOM,
                ONLINE_DEFAULT_CENTER,
                ONLINE_DEFAULT_ZOOM,
            )
            .await?;
        let scene = self
            .core
            .scene_mut()
            .ok_or(InitError::RendererUnavailable(MapContext::OnlineTile))?;
        self.base_layer = Some(scene.add_layer(Layer::Tiles(TileLayer {
            name: "openstreetmap".to_string(),
            source: Box::new(OpenStreetMap),
            opacity: 1.0,
        })));

        let handle = self
            .core
            .handle()
            .ok_or(InitError::RendererUnavailable(MapContext::OnlineTile))?;
        tracing::info!(container = %handle.container_id, map = ?handle.map_id, "online tile map ready");
        Ok(handle)
    }

    fn destroy(&mut self) {
        self.base_layer = None;
        self.core.destroy();
    }

    forward_tile_core!();
}
