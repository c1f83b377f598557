//! Tile sources and tileset metadata
//!
//! Offline tiles are served by the backend from downloaded MBTiles files:
//! `{api_base}/tiles/{tileset}/{z}/{x}/{y}.png` for raster tiles and
//! `{api_base}/tiles/{tileset}/metadata` for the coverage description.

use crate::coords::Bounds;
use crate::{MapError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace, warn};
use walkers::TileId;
use walkers::sources::{Attribution, TileSource};

/// Max zoom served for offline tilesets
pub const OFFLINE_MAX_ZOOM: u8 = 18;

/// Raster tiles served by the offline tile backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OfflineTiles {
    pub api_base: String,
    pub tileset: String,
}

impl OfflineTiles {
    pub fn new(api_base: &str, tileset: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            tileset: tileset.to_string(),
        }
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/tiles/{}/metadata", self.api_base, self.tileset)
    }
}

impl TileSource for OfflineTiles {
    fn tile_url(&self, tile_id: TileId) -> String {
        format!(
            "{}/tiles/{}/{}/{}/{}.png",
            self.api_base, self.tileset, tile_id.zoom, tile_id.x, tile_id.y
        )
    }

    fn attribution(&self) -> Attribution {
        Attribution {
            text: "Offline tiles © OpenStreetMap contributors",
            url: "https://www.openstreetmap.org/copyright",
            logo_light: None,
            logo_dark: None,
        }
    }

    fn max_zoom(&self) -> u8 {
        OFFLINE_MAX_ZOOM
    }
}

/// Coverage description of a tileset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileMetadata {
    /// `[west, south, east, north]`
    pub bounds: Option<[f64; 4]>,
    #[serde(default)]
    pub minzoom: Option<u8>,
    #[serde(default)]
    pub maxzoom: Option<u8>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl TileMetadata {
    pub fn coverage(&self) -> Option<Bounds> {
        self.bounds.map(Bounds::from_wsen)
    }
}

/// Anything that can describe a tileset
#[async_trait]
pub trait TileMetadataSource: Send + Sync {
    async fn fetch_metadata(&self, tiles: &OfflineTiles) -> Result<TileMetadata>;
}

/// Metadata fetched from the tile backend over HTTP
#[derive(Clone)]
pub struct HttpTileMetadataSource {
    client: reqwest::Client,
}

impl HttpTileMetadataSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MapError::Metadata(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TileMetadataSource for HttpTileMetadataSource {
    async fn fetch_metadata(&self, tiles: &OfflineTiles) -> Result<TileMetadata> {
        let url = tiles.metadata_url();
        trace!(url = %url, "fetching tileset metadata");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, is_timeout = e.is_timeout(), "metadata request failed");
            MapError::Metadata(format!("Request failed: {}", e))
        })?;

        if !response.status().is_success() {
            warn!(url = %url, status = response.status().as_u16(), "metadata HTTP error status");
            return Err(MapError::Metadata(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let metadata = response
            .json::<TileMetadata>()
            .await
            .map_err(|e| MapError::Metadata(format!("Invalid metadata body: {}", e)))?;
        debug!(url = %url, bounds = ?metadata.bounds, "tileset metadata loaded");
        Ok(metadata)
    }
}

/// Metadata known up front, keyed by tileset name
#[derive(Debug, Default)]
pub struct StaticTileMetadata {
    tilesets: Mutex<HashMap<String, TileMetadata>>,
}

impl StaticTileMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tileset: &str, metadata: TileMetadata) {
        self.tilesets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(tileset.to_string(), metadata);
    }
}

#[async_trait]
impl TileMetadataSource for StaticTileMetadata {
    async fn fetch_metadata(&self, tiles: &OfflineTiles) -> Result<TileMetadata> {
        self.tilesets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&tiles.tileset)
            .cloned()
            .ok_or_else(|| MapError::Metadata(format!("unknown tileset `{}`", tiles.tileset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_tile_urls() {
        let tiles = OfflineTiles::new("http://localhost:8000/api/", "test-raster");
        assert_eq!(
            tiles.tile_url(TileId { x: 3, y: 5, zoom: 4 }),
            "http://localhost:8000/api/tiles/test-raster/4/3/5.png"
        );
        assert_eq!(
            tiles.metadata_url(),
            "http://localhost:8000/api/tiles/test-raster/metadata"
        );
        assert_eq!(tiles.max_zoom(), 18);
    }

    #[test]
    fn test_metadata_parsing() {
        let body = r#"{"bounds":[40.0,56.0,41.0,56.5],"minzoom":0,"maxzoom":14,"format":"png"}"#;
        let metadata: TileMetadata = serde_json::from_str(body).unwrap();
        let coverage = metadata.coverage().unwrap();
        assert_eq!(coverage.as_array(), [[56.0, 40.0], [56.5, 41.0]]);
        assert_eq!(metadata.maxzoom, Some(14));
    }

    #[tokio::test]
    async fn test_static_metadata_lookup() {
        let source = StaticTileMetadata::new();
        source.insert(
            "region",
            TileMetadata {
                bounds: Some([1.0, 2.0, 3.0, 4.0]),
                minzoom: None,
                maxzoom: None,
                format: None,
                name: None,
            },
        );
        let found = source
            .fetch_metadata(&OfflineTiles::new("http://x", "region"))
            .await
            .unwrap();
        assert!(found.coverage().is_some());
        assert!(
            source
                .fetch_metadata(&OfflineTiles::new("http://x", "other"))
                .await
                .is_err()
        );
    }
}
