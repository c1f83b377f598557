//! Keyed cache of renderer adapters, one per context

use crate::renderer::{MapContext, MapRenderer};
use std::collections::HashMap;

struct PooledRenderer {
    renderer: Box<dyn MapRenderer>,
    /// Container the adapter's native map was last bound to
    container_id: Option<String>,
}

/// Owns every adapter the facade has created
///
/// Adapters are reused across activations. A dead adapter (destroyed behind the
/// pool's back) is evicted the next time it is looked up.
#[derive(Default)]
pub struct RendererPool {
    renderers: HashMap<MapContext, PooledRenderer>,
    created: usize,
}

impl RendererPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live adapter for `context`, evicting it first if it is dead
    pub fn checkout(&mut self, context: MapContext) -> Option<&mut (dyn MapRenderer + 'static)> {
        if self
            .renderers
            .get(&context)
            .is_some_and(|p| !p.renderer.is_alive())
        {
            tracing::debug!(%context, "evicting dead renderer from pool");
            self.renderers.remove(&context);
        }
        self.renderers
            .get_mut(&context)
            .map(|p| p.renderer.as_mut())
    }

    pub fn get(&self, context: MapContext) -> Option<&(dyn MapRenderer + 'static)> {
        self.renderers
            .get(&context)
            .filter(|p| p.renderer.is_alive())
            .map(|p| p.renderer.as_ref())
    }

    pub fn get_mut(&mut self, context: MapContext) -> Option<&mut (dyn MapRenderer + 'static)> {
        self.renderers
            .get_mut(&context)
            .filter(|p| p.renderer.is_alive())
            .map(|p| p.renderer.as_mut())
    }

    pub fn contains(&self, context: MapContext) -> bool {
        self.get(context).is_some()
    }

    /// Store a freshly created adapter, replacing (and destroying) any previous one
    pub fn insert(&mut self, renderer: Box<dyn MapRenderer>) -> &mut (dyn MapRenderer + 'static) {
        let context = renderer.context();
        self.created += 1;
        if let Some(mut previous) = self.renderers.remove(&context) {
            previous.renderer.destroy();
        }
        let entry = self.renderers.entry(context).or_insert(PooledRenderer {
            renderer,
            container_id: None,
        });
        entry.renderer.as_mut()
    }

    /// Record that `context` now owns `container_id`
    ///
    /// Any other pooled adapter claiming the same container is destroyed and evicted,
    /// so two live native maps never share one container.
    pub fn bind_container(&mut self, context: MapContext, container_id: &str) {
        let stale: Vec<MapContext> = self
            .renderers
            .iter()
            .filter(|(ctx, p)| **ctx != context && p.container_id.as_deref() == Some(container_id))
            .map(|(ctx, _)| *ctx)
            .collect();
        for ctx in stale {
            if let Some(mut pooled) = self.renderers.remove(&ctx) {
                tracing::debug!(context = %ctx, container_id, "container taken over, destroying renderer");
                pooled.renderer.destroy();
            }
        }
        if let Some(pooled) = self.renderers.get_mut(&context) {
            pooled.container_id = Some(container_id.to_string());
        }
    }

    pub fn container_of(&self, context: MapContext) -> Option<&str> {
        self.renderers
            .get(&context)
            .and_then(|p| p.container_id.as_deref())
    }

    /// Destroy and drop the adapter for `context`
    pub fn evict(&mut self, context: MapContext) -> bool {
        match self.renderers.remove(&context) {
            Some(mut pooled) => {
                pooled.renderer.destroy();
                true
            }
            None => false,
        }
    }

    /// Contexts with a live adapter, in a stable order
    pub fn contexts(&self) -> Vec<MapContext> {
        let mut contexts: Vec<MapContext> = self
            .renderers
            .iter()
            .filter(|(_, p)| p.renderer.is_alive())
            .map(|(ctx, _)| *ctx)
            .collect();
        contexts.sort();
        contexts
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }

    /// Adapters created over the pool's lifetime
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn shutdown(&mut self) {
        for (context, mut pooled) in self.renderers.drain() {
            tracing::debug!(%context, "shutting down renderer");
            pooled.renderer.destroy();
        }
    }
}

impl std::fmt::Debug for RendererPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererPool")
            .field("contexts", &self.contexts())
            .field("created", &self.created)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::coords::ScreenSize;
    use crate::host::StaticHost;
    use crate::renderer::{OnlineTileRenderer, RoutingRenderer};
    use std::sync::Arc;

    fn host() -> Arc<StaticHost> {
        Arc::new(StaticHost::with_container("map", ScreenSize::new(400.0, 300.0)))
    }

    #[test]
    fn test_dead_renderer_is_evicted() {
        let mut pool = RendererPool::new();
        pool.insert(Box::new(OnlineTileRenderer::new(host())));
        assert!(pool.checkout(MapContext::OnlineTile).is_some());

        pool.get_mut(MapContext::OnlineTile).unwrap().destroy();
        assert!(pool.get(MapContext::OnlineTile).is_none());
        assert!(pool.checkout(MapContext::OnlineTile).is_none());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_one_live_map_per_container() {
        let host = host();
        let mut pool = RendererPool::new();
        let config = MapConfig::default();

        let online = pool.insert(Box::new(OnlineTileRenderer::new(host.clone())));
        online.init("map", &config).await.unwrap();
        pool.bind_container(MapContext::OnlineTile, "map");

        let routing = pool.insert(Box::new(RoutingRenderer::new(host.clone(), None)));
        routing.init("map", &config).await.unwrap();
        pool.bind_container(MapContext::RoutingProvider, "map");

        assert_eq!(pool.contexts(), vec![MapContext::RoutingProvider]);
        assert_eq!(pool.container_of(MapContext::RoutingProvider), Some("map"));
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_shutdown_destroys_everything() {
        let mut pool = RendererPool::new();
        pool.insert(Box::new(OnlineTileRenderer::new(host())));
        pool.insert(Box::new(RoutingRenderer::new(host(), None)));
        assert_eq!(pool.len(), 2);
        pool.shutdown();
        assert!(pool.is_empty());
        assert!(!pool.evict(MapContext::OnlineTile));
    }
}
