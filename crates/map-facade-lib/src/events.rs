//! Subscriber registry that survives renderer swaps
//!
//! Subscribers register per event kind on the bridge, never on a renderer. Binding
//! installs a single dispatcher per subscribed kind on the active renderer; the
//! dispatcher reads the live subscriber list, so subscriptions made after binding
//! are picked up without reinstalling anything.

use crate::renderer::{EventKind, MapEvent, MapRenderer, NativeListener};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of one handler invocation; errors are logged and swallowed
pub type HandlerResult = std::result::Result<(), String>;

pub type Handler = Arc<dyn Fn(&MapEvent) -> HandlerResult + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Subscribers = Arc<Mutex<Vec<(SubscriptionId, Handler)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct EventBridge {
    subscribers: HashMap<EventKind, Subscribers>,
    next_id: AtomicU64,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: impl Fn(&MapEvent) -> HandlerResult + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(self.subscribers.entry(kind).or_default()).push((id, Arc::new(handler)));
        id
    }

    /// Returns false when the id is unknown
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.values().any(|list| {
            let mut list = lock(list);
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            list.len() != before
        })
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, |list| lock(list).len())
    }

    /// Kinds that currently have at least one subscriber
    pub fn active_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.subscriber_count(*kind) > 0)
            .collect()
    }

    /// Install one dispatcher per subscribed kind on `renderer`, clear the other slots
    pub fn bind(&self, renderer: &mut dyn MapRenderer) {
        for kind in EventKind::ALL {
            let listener = match self.subscribers.get(&kind) {
                Some(list) if !lock(list).is_empty() => Some(dispatcher(kind, list.clone())),
                _ => None,
            };
            renderer.set_listener(kind, listener);
        }
        tracing::trace!(
            context = %renderer.context(),
            listeners = renderer.native_listener_count(),
            "event bridge bound"
        );
    }

    /// Clear every slot on a renderer that is no longer active
    pub fn unbind(&self, renderer: &mut dyn MapRenderer) {
        for kind in EventKind::ALL {
            renderer.set_listener(kind, None);
        }
    }

    /// Deliver `event` to its subscribers directly
    pub fn dispatch(&self, event: &MapEvent) {
        if let Some(list) = self.subscribers.get(&event.kind()) {
            run_handlers(event, list);
        }
    }
}

fn dispatcher(kind: EventKind, list: Subscribers) -> NativeListener {
    Arc::new(move |event: &MapEvent| {
        debug_assert_eq!(event.kind(), kind);
        run_handlers(event, &list);
    })
}

fn run_handlers(event: &MapEvent, list: &Mutex<Vec<(SubscriptionId, Handler)>>) {
    #[cfg(feature = "profiling")]
    profiling::scope!("EventBridge::run_handlers");
    // Handlers may subscribe or unsubscribe while running
    let snapshot: Vec<(SubscriptionId, Handler)> = lock(list).clone();
    for (id, handler) in snapshot {
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(kind = ?event.kind(), subscription = ?id, error = %e, "event handler failed");
            }
            Err(_) => {
                tracing::warn!(kind = ?event.kind(), subscription = ?id, "event handler panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("active_kinds", &self.active_kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::coords::{GeoPoint, ScreenSize};
    use crate::host::StaticHost;
    use crate::renderer::{OnlineTileRenderer, RoutingRenderer};
    use std::sync::atomic::AtomicUsize;

    fn host() -> Arc<StaticHost> {
        Arc::new(StaticHost::with_container("map", ScreenSize::new(400.0, 300.0)))
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let mut bridge = EventBridge::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bridge.subscribe(EventKind::ZoomStart, |_| Err("nope".into()));
        bridge.subscribe(EventKind::ZoomStart, |_| panic!("handler bug"));
        let counter = hits.clone();
        bridge.subscribe(EventKind::ZoomStart, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bridge.dispatch(&MapEvent::ZoomStart);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let mut bridge = EventBridge::new();
        let a = bridge.subscribe(EventKind::Click, |_| Ok(()));
        bridge.subscribe(EventKind::Click, |_| Ok(()));
        assert_eq!(bridge.subscriber_count(EventKind::Click), 2);
        assert!(bridge.unsubscribe(a));
        assert!(!bridge.unsubscribe(a));
        assert_eq!(bridge.subscriber_count(EventKind::Click), 1);
    }

    #[tokio::test]
    async fn test_one_listener_per_kind_across_renderers() {
        let mut bridge = EventBridge::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            bridge.subscribe(EventKind::Move, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        bridge.subscribe(EventKind::Zoom, |_| Ok(()));

        let mut online = OnlineTileRenderer::new(host());
        online.init("map", &MapConfig::default()).await.unwrap();
        let mut routing = RoutingRenderer::new(host(), None);
        routing.init("map", &MapConfig::default()).await.unwrap();

        for _ in 0..2 {
            bridge.bind(&mut online);
            bridge.bind(&mut routing);
        }
        assert_eq!(online.native_listener_count(), 2);
        assert_eq!(routing.native_listener_count(), 2);

        routing.set_view(GeoPoint::new(50.0, 30.0), 10.0);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        // subscriptions made after binding are seen by the installed dispatcher
        let late = Arc::new(AtomicUsize::new(0));
        let counter = late.clone();
        bridge.subscribe(EventKind::Move, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        online.set_view(GeoPoint::new(51.0, 31.0), 6.0);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bind_clears_unsubscribed_kinds() {
        let mut bridge = EventBridge::new();
        let id = bridge.subscribe(EventKind::Click, |_| Ok(()));
        let mut online = OnlineTileRenderer::new(host());
        online.init("map", &MapConfig::default()).await.unwrap();
        bridge.bind(&mut online);
        assert_eq!(online.native_listener_count(), 1);

        bridge.unsubscribe(id);
        bridge.bind(&mut online);
        assert_eq!(online.native_listener_count(), 0);
    }
}
