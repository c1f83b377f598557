//! Host document abstraction
//!
//! Renderers bind to containers owned by the host (a DOM, a native view hierarchy, or
//! nothing at all when running headless). The only things a renderer needs to know are
//! whether a container exists and what its laid-out size is.

use crate::coords::ScreenSize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Opaque handle to a host element that may not carry an id yet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// How a caller points at a map container
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerRef {
    Id(String),
    Node(NodeId),
}

impl From<&str> for ContainerRef {
    fn from(id: &str) -> Self {
        ContainerRef::Id(id.to_string())
    }
}

impl From<String> for ContainerRef {
    fn from(id: String) -> Self {
        ContainerRef::Id(id)
    }
}

pub trait ContainerHost: Send + Sync {
    /// Current layout size of the container, `None` when it is not in the document
    fn container_size(&self, id: &str) -> Option<ScreenSize>;

    /// Id carried by an element, if any
    fn element_id(&self, node: NodeId) -> Option<String>;

    /// Give an element a stable id
    fn assign_element_id(&self, node: NodeId, id: &str);
}

#[derive(Debug, Default)]
struct HostState {
    containers: HashMap<String, ScreenSize>,
    nodes: HashMap<NodeId, Option<String>>,
    node_sizes: HashMap<NodeId, ScreenSize>,
    /// Size checks still answered with zero before the real size shows up
    layout_delay: HashMap<String, u32>,
}

/// In-memory host with fixed container sizes
#[derive(Debug, Default)]
pub struct StaticHost {
    state: Mutex<HostState>,
}

impl StaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with a single laid-out container
    pub fn with_container(id: &str, size: ScreenSize) -> Self {
        let host = Self::new();
        host.set_container(id, size);
        host
    }

    pub fn set_container(&self, id: &str, size: ScreenSize) {
        self.lock().containers.insert(id.to_string(), size);
    }

    pub fn remove_container(&self, id: &str) {
        self.lock().containers.remove(id);
    }

    /// Report a zero size for the next `checks` queries of `id`
    pub fn delay_layout(&self, id: &str, checks: u32) {
        self.lock().layout_delay.insert(id.to_string(), checks);
    }

    /// Add an element without an id
    pub fn add_node(&self, node: NodeId, size: ScreenSize) {
        let mut state = self.lock();
        state.nodes.insert(node, None);
        state.node_sizes.insert(node, size);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ContainerHost for StaticHost {
    fn container_size(&self, id: &str) -> Option<ScreenSize> {
        let mut state = self.lock();
        let size = state.containers.get(id).copied()?;
        if let Some(remaining) = state.layout_delay.get_mut(id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Some(ScreenSize::default());
        }
        Some(size)
    }

    fn element_id(&self, node: NodeId) -> Option<String> {
        self.lock().nodes.get(&node).cloned().flatten()
    }

    fn assign_element_id(&self, node: NodeId, id: &str) {
        let mut state = self.lock();
        let size = state.node_sizes.get(&node).copied().unwrap_or_default();
        state.nodes.insert(node, Some(id.to_string()));
        state.containers.insert(id.to_string(), size);
    }
}

/// `map-` followed by seven random alphanumerics
pub fn generate_container_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("map-{}", &raw[..7])
}
