//! Provider-agnostic markers and id-based diffing

use crate::coords::GeoPoint;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_MARKER_COLOR: &str = "#3B82F6";
pub const DEFAULT_MARKER_ICON: &str = "map-pin";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerShape {
    #[default]
    Circle,
    Droplet,
    Square,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSize {
    Small,
    #[default]
    Medium,
    Large,
}

/// Marker as every adapter understands it
///
/// Identity is the `id`; two markers with the same id are the same native object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnifiedMarker {
    pub id: String,
    pub coordinates: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub shape: MarkerShape,
    pub color: String,
    pub icon: String,
    #[serde(default)]
    pub size: MarkerSize,
}

impl UnifiedMarker {
    /// A medium circle in the default colour
    pub fn new(id: impl Into<String>, coordinates: GeoPoint) -> Self {
        Self {
            id: id.into(),
            coordinates,
            title: None,
            description: None,
            category: None,
            shape: MarkerShape::Circle,
            color: DEFAULT_MARKER_COLOR.to_string(),
            icon: DEFAULT_MARKER_ICON.to_string(),
            size: MarkerSize::Medium,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// What the app hands to `add_marker`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    #[serde(default)]
    pub id: Option<String>,
    pub position: GeoPoint,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Free-form kind; `post` markers are drawn as droplets
    #[serde(default)]
    pub kind: Option<String>,
}

/// Colour and icon for a known category key
pub fn category_style(key: &str) -> (&'static str, &'static str) {
    match key {
        "personal" => ("#4ECDC4", DEFAULT_MARKER_ICON),
        "event" => ("#FF6B6B", DEFAULT_MARKER_ICON),
        _ => (DEFAULT_MARKER_COLOR, DEFAULT_MARKER_ICON),
    }
}

impl From<MapMarker> for UnifiedMarker {
    fn from(marker: MapMarker) -> Self {
        let (color, icon) = marker
            .category
            .as_deref()
            .map(category_style)
            .unwrap_or((DEFAULT_MARKER_COLOR, DEFAULT_MARKER_ICON));
        let shape = if marker.kind.as_deref() == Some("post") {
            MarkerShape::Droplet
        } else {
            MarkerShape::Circle
        };
        UnifiedMarker {
            id: marker
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            coordinates: marker.position,
            title: marker.title,
            description: marker.description,
            category: marker.category,
            shape,
            color: color.to_string(),
            icon: icon.to_string(),
            size: MarkerSize::Medium,
        }
    }
}

/// Changes needed to bring a rendered marker set to a desired one
#[derive(Debug, Default, PartialEq)]
pub struct MarkerDiff {
    pub added: Vec<UnifiedMarker>,
    pub updated: Vec<UnifiedMarker>,
    pub removed: Vec<String>,
}

impl MarkerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Drop repeated ids, keeping the first occurrence
pub fn dedup_markers(markers: &[UnifiedMarker]) -> Vec<UnifiedMarker> {
    let mut seen = HashSet::with_capacity(markers.len());
    markers
        .iter()
        .filter(|m| seen.insert(m.id.as_str()))
        .cloned()
        .collect()
}

/// Diff `desired` against what is currently rendered
///
/// Unchanged markers appear in no list, so applying an equal set touches nothing.
pub fn diff_markers(
    current: &HashMap<String, UnifiedMarker>,
    desired: &[UnifiedMarker],
) -> MarkerDiff {
    #[cfg(feature = "profiling")]
    profiling::scope!("marker::diff_markers");
    let desired = dedup_markers(desired);
    let keep: HashSet<&str> = desired.iter().map(|m| m.id.as_str()).collect();

    let mut diff = MarkerDiff::default();
    for marker in &desired {
        match current.get(&marker.id) {
            None => diff.added.push(marker.clone()),
            Some(existing) if existing != marker => diff.updated.push(marker.clone()),
            Some(_) => {}
        }
    }
    diff.removed = current
        .keys()
        .filter(|id| !keep.contains(id.as_str()))
        .cloned()
        .collect();
    diff.removed.sort();
    diff
}
