//! Map surface abstraction.
//!
//! The workbench never draws anything itself. It hands GeoJSON geometry to
//! a `MapSurface`, keeps the returned `LayerId` as a back-reference, and
//! reads the shape back through the same surface when it needs to persist
//! or share it. On the web the surface is a JavaScript map bridge; natively
//! `MemoryMap` records what would have been drawn.

use geo_types::Rect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Handle of a shape rendered on a map surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u32);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Path style applied to a rendered polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStyle {
    pub color: &'static str,
    pub weight: f32,
    pub opacity: f32,
    pub fill_color: &'static str,
    pub fill_opacity: f32,
}

impl LayerStyle {
    /// Style of every parcel that is not selected.
    pub const DEFAULT: Self = Self {
        color: "#2a7e19",
        weight: 2.0,
        opacity: 0.7,
        fill_color: "#2a7e19",
        fill_opacity: 0.2,
    };

    /// Style of the active parcel.
    pub const HIGHLIGHT: Self = Self {
        color: "#e63946",
        weight: 3.0,
        opacity: 0.9,
        fill_color: "#e63946",
        fill_opacity: 0.3,
    };

    /// Style under the pointer.
    pub const HOVER: Self = Self {
        color: "#2a7e19",
        weight: 3.0,
        opacity: 0.7,
        fill_color: "#2a7e19",
        fill_opacity: 0.4,
    };
}

/// Errors reported by a map surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("the map is not initialized")]
    NotInitialized,
    #[error("the map rejected the shape: {0}")]
    Rejected(String),
}

/// Rendering surface the workbench draws parcels on.
pub trait MapSurface {
    /// Renders a GeoJSON geometry and returns its handle.
    fn add_layer(
        &mut self,
        geometry: &geojson::Geometry,
        style: &LayerStyle,
    ) -> Result<LayerId, SurfaceError>;

    /// Detaches a shape from the map. Unknown handles are ignored.
    fn remove_layer(&mut self, layer: LayerId);

    /// Restyles a rendered shape.
    fn set_style(&mut self, layer: LayerId, style: &LayerStyle);

    /// Moves the viewport so `bounds` (x = longitude, y = latitude) is visible.
    fn fit_bounds(&mut self, bounds: Rect<f64>);

    /// Exports the current shape of a layer as a GeoJSON geometry object.
    ///
    /// Returns `None` when the layer is unknown. The value is whatever the
    /// surface produced and is validated by the caller.
    fn layer_geojson(&self, layer: LayerId) -> Option<serde_json::Value>;
}

/// A rendered shape kept by `MemoryMap`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLayer {
    pub geometry: serde_json::Value,
    pub style: LayerStyle,
}

/// In-memory map surface for native builds and tests.
#[derive(Debug, Default)]
pub struct MemoryMap {
    layers: BTreeMap<LayerId, MemoryLayer>,
    next_id: u32,
    viewport: Option<Rect<f64>>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self, layer: LayerId) -> Option<&MemoryLayer> {
        self.layers.get(&layer)
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        self.layers.contains_key(&layer)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn viewport(&self) -> Option<Rect<f64>> {
        self.viewport
    }

    /// Overwrites the shape of a layer, as a user edit on the map would.
    pub fn replace_geometry(&mut self, layer: LayerId, geometry: serde_json::Value) {
        if let Some(entry) = self.layers.get_mut(&layer) {
            entry.geometry = geometry;
        }
    }
}

impl MapSurface for MemoryMap {
    fn add_layer(
        &mut self,
        geometry: &geojson::Geometry,
        style: &LayerStyle,
    ) -> Result<LayerId, SurfaceError> {
        let geometry = serde_json::to_value(geometry)
            .map_err(|e| SurfaceError::Rejected(e.to_string()))?;
        self.next_id += 1;
        let id = LayerId(self.next_id);
        self.layers.insert(
            id,
            MemoryLayer {
                geometry,
                style: *style,
            },
        );
        Ok(id)
    }

    fn remove_layer(&mut self, layer: LayerId) {
        self.layers.remove(&layer);
    }

    fn set_style(&mut self, layer: LayerId, style: &LayerStyle) {
        if let Some(entry) = self.layers.get_mut(&layer) {
            entry.style = *style;
        }
    }

    fn fit_bounds(&mut self, bounds: Rect<f64>) {
        self.viewport = Some(bounds);
    }

    fn layer_geojson(&self, layer: LayerId) -> Option<serde_json::Value> {
        self.layers.get(&layer).map(|entry| entry.geometry.clone())
    }
}
