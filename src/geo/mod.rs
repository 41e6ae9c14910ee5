//! Parcel geometry and the map surface it is rendered on.
//!
//! `geometry` validates, encodes and measures GeoJSON polygons; `surface`
//! abstracts the map that renders them.

pub mod geometry;
mod surface;

pub use geometry::{area_hectares, bounds, decode_stored, encode_layer, format_area, GeometryError};
pub use surface::{LayerId, LayerStyle, MapSurface, MemoryLayer, MemoryMap, SurfaceError};
