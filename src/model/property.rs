//! Core property types.
//!
//! - `PropertyId`: opaque identifier, the join key between a rendered
//!   layer and its attribute record
//! - `PropertyKind`: where a property came from
//! - `Property`: a land parcel with attributes and geometry

use crate::geo::{self, LayerId};
use geojson::Geometry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque property identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PropertyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PropertyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Origin of a property. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyKind {
    Kml,
    Kmz,
    Shapefile,
    Shared,
    Local,
    /// A tag written by an older release, kept verbatim.
    Other(String),
}

impl PropertyKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Kml => "kml",
            Self::Kmz => "kmz",
            Self::Shapefile => "shapefile",
            Self::Shared => "shared",
            Self::Local => "local",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for PropertyKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "kml" => Self::Kml,
            "kmz" => Self::Kmz,
            "shapefile" | "shp" => Self::Shapefile,
            "shared" => Self::Shared,
            "local" => Self::Local,
            _ => Self::Other(tag),
        }
    }
}

impl From<PropertyKind> for String {
    fn from(kind: PropertyKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A land parcel.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub id: PropertyId,
    pub name: String,
    pub kind: PropertyKind,
    /// Hectares with two decimals, or `"N/A"`.
    pub area: String,
    /// Land title registration number.
    pub matricula: String,
    /// Rural environmental registry code.
    pub car: String,
    /// Rural land tax registry code.
    pub itr: String,
    /// Rural property certificate code.
    pub ccir: String,
    pub geometry: Geometry,
    /// Rendered shape, if the property is on the map. Never persisted.
    pub layer: Option<LayerId>,
}

impl Property {
    /// Creates a property with a fresh id, empty registry fields and the
    /// area computed from its geometry.
    pub fn new(name: impl Into<String>, kind: PropertyKind, geometry: Geometry) -> Self {
        let area = geo::format_area(geo::area_hectares(&geometry));
        Self {
            id: PropertyId::generate(),
            name: name.into(),
            kind,
            area,
            matricula: String::new(),
            car: String::new(),
            itr: String::new(),
            ccir: String::new(),
            geometry,
            layer: None,
        }
    }

    /// Recomputes the area from the current geometry.
    pub fn recompute_area(&mut self) {
        self.area = geo::format_area(geo::area_hectares(&self.geometry));
    }

    /// Area in hectares, if it is numeric.
    pub fn area_hectares(&self) -> Option<f64> {
        self.area.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(PropertyKind::from("shp".to_string()), PropertyKind::Shapefile);
        assert_eq!(String::from(PropertyKind::Shared), "shared");
        assert_eq!(
            PropertyKind::from("Polígono".to_string()),
            PropertyKind::Other("Polígono".to_string())
        );
        assert_eq!(PropertyKind::Other("x".to_string()).as_str(), "x");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = PropertyId::generate();
        let b = PropertyId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }
}
