//! Perimeter file import.
//!
//! Turns the bytes of a user-picked file into polygon features, then into
//! properties ready to be rendered. The file kind is chosen by extension.

mod kml;
mod shp;

use crate::model::{Property, PropertyKind};
use geojson::Geometry;
use std::collections::BTreeMap;
use std::path::Path;

pub use kml::{parse_kml, parse_kmz};
pub use shp::{parse_shapefile, parse_zip};

/// Attribute keys read into the registry fields, as written by common
/// perimeter exports.
pub(crate) const ATTRIBUTE_KEYS: &[&str] = &[
    "MATRICULA", "Matricula", "matricula", "CAR", "Car", "car", "ITR", "Itr", "itr", "CCIR",
    "Ccir", "ccir",
];

/// Keys holding a feature's display name, in lookup order.
const NAME_KEYS: &[&str] = &["name", "Name", "Nome", "NOME", "NAME"];

/// Errors raised while importing a file.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Unsupported file type {0:?}. Use KML, KMZ or a zipped Shapefile.")]
    UnsupportedType(String),
    #[error("invalid KML: {0}")]
    Xml(String),
    #[error("could not read archive: {0}")]
    Archive(String),
    #[error("the archive does not contain a .{0} file")]
    MissingEntry(&'static str),
    #[error("invalid shapefile: {0}")]
    Shapefile(String),
    #[error(
        "coordinate ({0}, {1}) is not longitude/latitude; export the shapefile in WGS84 (EPSG:4326)"
    )]
    NotGeographic(f64, f64),
    #[error("{0} contains no polygons")]
    NoPolygons(String),
}

/// Supported perimeter file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Kml,
    Kmz,
    /// A zip holding `.shp` and `.dbf` files.
    ShapefileZip,
    /// A bare `.shp` file, without attributes.
    Shp,
}

impl FileKind {
    /// Picks the kind from a file name's extension.
    pub fn detect(file_name: &str) -> Result<Self, ImportError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "kml" => Ok(Self::Kml),
            "kmz" => Ok(Self::Kmz),
            "zip" => Ok(Self::ShapefileZip),
            "shp" => Ok(Self::Shp),
            _ => Err(ImportError::UnsupportedType(file_name.to_string())),
        }
    }

    /// Origin tag given to properties imported from this kind.
    pub fn property_kind(self) -> PropertyKind {
        match self {
            Self::Kml => PropertyKind::Kml,
            Self::Kmz => PropertyKind::Kmz,
            Self::ShapefileZip | Self::Shp => PropertyKind::Shapefile,
        }
    }
}

/// A polygon read from a perimeter file, with its raw attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFeature {
    pub name: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub geometry: Geometry,
}

impl ImportedFeature {
    fn lookup(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.attributes.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    /// Builds a property, naming it after the file when the feature has
    /// no name of its own.
    pub fn into_property(self, fallback_name: &str, kind: PropertyKind) -> Property {
        let name = self
            .name
            .clone()
            .or_else(|| self.lookup(NAME_KEYS).map(str::to_string))
            .unwrap_or_else(|| fallback_name.to_string());
        let field = |keys: &[&str]| self.lookup(keys).unwrap_or_default().to_string();
        let matricula = field(&ATTRIBUTE_KEYS[0..3]);
        let car = field(&ATTRIBUTE_KEYS[3..6]);
        let itr = field(&ATTRIBUTE_KEYS[6..9]);
        let ccir = field(&ATTRIBUTE_KEYS[9..12]);

        let mut property = Property::new(name, kind, self.geometry);
        property.matricula = matricula;
        property.car = car;
        property.itr = itr;
        property.ccir = ccir;
        property
    }
}

/// Parses a perimeter file into properties.
pub fn parse_file(file_name: &str, bytes: &[u8]) -> Result<Vec<Property>, ImportError> {
    let kind = FileKind::detect(file_name)?;
    let features = match kind {
        FileKind::Kml => parse_kml(bytes)?,
        FileKind::Kmz => parse_kmz(bytes)?,
        FileKind::ShapefileZip => parse_zip(bytes)?,
        FileKind::Shp => parse_shapefile(bytes, None)?,
    };
    if features.is_empty() {
        return Err(ImportError::NoPolygons(file_name.to_string()));
    }

    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    log::info!("Read {} polygons from {}", features.len(), file_name);
    Ok(features
        .into_iter()
        .map(|f| f.into_property(stem, kind.property_kind()))
        .collect())
}
