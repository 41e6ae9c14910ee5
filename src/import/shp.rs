//! Shapefile perimeter parsing.
//!
//! Accepts a zip holding a `.shp` (and optionally its `.dbf`), or bare
//! `.shp` bytes. Polygon shapes become features; the matching dbf record
//! supplies attributes. Coordinates must already be longitude/latitude.

use super::{ImportError, ImportedFeature, ATTRIBUTE_KEYS};
use geojson::{Geometry, Value};
use shapefile::dbase::FieldValue;
use shapefile::PolygonRing;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

type Ring = Vec<Vec<f64>>;

/// Parses a zipped shapefile.
pub fn parse_zip(bytes: &[u8]) -> Result<Vec<ImportedFeature>, ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ImportError::Archive(e.to_string()))?;

    let mut shp = None;
    let mut dbf = None;
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping corrupt zip entry {}: {}", i, e);
                continue;
            }
        };
        let name = entry.name().to_ascii_lowercase();
        let slot = if name.ends_with(".shp") && shp.is_none() {
            &mut shp
        } else if name.ends_with(".dbf") && dbf.is_none() {
            &mut dbf
        } else {
            continue;
        };
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| ImportError::Archive(e.to_string()))?;
        *slot = Some(content);
    }

    let shp = shp.ok_or(ImportError::MissingEntry("shp"))?;
    parse_shapefile(&shp, dbf.as_deref())
}

/// Parses `.shp` bytes with optional `.dbf` attributes.
pub fn parse_shapefile(
    shp_bytes: &[u8],
    dbf_bytes: Option<&[u8]>,
) -> Result<Vec<ImportedFeature>, ImportError> {
    let mut shape_reader = shapefile::ShapeReader::new(Cursor::new(shp_bytes))
        .map_err(|e| ImportError::Shapefile(e.to_string()))?;

    let dbf_records: Option<Vec<shapefile::dbase::Record>> = dbf_bytes.and_then(|bytes| {
        shapefile::dbase::Reader::new(Cursor::new(bytes))
            .and_then(|mut r| r.read())
            .map_err(|e| log::warn!("Ignoring unreadable dbf attributes: {}", e))
            .ok()
    });

    let mut features = Vec::new();
    for (idx, result) in shape_reader.iter_shapes().enumerate() {
        let shape = result.map_err(|e| ImportError::Shapefile(e.to_string()))?;
        let Some(value) = convert_shape(&shape) else {
            log::debug!("Skipping non-polygon shape #{}", idx);
            continue;
        };
        check_geographic(&value)?;

        let attributes = dbf_records
            .as_ref()
            .and_then(|records| records.get(idx))
            .map(record_attributes)
            .unwrap_or_default();
        let name = ["name", "Name", "NAME", "Nome", "NOME"]
            .iter()
            .find_map(|key| attributes.get(*key).filter(|v| !v.is_empty()).cloned());
        features.push(ImportedFeature {
            name,
            attributes,
            geometry: Geometry::new(value),
        });
    }
    Ok(features)
}

fn convert_shape(shape: &shapefile::Shape) -> Option<Value> {
    match shape {
        shapefile::Shape::Polygon(poly) => polygons_from_rings(poly.rings(), |p| [p.x, p.y]),
        shapefile::Shape::PolygonM(poly) => polygons_from_rings(poly.rings(), |p| [p.x, p.y]),
        shapefile::Shape::PolygonZ(poly) => polygons_from_rings(poly.rings(), |p| [p.x, p.y]),
        _ => None,
    }
}

/// Groups shapefile rings into polygons. Each hole belongs to the outer ring
/// read before it.
fn polygons_from_rings<P>(rings: &[PolygonRing<P>], xy: impl Fn(&P) -> [f64; 2]) -> Option<Value> {
    let mut polygons: Vec<Vec<Ring>> = Vec::new();
    for ring in rings {
        let coords: Ring = ring.points().iter().map(|p| xy(p).to_vec()).collect();
        match ring {
            PolygonRing::Outer(_) => polygons.push(vec![coords]),
            PolygonRing::Inner(_) => match polygons.last_mut() {
                Some(polygon) => polygon.push(coords),
                None => log::warn!("Dropping shapefile hole without an outer ring"),
            },
        }
    }
    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Value::Polygon),
        _ => Some(Value::MultiPolygon(polygons)),
    }
}

/// Rejects projected coordinates, which would land far outside the map.
fn check_geographic(value: &Value) -> Result<(), ImportError> {
    let positions: Box<dyn Iterator<Item = &Vec<f64>>> = match value {
        Value::Polygon(rings) => Box::new(rings.iter().flatten()),
        Value::MultiPolygon(polygons) => Box::new(polygons.iter().flatten().flatten()),
        _ => Box::new(std::iter::empty()),
    };
    for p in positions {
        if p[0].abs() > 180.0 || p[1].abs() > 90.0 {
            return Err(ImportError::NotGeographic(p[0], p[1]));
        }
    }
    Ok(())
}

fn record_attributes(record: &shapefile::dbase::Record) -> BTreeMap<String, String> {
    ATTRIBUTE_KEYS
        .iter()
        .chain(["name", "Name", "NAME", "Nome", "NOME"].iter())
        .filter_map(|key| {
            let text = match record.get(key)? {
                FieldValue::Character(Some(s)) => s.trim().to_string(),
                FieldValue::Numeric(Some(n)) => n.to_string(),
                FieldValue::Integer(n) => n.to_string(),
                FieldValue::Memo(s) => s.trim().to_string(),
                _ => return None,
            };
            Some((key.to_string(), text))
        })
        .collect()
}
