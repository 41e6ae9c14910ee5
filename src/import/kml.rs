//! KML and KMZ perimeter parsing.
//!
//! Every `Placemark` holding at least one `Polygon` (directly or inside a
//! `MultiGeometry`) becomes a feature. Its `name` element and its
//! `ExtendedData` values become attributes. Placemarks with only points or
//! lines are skipped.

use super::{ImportError, ImportedFeature};
use crate::geo::geometry::close_ring;
use geojson::{Geometry, Value};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

type Ring = Vec<Vec<f64>>;

/// Placemark being assembled while its children stream past.
#[derive(Default)]
struct PlacemarkBuilder {
    name: Option<String>,
    attributes: BTreeMap<String, String>,
    polygons: Vec<Vec<Ring>>,
    /// Rings of the `Polygon` currently open.
    rings: Option<Vec<Ring>>,
    /// Name of the open `Data`/`SimpleData` element.
    data_name: Option<String>,
}

impl PlacemarkBuilder {
    fn finish(self) -> Option<ImportedFeature> {
        let mut polygons: Vec<Vec<Ring>> = self
            .polygons
            .into_iter()
            .filter(|rings| rings.first().is_some_and(|outer| outer.len() >= 4))
            .collect();
        let value = match polygons.len() {
            0 => return None,
            1 => Value::Polygon(polygons.remove(0)),
            _ => Value::MultiPolygon(polygons),
        };
        Some(ImportedFeature {
            name: self.name,
            attributes: self.attributes,
            geometry: Geometry::new(value),
        })
    }
}

/// Parses a KML document.
pub fn parse_kml(bytes: &[u8]) -> Result<Vec<ImportedFeature>, ImportError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut placemark: Option<PlacemarkBuilder> = None;
    let mut features = Vec::new();
    let mut skipped = 0usize;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                text.clear();
                match name.as_str() {
                    "Placemark" => placemark = Some(PlacemarkBuilder::default()),
                    "Polygon" => {
                        if let Some(p) = placemark.as_mut() {
                            p.rings = Some(Vec::new());
                        }
                    }
                    "Data" | "SimpleData" => {
                        if let Some(p) = placemark.as_mut() {
                            p.data_name = attribute(&e, "name");
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::Text(e)) => {
                let chunk = e
                    .unescape()
                    .map_err(|e| ImportError::Xml(e.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    continue;
                };
                if name == "Placemark" {
                    match placemark.take().and_then(PlacemarkBuilder::finish) {
                        Some(feature) => features.push(feature),
                        None => skipped += 1,
                    }
                }
                let parent = path.last().map(String::as_str);
                match (name.as_str(), placemark.as_mut()) {
                    ("name", Some(p)) if parent == Some("Placemark") => {
                        p.name = Some(text.trim().to_string()).filter(|n| !n.is_empty());
                    }
                    ("value", Some(p)) if parent == Some("Data") => {
                        if let Some(key) = p.data_name.take() {
                            p.attributes.insert(key, text.trim().to_string());
                        }
                    }
                    ("SimpleData", Some(p)) => {
                        if let Some(key) = p.data_name.take() {
                            p.attributes.insert(key, text.trim().to_string());
                        }
                    }
                    ("coordinates", Some(p)) => {
                        if let Some(rings) = p.rings.as_mut() {
                            let ring = parse_coordinates(&text);
                            if path.iter().any(|n| n == "outerBoundaryIs") {
                                rings.insert(0, ring);
                            } else if path.iter().any(|n| n == "innerBoundaryIs") {
                                rings.push(ring);
                            }
                        }
                    }
                    ("Polygon", Some(p)) => {
                        if let Some(rings) = p.rings.take() {
                            p.polygons.push(rings);
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ImportError::Xml(format!(
                    "at byte {}: {}",
                    reader.error_position(),
                    e
                )))
            }
        }
    }

    if skipped > 0 {
        log::debug!("Skipped {} placemarks without polygons", skipped);
    }
    Ok(features)
}

/// Parses every `.kml` entry of a KMZ archive.
pub fn parse_kmz(bytes: &[u8]) -> Result<Vec<ImportedFeature>, ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ImportError::Archive(e.to_string()))?;

    let mut features = Vec::new();
    let mut documents = 0;
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping corrupt KMZ entry {}: {}", i, e);
                continue;
            }
        };
        if !entry.name().to_ascii_lowercase().ends_with(".kml") {
            continue;
        }
        documents += 1;
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| ImportError::Archive(e.to_string()))?;
        features.extend(parse_kml(&content)?);
    }

    if documents == 0 {
        return Err(ImportError::MissingEntry("kml"));
    }
    Ok(features)
}

/// Reads `lng,lat[,alt]` tuples separated by whitespace.
fn parse_coordinates(text: &str) -> Ring {
    let mut ring: Ring = text
        .split_whitespace()
        .filter_map(|tuple| {
            let mut parts = tuple.split(',').map(|v| v.trim().parse::<f64>());
            match (parts.next(), parts.next()) {
                (Some(Ok(lng)), Some(Ok(lat))) if lng.is_finite() && lat.is_finite() => {
                    Some(vec![lng, lat])
                }
                _ => {
                    log::warn!("Ignoring malformed KML coordinate {:?}", tuple);
                    None
                }
            }
        })
        .collect();
    close_ring(&mut ring);
    ring
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}
