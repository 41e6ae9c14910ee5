//! Parcel geometry encoding and decoding.
//!
//! Only `Polygon` and `MultiPolygon` geometries describe a parcel. Stored
//! geometry comes in several historical shapes:
//!
//! ```text
//! {"type":"Polygon","coordinates":[[[lng,lat],...]]}   GeoJSON object
//! "{\"type\":\"Polygon\",...}"                          JSON-encoded string of the above
//! [[[lng,lat],...],...]                                 raw polygon coordinates
//! [[lng,lat],...]                                       a single raw ring
//! [[{"lat":..,"lng":..},...]]                           map-library lat/lng objects
//! ```
//!
//! All of them decode to the same GeoJSON geometry.

use super::surface::{LayerId, MapSurface};
use geo::{BoundingRect, ChamberlainDuquetteArea};
use geo_types::{Coord, LineString, MultiPolygon, Polygon, Rect};
use geojson::{Geometry, Value};
use serde_json::Value as Json;

/// Square meters in a hectare.
const SQ_METERS_PER_HECTARE: f64 = 10_000.0;

/// Area text shown when no area can be computed.
pub const AREA_UNAVAILABLE: &str = "N/A";

/// Errors raised while validating or decoding parcel geometry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("unsupported geometry type {0}; only Polygon and MultiPolygon are accepted")]
    UnsupportedType(String),
    #[error("geometry has no coordinates")]
    Empty,
    #[error("malformed geometry: {0}")]
    Malformed(String),
}

/// Checks that a geometry is a non-empty polygon or multipolygon.
pub fn validate(geometry: &Geometry) -> Result<(), GeometryError> {
    match &geometry.value {
        Value::Polygon(rings) => validate_polygon(rings),
        Value::MultiPolygon(polygons) => {
            if polygons.is_empty() {
                return Err(GeometryError::Empty);
            }
            polygons.iter().try_for_each(|rings| validate_polygon(rings))
        }
        other => Err(GeometryError::UnsupportedType(type_name(other).to_string())),
    }
}

/// GeoJSON type tag of a geometry value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn validate_polygon(rings: &[Vec<Vec<f64>>]) -> Result<(), GeometryError> {
    if rings.is_empty() {
        return Err(GeometryError::Empty);
    }
    for ring in rings {
        if ring.is_empty() {
            return Err(GeometryError::Empty);
        }
        for position in ring {
            if position.len() < 2 || position.iter().take(2).any(|v| !v.is_finite()) {
                return Err(GeometryError::Malformed(format!(
                    "invalid position {:?}",
                    position
                )));
            }
        }
    }
    Ok(())
}

/// Re-derives the geometry of a rendered shape.
///
/// Returns `None` for unknown layers and for anything that is not a valid
/// polygon; callers drop that parcel from the operation at hand.
pub fn encode_layer<M: MapSurface>(map: &M, layer: LayerId) -> Option<Geometry> {
    let raw = map.layer_geojson(layer)?;
    match decode_geojson(raw) {
        Ok(geometry) => Some(geometry),
        Err(e) => {
            log::warn!("Could not encode geometry of {}: {}", layer, e);
            None
        }
    }
}

/// Decodes stored geometry in any of the accepted historical forms.
pub fn decode_stored(value: &Json) -> Result<Geometry, GeometryError> {
    match value {
        Json::String(text) => {
            let inner: Json = serde_json::from_str(text)
                .map_err(|e| GeometryError::Malformed(e.to_string()))?;
            if inner.is_string() {
                return Err(GeometryError::Malformed(
                    "geometry is doubly encoded".to_string(),
                ));
            }
            decode_stored(&inner)
        }
        Json::Object(_) => decode_geojson(value.clone()),
        Json::Array(_) => decode_raw_coordinates(value),
        Json::Null => Err(GeometryError::Empty),
        other => Err(GeometryError::Malformed(format!(
            "unexpected geometry value {}",
            other
        ))),
    }
}

/// Decodes a GeoJSON geometry object, or the geometry of a Feature.
fn decode_geojson(value: Json) -> Result<Geometry, GeometryError> {
    let value = match value.get("type").and_then(Json::as_str) {
        Some("Feature") => value.get("geometry").cloned().unwrap_or(Json::Null),
        _ => value,
    };
    if value.is_null() {
        return Err(GeometryError::Empty);
    }
    let geometry: Geometry =
        serde_json::from_value(value).map_err(|e| GeometryError::Malformed(e.to_string()))?;
    validate(&geometry)?;
    Ok(geometry)
}

/// Decodes a bare coordinate array, nested one to three levels deep.
fn decode_raw_coordinates(value: &Json) -> Result<Geometry, GeometryError> {
    let geometry = match nesting_depth(value)? {
        1 => Value::Polygon(vec![ring(value)?]),
        2 => Value::Polygon(rings(value)?),
        3 => Value::MultiPolygon(
            as_array(value)?
                .iter()
                .map(rings)
                .collect::<Result<_, _>>()?,
        ),
        depth => {
            return Err(GeometryError::Malformed(format!(
                "coordinate arrays nested {} levels deep",
                depth
            )))
        }
    };
    let geometry = Geometry::new(geometry);
    validate(&geometry)?;
    Ok(geometry)
}

/// Levels of array nesting above the positions.
fn nesting_depth(value: &Json) -> Result<usize, GeometryError> {
    if position(value).is_some() {
        return Ok(0);
    }
    match as_array(value)?.first() {
        Some(first) => Ok(1 + nesting_depth(first)?),
        None => Err(GeometryError::Empty),
    }
}

fn as_array(value: &Json) -> Result<&Vec<Json>, GeometryError> {
    value
        .as_array()
        .ok_or_else(|| GeometryError::Malformed(format!("expected an array, found {}", value)))
}

/// Reads `[lng, lat, ...]` or `{"lat": .., "lng": ..}`.
fn position(value: &Json) -> Option<Vec<f64>> {
    match value {
        Json::Array(items) if items.len() >= 2 && items.iter().all(Json::is_number) => {
            Some(items.iter().take(2).filter_map(Json::as_f64).collect())
        }
        Json::Object(map) => {
            let lat = map.get("lat")?.as_f64()?;
            let lng = map.get("lng").or_else(|| map.get("lon"))?.as_f64()?;
            Some(vec![lng, lat])
        }
        _ => None,
    }
}

fn ring(value: &Json) -> Result<Vec<Vec<f64>>, GeometryError> {
    let mut ring = as_array(value)?
        .iter()
        .map(|p| {
            position(p).ok_or_else(|| GeometryError::Malformed(format!("invalid position {}", p)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    close_ring(&mut ring);
    Ok(ring)
}

fn rings(value: &Json) -> Result<Vec<Vec<Vec<f64>>>, GeometryError> {
    as_array(value)?.iter().map(ring).collect()
}

/// Repeats the first position at the end when a ring is left open.
pub fn close_ring(ring: &mut Vec<Vec<f64>>) {
    let closing = match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first != last => Some(first.clone()),
        _ => None,
    };
    if let Some(first) = closing {
        ring.push(first);
    }
}

/// Converts a parcel geometry to `geo` types for measurement.
pub fn to_multi_polygon(geometry: &Geometry) -> Result<MultiPolygon<f64>, GeometryError> {
    validate(geometry)?;
    let polygons = match &geometry.value {
        Value::Polygon(rings) => vec![polygon_from_rings(rings)],
        Value::MultiPolygon(polygons) => polygons.iter().map(|r| polygon_from_rings(r)).collect(),
        other => return Err(GeometryError::UnsupportedType(type_name(other).to_string())),
    };
    Ok(MultiPolygon(polygons))
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Polygon<f64> {
    let mut line_strings = rings.iter().map(|ring| {
        LineString(
            ring.iter()
                .map(|p| Coord { x: p[0], y: p[1] })
                .collect(),
        )
    });
    let exterior = line_strings.next().unwrap_or_else(|| LineString(Vec::new()));
    Polygon::new(exterior, line_strings.collect())
}

/// Geodesic area in hectares.
///
/// Uses the spherical Chamberlain-Duquette formula on the WGS84 equatorial
/// radius, the same approximation the web map library applies.
pub fn area_hectares(geometry: &Geometry) -> Option<f64> {
    let shape = to_multi_polygon(geometry).ok()?;
    let square_meters = shape.chamberlain_duquette_unsigned_area();
    square_meters
        .is_finite()
        .then_some(square_meters / SQ_METERS_PER_HECTARE)
}

/// Formats an area for display and storage: two decimals or `"N/A"`.
pub fn format_area(hectares: Option<f64>) -> String {
    match hectares {
        Some(ha) if ha.is_finite() => format!("{:.2}", ha),
        _ => AREA_UNAVAILABLE.to_string(),
    }
}

/// Bounding box of one or more geometries (x = longitude, y = latitude).
pub fn bounds<'a>(geometries: impl IntoIterator<Item = &'a Geometry>) -> Option<Rect<f64>> {
    geometries
        .into_iter()
        .filter_map(|g| to_multi_polygon(g).ok()?.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })
}
