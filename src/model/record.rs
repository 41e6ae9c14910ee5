//! Flat property record shared by local storage, share links and exports.
//!
//! ```json
//! {"id": "..", "nome": "..", "area": "12.34", "tipo": "kml",
//!  "matricula": "", "car": "", "itr": "", "ccir": "", "geometria": ..}
//! ```
//!
//! Records written by older releases carry numbers where text is expected
//! and may omit any field, so every field is read leniently.

use super::property::{Property, PropertyId, PropertyKind};
use crate::geo::{self, GeometryError};
use geojson::Geometry;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

/// Name given to records that arrive without one.
pub const UNNAMED_PROPERTY: &str = "Propriedade Sem Nome";

/// How the `geometria` field is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryForm {
    /// A GeoJSON geometry object (share links, exports).
    Object,
    /// A JSON-encoded string of the geometry object (local storage).
    EncodedString,
}

/// Serialized form of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub nome: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub area: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub tipo: Option<String>,
    #[serde(default, deserialize_with = "lenient_field")]
    pub matricula: String,
    #[serde(default, deserialize_with = "lenient_field")]
    pub car: String,
    #[serde(default, deserialize_with = "lenient_field")]
    pub itr: String,
    #[serde(default, deserialize_with = "lenient_field")]
    pub ccir: String,
    #[serde(default)]
    pub geometria: Option<Json>,
}

impl PropertyRecord {
    /// Builds the record of a property whose geometry was just encoded.
    pub fn from_property(
        property: &Property,
        geometry: &Geometry,
        form: GeometryForm,
    ) -> Result<Self, serde_json::Error> {
        let geometria = match form {
            GeometryForm::Object => serde_json::to_value(geometry)?,
            GeometryForm::EncodedString => Json::String(serde_json::to_string(geometry)?),
        };
        Ok(Self {
            id: Some(property.id.to_string()),
            nome: Some(property.name.clone()),
            area: Some(property.area.clone()),
            tipo: Some(property.kind.to_string()),
            matricula: property.matricula.clone(),
            car: property.car.clone(),
            itr: property.itr.clone(),
            ccir: property.ccir.clone(),
            geometria: Some(geometria),
        })
    }

    /// Rebuilds a property, filling defaults for missing fields.
    ///
    /// `index` is the record's position in its batch and names records
    /// that arrive without an id. The returned property is not on a map.
    pub fn into_property(
        self,
        index: usize,
        default_kind: PropertyKind,
    ) -> Result<Property, GeometryError> {
        let geometry = match &self.geometria {
            Some(value) => geo::decode_stored(value)?,
            None => return Err(GeometryError::Empty),
        };

        let area = match self.area.as_deref().map(str::trim) {
            Some(text) if text == geo::geometry::AREA_UNAVAILABLE => text.to_string(),
            Some(text) => match text.parse::<f64>() {
                Ok(value) if value.is_finite() => text.to_string(),
                Ok(_) => geo::geometry::AREA_UNAVAILABLE.to_string(),
                Err(_) => geo::format_area(geo::area_hectares(&geometry)),
            },
            None => geo::format_area(geo::area_hectares(&geometry)),
        };

        Ok(Property {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .map(PropertyId::from)
                .unwrap_or_else(|| PropertyId(format!("prop-{}", index))),
            name: self
                .nome
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNNAMED_PROPERTY.to_string()),
            kind: self
                .tipo
                .filter(|tag| !tag.is_empty())
                .map(PropertyKind::from)
                .unwrap_or(default_kind),
            area,
            matricula: self.matricula,
            car: self.car,
            itr: self.itr,
            ccir: self.ccir,
            geometry,
            layer: None,
        })
    }
}

/// Reads text that older writers may have stored as a number or boolean.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Json::deserialize(deserializer)? {
        Json::String(s) => Some(s),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_field<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_text(deserializer).map(Option::unwrap_or_default)
}
