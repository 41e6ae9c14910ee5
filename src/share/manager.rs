//! Publishing the collection into the page URL and reading it back.

use super::url_state::{self, AddressBar, AddressBarError};
use crate::codec::{CodecError, ShareCodec, Tier};
use crate::geo::MapSurface;
use crate::model::{GeometryForm, Property, PropertyCollection, PropertyId, PropertyKind, PropertyRecord};
use crate::settings::WorkbenchSettings;
use serde_json::Value as Json;
use std::collections::HashSet;
use url::Url;

/// Text placed before the link in WhatsApp and e-mail shares.
const SHARE_MESSAGE: &str = "Confira este mapa de propriedades: ";
const EMAIL_SUBJECT: &str = "Mapa de Propriedades";

/// Publishing failures. Nothing in the page URL changes when one occurs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShareError {
    #[error("There are no properties to share.")]
    NothingToShare,
    #[error("None of the {omitted} properties has a geometry that can be shared.")]
    NothingEncodable { omitted: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(
        "The share link would be {length} characters long, over the {limit} some browsers accept. \
         Share fewer properties or use the JSON export instead."
    )]
    UrlTooLong { length: usize, limit: usize },
    #[error("could not serialize properties: {0}")]
    Serialize(String),
    #[error(transparent)]
    Address(#[from] AddressBarError),
}

/// Reading shared data failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumeError {
    #[error("The link does not contain shared properties.")]
    NoData,
    #[error(transparent)]
    Undecodable(#[from] CodecError),
    #[error("The shared link was read but none of its {skipped} properties is valid.")]
    NoValidRecords { skipped: usize },
}

/// Outcome of a publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub shared: usize,
    /// Properties left out because their geometry could not be encoded.
    pub omitted: Vec<PropertyId>,
    /// `None` when the collection was empty and the token was removed.
    pub tier: Option<Tier>,
    pub url: Url,
}

/// Properties recovered from a token, not yet on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    pub properties: Vec<Property>,
    pub skipped: usize,
    pub tier: Tier,
}

/// Outcome of a consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeReport {
    pub loaded: usize,
    pub skipped: usize,
    pub tier: Tier,
}

/// Moves the property collection in and out of the page URL.
#[derive(Debug, Clone)]
pub struct ShareLinkManager {
    codec: ShareCodec,
    share_param: String,
    max_url_chars: usize,
}

impl ShareLinkManager {
    pub fn new(codec: ShareCodec, settings: &WorkbenchSettings) -> Self {
        Self {
            codec,
            share_param: settings.share_param.clone(),
            max_url_chars: settings.max_url_chars,
        }
    }

    pub fn codec(&self) -> &ShareCodec {
        &self.codec
    }

    /// Writes the whole collection into the share parameter.
    ///
    /// Every check runs before the address is touched. An empty collection
    /// removes the parameter so a reload does not bring back deleted
    /// properties.
    pub fn publish<M: MapSurface, A: AddressBar>(
        &self,
        collection: &PropertyCollection,
        map: &M,
        address: &mut A,
    ) -> Result<PublishReport, ShareError> {
        let current = address.current()?;

        if collection.is_empty() {
            let url = url_state::without_param(&current, &self.share_param);
            if url != current {
                address.replace(&url)?;
                log::info!("Collection is empty; removed share data from the URL");
            }
            return Ok(PublishReport {
                shared: 0,
                omitted: Vec::new(),
                tier: None,
                url,
            });
        }

        let snapshot = collection.snapshot(map, GeometryForm::Object);
        if snapshot.records.is_empty() {
            return Err(ShareError::NothingEncodable {
                omitted: snapshot.omitted.len(),
            });
        }
        let json = serde_json::to_string(&snapshot.records)
            .map_err(|e| ShareError::Serialize(e.to_string()))?;
        let encoded = self.codec.encode(&json)?;

        let url = url_state::with_param(&current, &self.share_param, &encoded.token);
        let length = url.as_str().chars().count();
        if length > self.max_url_chars {
            log::warn!("Share URL too long: {} > {}", length, self.max_url_chars);
            return Err(ShareError::UrlTooLong {
                length,
                limit: self.max_url_chars,
            });
        }

        if url != current {
            address.replace(&url)?;
        }
        log::info!(
            "Published {} properties ({} omitted) with the {} tier, URL length {}",
            snapshot.records.len(),
            snapshot.omitted.len(),
            encoded.tier,
            length
        );
        Ok(PublishReport {
            shared: snapshot.records.len(),
            omitted: snapshot.omitted,
            tier: Some(encoded.tier),
            url,
        })
    }

    /// Decodes a token into properties without touching the map.
    ///
    /// A single record is read as a one-element list. Records without a
    /// usable geometry, or repeating an earlier id, are skipped and counted.
    pub fn decode_token(&self, token: Option<&str>) -> Result<DecodedBatch, ConsumeError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(ConsumeError::NoData)?;
        let decoded = self.codec.decode(token)?;
        let entries = match decoded.value {
            Json::Array(entries) => entries,
            single => vec![single],
        };

        let mut properties = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();
        let mut skipped = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            let property = serde_json::from_value::<PropertyRecord>(entry)
                .map_err(|e| e.to_string())
                .and_then(|record| {
                    record
                        .into_property(index, PropertyKind::Shared)
                        .map_err(|e| e.to_string())
                });
            match property {
                Ok(property) if seen.insert(property.id.clone()) => properties.push(property),
                Ok(property) => {
                    log::warn!("Skipping shared property with repeated id {}", property.id);
                    skipped += 1;
                }
                Err(e) => {
                    log::warn!("Skipping shared property #{}: {}", index, e);
                    skipped += 1;
                }
            }
        }

        if properties.is_empty() {
            return Err(ConsumeError::NoValidRecords { skipped });
        }
        Ok(DecodedBatch {
            properties,
            skipped,
            tier: decoded.tier,
        })
    }

    /// Replaces the collection with the properties in `token` and renders
    /// them. The URL is left as it is.
    pub fn consume<M: MapSurface>(
        &self,
        token: Option<&str>,
        collection: &mut PropertyCollection,
        map: &mut M,
    ) -> Result<ConsumeReport, ConsumeError> {
        let batch = self.decode_token(token)?;
        let installed = collection.install(batch.properties, map);
        if installed.installed == 0 {
            return Err(ConsumeError::NoValidRecords {
                skipped: batch.skipped + installed.rejected,
            });
        }
        if let Some(bounds) = collection.bounds() {
            map.fit_bounds(bounds);
        }
        log::info!(
            "Loaded {} shared properties ({} skipped)",
            installed.installed,
            batch.skipped + installed.rejected
        );
        Ok(ConsumeReport {
            loaded: installed.installed,
            skipped: batch.skipped + installed.rejected,
            tier: batch.tier,
        })
    }
}

/// WhatsApp share link for a page URL.
pub fn whatsapp_link(url: &Url) -> String {
    format!(
        "https://api.whatsapp.com/send?text={}",
        urlencoding::encode(&format!("{}{}", SHARE_MESSAGE, url))
    )
}

/// `mailto:` share link for a page URL.
pub fn email_link(url: &Url) -> String {
    format!(
        "mailto:?subject={}&body={}",
        urlencoding::encode(EMAIL_SUBJECT),
        urlencoding::encode(&format!("{}{}", SHARE_MESSAGE, url))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::geo::MemoryMap;
    use crate::share::MemoryAddressBar;
    use geojson::{Geometry, Value};
    use serde_json::json;

    fn manager() -> ShareLinkManager {
        let settings = WorkbenchSettings::default();
        ShareLinkManager::new(
            ShareCodec::new(&Capabilities::default(), &settings),
            &settings,
        )
    }

    fn lot(name: &str, offset: f64) -> Property {
        Property::new(
            name,
            PropertyKind::Kml,
            Geometry::new(Value::Polygon(vec![vec![
                vec![-47.0 + offset, -15.0],
                vec![-47.01 + offset, -15.0],
                vec![-47.01 + offset, -15.01],
                vec![-47.0 + offset, -15.0],
            ]])),
        )
    }

    fn token(address: &MemoryAddressBar) -> Option<String> {
        address
            .url()
            .query_pairs()
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_publish_then_consume_restores_collection() {
        let manager = manager();
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        let mut a = lot("A", 0.0);
        a.matricula = "M-1".to_string();
        collection.add_rendered(a, &mut map).unwrap();
        collection.add_rendered(lot("B", 0.5), &mut map).unwrap();
        let mut address = MemoryAddressBar::parse("https://example.org/?produtor=p1").unwrap();

        let report = manager.publish(&collection, &map, &mut address).unwrap();
        assert_eq!(report.shared, 2);
        assert!(report.omitted.is_empty());
        assert_eq!(address.replacements(), 1);
        assert_eq!(
            address.url().query_pairs().next().map(|(k, v)| (k.into_owned(), v.into_owned())),
            Some(("produtor".to_string(), "p1".to_string()))
        );

        let mut restored = PropertyCollection::new();
        let mut other_map = MemoryMap::new();
        let consumed = manager
            .consume(token(&address).as_deref(), &mut restored, &mut other_map)
            .unwrap();
        assert_eq!(consumed.loaded, 2);
        assert_eq!(consumed.skipped, 0);
        assert_eq!(address.replacements(), 1);
        assert!(other_map.viewport().is_some());

        for original in collection.iter() {
            let copy = restored.get(&original.id).unwrap();
            assert_eq!(copy.name, original.name);
            assert_eq!(copy.matricula, original.matricula);
            assert_eq!(copy.area, original.area);
            match (&copy.geometry.value, &original.geometry.value) {
                (Value::Polygon(a), Value::Polygon(b)) => {
                    for (p, q) in a[0].iter().zip(&b[0]) {
                        assert!((p[0] - q[0]).abs() < 1e-6 && (p[1] - q[1]).abs() < 1e-6);
                    }
                }
                other => panic!("unexpected geometries {:?}", other),
            }
        }
    }

    #[test]
    fn test_publish_is_idempotent() {
        let manager = manager();
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(lot("A", 0.0), &mut map).unwrap();
        let mut address = MemoryAddressBar::parse("https://example.org/").unwrap();

        let first = manager.publish(&collection, &map, &mut address).unwrap();
        let second = manager.publish(&collection, &map, &mut address).unwrap();
        assert_eq!(first.url, second.url);
        assert_eq!(address.replacements(), 1);
    }

    #[test]
    fn test_oversized_payload_leaves_url_untouched() {
        let manager = manager();
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        let mut big = lot("A", 0.0);
        big.car = "x".repeat(50_001);
        collection.add_rendered(big, &mut map).unwrap();
        let mut address = MemoryAddressBar::parse("https://example.org/?data=old").unwrap();

        let err = manager.publish(&collection, &map, &mut address).unwrap_err();
        assert!(matches!(
            err,
            ShareError::Codec(CodecError::PayloadTooLarge { limit: 50_000, .. })
        ));
        assert_eq!(address.replacements(), 0);
        assert_eq!(token(&address).as_deref(), Some("old"));
    }

    #[test]
    fn test_long_url_is_refused() {
        let manager = manager();
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        for i in 0..60 {
            let mut property = lot(&format!("Lote {}", i), i as f64 * 0.37);
            property.ccir = uuid::Uuid::new_v4().to_string();
            collection.add_rendered(property, &mut map).unwrap();
        }
        let mut address = MemoryAddressBar::parse("https://example.org/").unwrap();
        let err = manager.publish(&collection, &map, &mut address).unwrap_err();
        assert!(matches!(err, ShareError::UrlTooLong { limit: 2_000, .. }));
        assert_eq!(address.replacements(), 0);
    }

    #[test]
    fn test_empty_collection_removes_token() {
        let manager = manager();
        let map = MemoryMap::new();
        let collection = PropertyCollection::new();
        let mut address =
            MemoryAddressBar::parse("https://example.org/?produtor=p&data=stale").unwrap();
        let report = manager.publish(&collection, &map, &mut address).unwrap();
        assert_eq!(report.shared, 0);
        assert_eq!(report.tier, None);
        assert_eq!(address.url().query(), Some("produtor=p"));
    }

    #[test]
    fn test_unencodable_collection_is_reported() {
        let manager = manager();
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(lot("A", 0.0), &mut map).unwrap();
        let layer = collection.iter().next().unwrap().layer.unwrap();
        map.replace_geometry(layer, json!({"type": "Polygon", "coordinates": []}));
        let mut address = MemoryAddressBar::parse("https://example.org/").unwrap();
        assert_eq!(
            manager.publish(&collection, &map, &mut address),
            Err(ShareError::NothingEncodable { omitted: 1 })
        );
        assert_eq!(address.replacements(), 0);
    }

    #[test]
    fn test_consume_failures_are_distinguished() {
        let manager = manager();
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();

        assert_eq!(
            manager.consume(None, &mut collection, &mut map),
            Err(ConsumeError::NoData)
        );
        assert_eq!(
            manager.consume(Some("%%garbage"), &mut collection, &mut map),
            Err(ConsumeError::Undecodable(CodecError::Undecodable))
        );
        let no_geometry = urlencoding::encode(r#"[{"id":"a"},{"id":"b","geometria":null}]"#).into_owned();
        assert_eq!(
            manager.consume(Some(&no_geometry), &mut collection, &mut map),
            Err(ConsumeError::NoValidRecords { skipped: 2 })
        );
    }

    #[test]
    fn test_single_object_and_missing_fields() {
        let manager = manager();
        let token = urlencoding::encode(
            &json!({
                "geometria": {"type": "Polygon", "coordinates": [[[0, 0], [0.01, 0], [0.01, 0.01], [0, 0]]]}
            })
            .to_string(),
        )
        .into_owned();
        let batch = manager.decode_token(Some(&token)).unwrap();
        assert_eq!(batch.properties.len(), 1);
        assert_eq!(batch.tier, Tier::Plain);
        let property = &batch.properties[0];
        assert_eq!(property.id.as_str(), "prop-0");
        assert_eq!(property.name, crate::model::UNNAMED_PROPERTY);
        assert_eq!(property.kind, PropertyKind::Shared);
    }

    #[test]
    fn test_repeated_ids_are_skipped() {
        let manager = manager();
        let geometry = json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]});
        let token = urlencoding::encode(
            &json!([
                {"id": "x", "geometria": geometry},
                {"id": "x", "geometria": geometry}
            ])
            .to_string(),
        )
        .into_owned();
        let batch = manager.decode_token(Some(&token)).unwrap();
        assert_eq!(batch.properties.len(), 1);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_share_links_embed_encoded_url() {
        let url = Url::parse("https://example.org/?data=a%252B").unwrap();
        let whatsapp = whatsapp_link(&url);
        assert!(whatsapp.starts_with("https://api.whatsapp.com/send?text=Confira%20este"));
        assert!(whatsapp.ends_with("https%3A%2F%2Fexample.org%2F%3Fdata%3Da%25252B"));
        assert!(email_link(&url).starts_with("mailto:?subject=Mapa%20de%20Propriedades&body="));
    }
}
