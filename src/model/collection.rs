//! The in-memory property collection.
//!
//! One collection exists per session. Every component receives it by
//! reference; all mutation goes through `add`, `remove`, `set_active` and
//! `install` so the id-uniqueness and single-selection rules hold.

use super::property::{Property, PropertyId};
use super::record::{GeometryForm, PropertyRecord};
use crate::geo::{self, LayerId, LayerStyle, MapSurface, SurfaceError};
use std::collections::HashSet;

/// Errors raised by collection mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    #[error("a property with id {0} already exists")]
    DuplicateId(PropertyId),
    #[error("no property with id {0}")]
    UnknownId(PropertyId),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Records produced from the collection for storage or sharing.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub records: Vec<PropertyRecord>,
    /// Properties left out because their geometry could not be encoded.
    pub omitted: Vec<PropertyId>,
}

/// Outcome of installing a batch of decoded properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: usize,
    pub rejected: usize,
}

/// Ordered set of properties with a single optional active selection.
#[derive(Debug, Default)]
pub struct PropertyCollection {
    items: Vec<Property>,
    active: Option<PropertyId>,
}

impl PropertyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.items.iter()
    }

    pub fn get(&self, id: &PropertyId) -> Option<&Property> {
        self.items.iter().find(|p| &p.id == id)
    }

    pub fn get_mut(&mut self, id: &PropertyId) -> Option<&mut Property> {
        self.items.iter_mut().find(|p| &p.id == id)
    }

    pub fn find_by_layer(&self, layer: LayerId) -> Option<&Property> {
        self.items.iter().find(|p| p.layer == Some(layer))
    }

    pub fn active(&self) -> Option<&Property> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    /// Appends a property. Ids must be unique.
    pub fn add(&mut self, property: Property) -> Result<(), CollectionError> {
        if self.get(&property.id).is_some() {
            return Err(CollectionError::DuplicateId(property.id));
        }
        self.items.push(property);
        Ok(())
    }

    /// Removes a property from the collection and its shape from the map.
    pub fn remove<M: MapSurface>(
        &mut self,
        id: &PropertyId,
        map: &mut M,
    ) -> Result<Property, CollectionError> {
        let index = self
            .items
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| CollectionError::UnknownId(id.clone()))?;
        let property = self.items.remove(index);
        if let Some(layer) = property.layer {
            map.remove_layer(layer);
        }
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        Ok(property)
    }

    /// Removes every property and its shape.
    pub fn clear<M: MapSurface>(&mut self, map: &mut M) {
        for property in self.items.drain(..) {
            if let Some(layer) = property.layer {
                map.remove_layer(layer);
            }
        }
        self.active = None;
    }

    /// Makes `id` the active property.
    ///
    /// The previously active property gets its default style back before
    /// the new one is highlighted.
    pub fn set_active<M: MapSurface>(
        &mut self,
        id: &PropertyId,
        map: &mut M,
    ) -> Result<&Property, CollectionError> {
        let layer = self
            .get(id)
            .ok_or_else(|| CollectionError::UnknownId(id.clone()))?
            .layer;

        if let Some(previous) = self.active().and_then(|p| p.layer) {
            map.set_style(previous, &LayerStyle::DEFAULT);
        }
        if let Some(layer) = layer {
            map.set_style(layer, &LayerStyle::HIGHLIGHT);
        }
        self.active = Some(id.clone());
        self.get(id)
            .ok_or_else(|| CollectionError::UnknownId(id.clone()))
    }

    /// Renders a property and adds it to the collection.
    pub fn add_rendered<M: MapSurface>(
        &mut self,
        mut property: Property,
        map: &mut M,
    ) -> Result<PropertyId, CollectionError> {
        if self.get(&property.id).is_some() {
            return Err(CollectionError::DuplicateId(property.id));
        }
        let layer = map.add_layer(&property.geometry, &LayerStyle::DEFAULT)?;
        property.layer = Some(layer);
        let id = property.id.clone();
        self.items.push(property);
        Ok(id)
    }

    /// Replaces the whole collection with a decoded batch.
    ///
    /// Properties with unusable geometry, repeated ids or that the map
    /// refuses are counted as rejected; the rest are rendered in order.
    /// The current collection is kept when nothing in the batch is usable.
    pub fn install<M: MapSurface>(
        &mut self,
        properties: Vec<Property>,
        map: &mut M,
    ) -> InstallReport {
        let mut report = InstallReport::default();
        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(properties.len());
        for property in properties {
            if let Err(e) = geo::geometry::validate(&property.geometry) {
                log::warn!("Skipping property {}: {}", property.name, e);
                report.rejected += 1;
            } else if !seen.insert(property.id.clone()) {
                log::warn!("Skipping property {}: duplicate id {}", property.name, property.id);
                report.rejected += 1;
            } else {
                accepted.push(property);
            }
        }
        if accepted.is_empty() {
            log::warn!("No usable property in batch; keeping {} current ones", self.len());
            return report;
        }

        self.clear(map);
        for property in accepted {
            let name = property.name.clone();
            match self.add_rendered(property, map) {
                Ok(_) => report.installed += 1,
                Err(e) => {
                    log::warn!("Skipping property {}: {}", name, e);
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Re-derives every property's geometry from its rendered shape.
    ///
    /// Properties without a layer use their stored geometry. Properties whose
    /// shape cannot be encoded are listed in `omitted`.
    pub fn snapshot<M: MapSurface>(&self, map: &M, form: GeometryForm) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for property in &self.items {
            let geometry = match property.layer {
                Some(layer) => geo::encode_layer(map, layer),
                None => geo::geometry::validate(&property.geometry)
                    .ok()
                    .map(|_| property.geometry.clone()),
            };
            let record = geometry
                .as_ref()
                .and_then(|g| PropertyRecord::from_property(property, g, form).ok());
            match record {
                Some(record) => snapshot.records.push(record),
                None => {
                    log::warn!(
                        "Omitting property {} ({}): geometry could not be encoded",
                        property.name,
                        property.id
                    );
                    snapshot.omitted.push(property.id.clone());
                }
            }
        }
        snapshot
    }

    /// Bounding box of every property's geometry.
    pub fn bounds(&self) -> Option<geo_types::Rect<f64>> {
        geo::bounds(self.items.iter().map(|p| &p.geometry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::MemoryMap;
    use crate::model::PropertyKind;
    use geojson::{Geometry, Value};

    fn parcel(id: &str) -> Property {
        let mut property = Property::new(
            id,
            PropertyKind::Kml,
            Geometry::new(Value::Polygon(vec![vec![
                vec![0.0, 0.0],
                vec![0.01, 0.0],
                vec![0.01, 0.01],
                vec![0.0, 0.0],
            ]])),
        );
        property.id = PropertyId::from(id);
        property
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(parcel("a"), &mut map).unwrap();
        assert_eq!(
            collection.add_rendered(parcel("a"), &mut map),
            Err(CollectionError::DuplicateId(PropertyId::from("a")))
        );
        assert_eq!(
            collection.add(parcel("a")),
            Err(CollectionError::DuplicateId(PropertyId::from("a")))
        );
        assert_eq!(map.layer_count(), 1);
    }

    #[test]
    fn test_set_active_restores_previous_style() {
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(parcel("a"), &mut map).unwrap();
        collection.add_rendered(parcel("b"), &mut map).unwrap();
        let layer_a = collection.get(&"a".into()).unwrap().layer.unwrap();
        let layer_b = collection.get(&"b".into()).unwrap().layer.unwrap();

        collection.set_active(&"a".into(), &mut map).unwrap();
        assert_eq!(map.layer(layer_a).unwrap().style, LayerStyle::HIGHLIGHT);

        collection.set_active(&"b".into(), &mut map).unwrap();
        assert_eq!(map.layer(layer_a).unwrap().style, LayerStyle::DEFAULT);
        assert_eq!(map.layer(layer_b).unwrap().style, LayerStyle::HIGHLIGHT);
        assert_eq!(collection.active().unwrap().id.as_str(), "b");

        assert!(collection.set_active(&"zzz".into(), &mut map).is_err());
        assert_eq!(collection.active().unwrap().id.as_str(), "b");
    }

    #[test]
    fn test_remove_detaches_layer_and_clears_selection() {
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(parcel("a"), &mut map).unwrap();
        collection.set_active(&"a".into(), &mut map).unwrap();
        let layer = collection.get(&"a".into()).unwrap().layer.unwrap();

        let removed = collection.remove(&"a".into(), &mut map).unwrap();
        assert_eq!(removed.id.as_str(), "a");
        assert!(!map.contains(layer));
        assert!(collection.active().is_none());
        assert!(collection.is_empty());
    }

    #[test]
    fn test_snapshot_omits_unencodable_shapes() {
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(parcel("a"), &mut map).unwrap();
        collection.add_rendered(parcel("b"), &mut map).unwrap();
        let layer_b = collection.get(&"b".into()).unwrap().layer.unwrap();
        map.replace_geometry(layer_b, serde_json::json!({"type": "Point", "coordinates": [0, 0]}));

        let snapshot = collection.snapshot(&map, GeometryForm::Object);
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].id.as_deref(), Some("a"));
        assert_eq!(snapshot.omitted, vec![PropertyId::from("b")]);
    }

    #[test]
    fn test_install_replaces_and_counts_duplicates() {
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(parcel("old"), &mut map).unwrap();

        let report = collection.install(vec![parcel("x"), parcel("x"), parcel("y")], &mut map);
        assert_eq!(report, InstallReport { installed: 2, rejected: 1 });
        assert!(collection.get(&"old".into()).is_none());
        assert_eq!(map.layer_count(), 2);
    }

    #[test]
    fn test_install_keeps_collection_when_batch_is_unusable() {
        let mut map = MemoryMap::new();
        let mut collection = PropertyCollection::new();
        collection.add_rendered(parcel("kept"), &mut map).unwrap();

        let mut broken = parcel("broken");
        broken.geometry = Geometry::new(Value::Point(vec![0.0, 0.0]));
        let report = collection.install(vec![broken], &mut map);

        assert_eq!(report, InstallReport { installed: 0, rejected: 1 });
        assert!(collection.get(&"kept".into()).is_some());
        assert_eq!(map.layer_count(), 1);
    }
}
