//! The workbench session.
//!
//! `Workbench` owns the property collection and wires the map surface,
//! the page address and the storage backend to it. Every user action
//! (import, select, edit, delete, share, export) is a method here, and every
//! change to the collection is followed by a local save and a publish.

use crate::capabilities::Capabilities;
use crate::codec::ShareCodec;
use crate::geo::{self, GeometryError, LayerStyle, MapSurface};
use crate::import::{self, ImportError};
use crate::loader::{LoadOutcome, Reconciler, RemoteSource, SourceKind};
use crate::model::{
    CollectionError, GeometryForm, Property, PropertyCollection, PropertyId,
};
use crate::settings::WorkbenchSettings;
use crate::share::{
    self, AddressBar, ConsumeError, ConsumeReport, PublishReport, ShareError, ShareLinkManager,
    UrlParams,
};
use crate::storage::{KeyValueStore, PersistenceStore, SaveReport, StorageError};
use url::Url;
use web_time::Instant;

/// Errors raised by property edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("no property with id {0}")]
    UnknownProperty(PropertyId),
    #[error("Area must be a number of hectares, got {0:?}")]
    InvalidArea(String),
    #[error("the shape of {0} could not be read from the map")]
    ShapeUnavailable(PropertyId),
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Attribute changes for one property. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeEdit {
    pub name: Option<String>,
    /// Hectares as typed; empty means unknown.
    pub area: Option<String>,
    pub matricula: Option<String>,
    pub car: Option<String>,
    pub itr: Option<String>,
    pub ccir: Option<String>,
}

/// What happened when a change was written out.
#[derive(Debug)]
pub struct SyncReport {
    pub saved: Result<SaveReport, StorageError>,
    pub published: Result<PublishReport, ShareError>,
}

/// Outcome of a file import.
#[derive(Debug)]
pub struct ImportReport {
    pub added: Vec<PropertyId>,
    /// Features the map refused.
    pub rejected: usize,
    pub sync: SyncReport,
}

/// Links offered in the share dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLinks {
    pub url: Url,
    pub whatsapp: String,
    pub email: String,
}

/// A workbench session over a map surface `M`, an address bar `A` and a
/// storage backend `S`.
pub struct Workbench<M, A, S> {
    settings: WorkbenchSettings,
    capabilities: Capabilities,
    map: M,
    address: A,
    store: PersistenceStore<S>,
    share: ShareLinkManager,
    collection: PropertyCollection,
    params: UrlParams,
    from_link: bool,
    producer: String,
    last_autosave: Option<Instant>,
}

impl<M: MapSurface, A: AddressBar, S: KeyValueStore> Workbench<M, A, S> {
    /// Creates a session for the producer named in the current address.
    pub fn new(settings: WorkbenchSettings, map: M, address: A, backend: S) -> Self {
        let capabilities = Capabilities::detect(&backend);
        Self::with_capabilities(settings, capabilities, map, address, backend)
    }

    pub fn with_capabilities(
        settings: WorkbenchSettings,
        capabilities: Capabilities,
        map: M,
        address: A,
        backend: S,
    ) -> Self {
        let params = match address.current() {
            Ok(url) => UrlParams::parse(&url, &settings),
            Err(e) => {
                log::warn!("Could not read the page address: {}", e);
                UrlParams::default()
            }
        };
        let producer = params.producer_or_default(&settings).to_string();
        let store = PersistenceStore::new(backend, settings.storage_key(&producer));
        let share = ShareLinkManager::new(ShareCodec::new(&capabilities, &settings), &settings);
        log::info!("Workbench session for producer {}", producer);
        Self {
            settings,
            capabilities,
            map,
            address,
            store,
            share,
            collection: PropertyCollection::new(),
            params,
            from_link: false,
            producer,
            last_autosave: None,
        }
    }

    pub fn settings(&self) -> &WorkbenchSettings {
        &self.settings
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn collection(&self) -> &PropertyCollection {
        &self.collection
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn address(&self) -> &A {
        &self.address
    }

    pub fn store(&self) -> &PersistenceStore<S> {
        &self.store
    }

    /// Whether the startup collection came from a shared link.
    pub fn started_from_link(&self) -> bool {
        self.from_link
    }

    /// Fills the collection from the URL, the remote file or local storage.
    pub async fn initialize<R: RemoteSource>(&mut self, remote: Option<&R>) -> LoadOutcome {
        let reconciler = Reconciler {
            settings: &self.settings,
            share: &self.share,
            store: &self.store,
            remote,
        };
        let outcome = reconciler
            .run(&self.params, &mut self.collection, &mut self.map)
            .await;
        self.from_link = outcome.source == Some(SourceKind::SharedLink);
        match outcome.source {
            Some(source) => log::info!(
                "Loaded {} properties from {} ({} skipped)",
                outcome.loaded,
                source,
                outcome.skipped
            ),
            None => log::info!("No saved or shared properties found"),
        }
        outcome
    }

    /// Imports a perimeter file and renders its polygons.
    pub fn import_file(&mut self, file_name: &str, bytes: &[u8]) -> Result<ImportReport, ImportError> {
        let properties = import::parse_file(file_name, bytes)?;
        let mut added = Vec::with_capacity(properties.len());
        let mut rejected = 0;
        for property in properties {
            let name = property.name.clone();
            match self.collection.add_rendered(property, &mut self.map) {
                Ok(id) => added.push(id),
                Err(e) => {
                    log::warn!("Could not add {} from {}: {}", name, file_name, e);
                    rejected += 1;
                }
            }
        }
        let imported: Vec<&geojson::Geometry> = added
            .iter()
            .filter_map(|id| self.collection.get(id))
            .map(|p| &p.geometry)
            .collect();
        if let Some(bounds) = geo::bounds(imported) {
            self.map.fit_bounds(bounds);
        }
        log::info!("Imported {} properties from {}", added.len(), file_name);
        Ok(ImportReport {
            added,
            rejected,
            sync: self.sync(),
        })
    }

    /// Makes a property the active one and zooms to it.
    pub fn select(&mut self, id: &PropertyId) -> Result<&Property, EditError> {
        let property = self.collection.set_active(id, &mut self.map)?;
        if let Some(bounds) = geo::bounds([&property.geometry]) {
            self.map.fit_bounds(bounds);
        }
        Ok(property)
    }

    /// Applies the hover style, unless the property is the active one.
    pub fn hover(&mut self, id: &PropertyId, entered: bool) {
        let is_active = self.collection.active().map(|p| &p.id) == Some(id);
        let Some(layer) = self.collection.get(id).and_then(|p| p.layer) else {
            return;
        };
        if !is_active {
            let style = if entered {
                LayerStyle::HOVER
            } else {
                LayerStyle::DEFAULT
            };
            self.map.set_style(layer, &style);
        }
    }

    /// Edits a property's attributes, then saves and publishes.
    pub fn update_attributes(
        &mut self,
        id: &PropertyId,
        edit: AttributeEdit,
    ) -> Result<SyncReport, EditError> {
        let area = edit.area.as_deref().map(parse_area).transpose()?;
        let property = self
            .collection
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownProperty(id.clone()))?;
        if let Some(name) = edit.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            property.name = name;
        }
        if let Some(area) = area {
            property.area = area;
        }
        let fields = [
            (edit.matricula, &mut property.matricula),
            (edit.car, &mut property.car),
            (edit.itr, &mut property.itr),
            (edit.ccir, &mut property.ccir),
        ];
        for (value, field) in fields {
            if let Some(value) = value {
                *field = value.trim().to_string();
            }
        }
        log::info!("Updated attributes of {}", id);
        Ok(self.sync())
    }

    /// Re-reads a property's shape from the map and recomputes its area.
    pub fn recompute_area(&mut self, id: &PropertyId) -> Result<String, EditError> {
        let property = self
            .collection
            .get(id)
            .ok_or_else(|| EditError::UnknownProperty(id.clone()))?;
        let geometry = match property.layer {
            Some(layer) => geo::encode_layer(&self.map, layer)
                .ok_or_else(|| EditError::ShapeUnavailable(id.clone()))?,
            None => property.geometry.clone(),
        };
        geo::geometry::validate(&geometry)?;
        let property = self
            .collection
            .get_mut(id)
            .ok_or_else(|| EditError::UnknownProperty(id.clone()))?;
        property.geometry = geometry;
        property.recompute_area();
        Ok(property.area.clone())
    }

    /// Deletes a property and its shape, then saves and publishes.
    pub fn delete(&mut self, id: &PropertyId) -> Result<SyncReport, EditError> {
        let removed = self.collection.remove(id, &mut self.map)?;
        log::info!("Deleted property {} ({})", removed.name, removed.id);
        Ok(self.sync())
    }

    /// Writes the collection to local storage.
    pub fn save_local(&self) -> Result<SaveReport, StorageError> {
        self.store.save(&self.collection, &self.map)
    }

    /// Writes the collection into the page address.
    pub fn publish(&mut self) -> Result<PublishReport, ShareError> {
        self.share
            .publish(&self.collection, &self.map, &mut self.address)
    }

    /// Publishes and returns the links offered for sharing.
    pub fn share_url(&mut self) -> Result<ShareLinks, ShareError> {
        if self.collection.is_empty() {
            return Err(ShareError::NothingToShare);
        }
        let report = self.publish()?;
        Ok(ShareLinks {
            whatsapp: share::whatsapp_link(&report.url),
            email: share::email_link(&report.url),
            url: report.url,
        })
    }

    /// Replaces the collection with the properties in a share token.
    ///
    /// The page address is not updated.
    pub fn consume(&mut self, token: Option<&str>) -> Result<ConsumeReport, ConsumeError> {
        self.share
            .consume(token, &mut self.collection, &mut self.map)
    }

    /// The collection as a pretty-printed JSON array, geometry as objects.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        let snapshot = self.collection.snapshot(&self.map, GeometryForm::Object);
        for id in &snapshot.omitted {
            log::warn!("Property {} left out of the export", id);
        }
        serde_json::to_string_pretty(&snapshot.records)
    }

    /// Periodic save. Returns `None` when nothing was due.
    ///
    /// Sessions opened from a shared link never autosave, so viewing
    /// someone's link does not overwrite the viewer's own properties.
    pub fn autosave_tick(&mut self, now: Instant) -> Option<Result<SaveReport, StorageError>> {
        if self.started_from_link() || self.collection.is_empty() {
            return None;
        }
        if let Some(last) = self.last_autosave {
            if now.saturating_duration_since(last) < self.settings.autosave_interval() {
                return None;
            }
        }
        self.last_autosave = Some(now);
        let result = self.save_local();
        if let Err(e) = &result {
            log::warn!("Autosave failed: {}", e);
        }
        Some(result)
    }

    fn sync(&mut self) -> SyncReport {
        let saved = self.save_local();
        if let Err(e) = &saved {
            log::warn!("Could not save properties locally: {}", e);
        }
        let published = self.publish();
        if let Err(e) = &published {
            log::warn!("Could not update the share link: {}", e);
        }
        SyncReport { saved, published }
    }
}

/// Parses an area typed by the user into stored form.
///
/// Accepts a trailing `ha` and a decimal comma. Empty input means unknown.
fn parse_area(text: &str) -> Result<String, EditError> {
    let trimmed = text.trim();
    let number = trimmed
        .strip_suffix("ha")
        .unwrap_or(trimmed)
        .trim()
        .replace(',', ".");
    if number.is_empty() || number == geo::geometry::AREA_UNAVAILABLE {
        return Ok(geo::geometry::AREA_UNAVAILABLE.to_string());
    }
    match number.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(format!("{:.2}", value)),
        _ => Err(EditError::InvalidArea(text.to_string())),
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::geo::MemoryMap;
    use crate::share::MemoryAddressBar;
    use crate::storage::native::MemoryStore;
    use geojson::Value;
    use web_time::Duration;

    const KML: &str = r#"<kml><Document>
        <Placemark><name>Lot A</name><ExtendedData><Data name="MATRICULA"><value>123</value></Data></ExtendedData>
        <Polygon><outerBoundaryIs><LinearRing><coordinates>-47.0,-15.0 -47.01,-15.0 -47.01,-15.01 -47.0,-15.01 -47.0,-15.0</coordinates></LinearRing></outerBoundaryIs></Polygon></Placemark>
        <Placemark><name>Lot B</name>
        <Polygon><outerBoundaryIs><LinearRing><coordinates>-47.1,-15.0 -47.11,-15.0 -47.11,-15.01 -47.1,-15.0</coordinates></LinearRing></outerBoundaryIs></Polygon></Placemark>
        </Document></kml>"#;

    type TestBench = Workbench<MemoryMap, MemoryAddressBar, MemoryStore>;

    fn bench(address: &str, backend: MemoryStore) -> TestBench {
        Workbench::new(
            WorkbenchSettings::default(),
            MemoryMap::new(),
            MemoryAddressBar::parse(address).unwrap(),
            backend,
        )
    }

    fn no_remote() -> Option<&'static crate::loader::DirectorySource> {
        None
    }

    fn ids(bench: &TestBench) -> Vec<PropertyId> {
        bench.collection().iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn test_import_saves_and_publishes() {
        let backend = MemoryStore::new();
        let mut bench = bench("https://example.org/?produtor=p1", backend.clone());
        let report = bench.import_file("perimetros.kml", KML.as_bytes()).unwrap();
        assert_eq!(report.added.len(), 2);
        assert_eq!(report.sync.saved.as_ref().unwrap().saved, 2);
        assert_eq!(report.sync.published.as_ref().unwrap().shared, 2);
        assert!(backend.get_raw("propriedades_p1").unwrap().is_some());
        assert!(bench.address().url().query().unwrap().contains("data="));
        assert!(bench.map().viewport().is_some());
        assert_eq!(bench.map().layer_count(), 2);
    }

    #[test]
    fn test_shared_link_round_trip_between_sessions() {
        let mut sender = bench("https://example.org/", MemoryStore::new());
        sender.import_file("perimetros.kml", KML.as_bytes()).unwrap();
        let link = sender.share_url().unwrap();
        assert!(link.whatsapp.starts_with("https://api.whatsapp.com/send?text="));

        let mut receiver = bench(link.url.as_str(), MemoryStore::new());
        let outcome = pollster::block_on(receiver.initialize(no_remote()));
        assert_eq!(outcome.source, Some(SourceKind::SharedLink));
        assert_eq!(outcome.loaded, 2);
        assert_eq!(ids(&receiver), ids(&sender));
        assert_eq!(receiver.address().replacements(), 0);

        for original in sender.collection().iter() {
            let copy = receiver.collection().get(&original.id).unwrap();
            assert_eq!(copy.name, original.name);
            assert_eq!(copy.matricula, original.matricula);
            if let (Value::Polygon(a), Value::Polygon(b)) = (&copy.geometry.value, &original.geometry.value) {
                for (p, q) in a[0].iter().zip(&b[0]) {
                    assert!((p[0] - q[0]).abs() < 1e-6 && (p[1] - q[1]).abs() < 1e-6);
                }
            } else {
                panic!("expected polygons");
            }
        }
    }

    #[test]
    fn test_publish_twice_gives_same_url() {
        let mut bench = bench("https://example.org/", MemoryStore::new());
        bench.import_file("perimetros.kml", KML.as_bytes()).unwrap();
        let first = bench.publish().unwrap().url;
        let second = bench.publish().unwrap().url;
        assert_eq!(first, second);
    }

    #[test]
    fn test_delete_then_reload_does_not_resurrect() {
        let backend = MemoryStore::new();
        let mut bench = bench("https://example.org/?produtor=p1", backend.clone());
        let report = bench.import_file("perimetros.kml", KML.as_bytes()).unwrap();
        let deleted = report.added[0].clone();

        bench.select(&deleted).unwrap();
        let sync = bench.delete(&deleted).unwrap();
        assert_eq!(sync.saved.unwrap().saved, 1);
        assert!(bench.collection().get(&deleted).is_none());
        assert!(bench.collection().active().is_none());
        assert_eq!(bench.map().layer_count(), 1);

        let mut reloaded = Workbench::new(
            WorkbenchSettings::default(),
            MemoryMap::new(),
            MemoryAddressBar::parse("https://example.org/?produtor=p1").unwrap(),
            backend.clone(),
        );
        pollster::block_on(reloaded.initialize(no_remote()));
        assert_eq!(reloaded.collection().len(), 1);
        assert!(reloaded.collection().get(&deleted).is_none());

        // Deleting the last property clears the link.
        let last = ids(&bench)[0].clone();
        bench.delete(&last).unwrap();
        assert_eq!(bench.address().url().query(), Some("produtor=p1"));
        let mut empty = Workbench::new(
            WorkbenchSettings::default(),
            MemoryMap::new(),
            MemoryAddressBar::parse("https://example.org/?produtor=p1").unwrap(),
            backend,
        );
        let outcome = pollster::block_on(empty.initialize(no_remote()));
        assert!(empty.collection().is_empty());
        assert_eq!(outcome.source, None);
    }

    #[test]
    fn test_update_attributes_validates_area() {
        let mut bench = bench("https://example.org/", MemoryStore::new());
        let id = bench.import_file("perimetros.kml", KML.as_bytes()).unwrap().added[0].clone();

        let bad = AttributeEdit {
            area: Some("muito".to_string()),
            car: Some("changed".to_string()),
            ..Default::default()
        };
        assert_eq!(
            bench.update_attributes(&id, bad).unwrap_err(),
            EditError::InvalidArea("muito".to_string())
        );
        assert_eq!(bench.collection().get(&id).unwrap().car, "");

        let edit = AttributeEdit {
            area: Some("12,5 ha".to_string()),
            car: Some("  MT-9  ".to_string()),
            ..Default::default()
        };
        bench.update_attributes(&id, edit).unwrap();
        let property = bench.collection().get(&id).unwrap();
        assert_eq!(property.area, "12.50");
        assert_eq!(property.car, "MT-9");
        assert_eq!(property.matricula, "123");

        let clear = AttributeEdit {
            area: Some("  ".to_string()),
            ..Default::default()
        };
        bench.update_attributes(&id, clear).unwrap();
        assert_eq!(bench.collection().get(&id).unwrap().area, "N/A");

        assert!(matches!(
            bench.update_attributes(&"nope".into(), AttributeEdit::default()),
            Err(EditError::UnknownProperty(_))
        ));
    }

    #[test]
    fn test_recompute_area_reads_edited_shape() {
        let mut bench = bench("https://example.org/", MemoryStore::new());
        let id = bench.import_file("perimetros.kml", KML.as_bytes()).unwrap().added[0].clone();
        let before = bench.collection().get(&id).unwrap().area_hectares().unwrap();
        let layer = bench.collection().get(&id).unwrap().layer.unwrap();
        bench.map_mut().replace_geometry(
            layer,
            serde_json::json!({"type": "Polygon", "coordinates": [[[-47.0, -15.0], [-47.02, -15.0], [-47.02, -15.02], [-47.0, -15.02], [-47.0, -15.0]]]}),
        );
        let after: f64 = bench.recompute_area(&id).unwrap().parse().unwrap();
        assert!(after > before * 3.5 && after < before * 4.5);
    }

    #[test]
    fn test_hover_skips_active_property() {
        let mut bench = bench("https://example.org/", MemoryStore::new());
        let added = bench.import_file("perimetros.kml", KML.as_bytes()).unwrap().added;
        bench.select(&added[0]).unwrap();
        let layer_a = bench.collection().get(&added[0]).unwrap().layer.unwrap();
        let layer_b = bench.collection().get(&added[1]).unwrap().layer.unwrap();

        bench.hover(&added[0], true);
        bench.hover(&added[1], true);
        assert_eq!(bench.map().layer(layer_a).unwrap().style, LayerStyle::HIGHLIGHT);
        assert_eq!(bench.map().layer(layer_b).unwrap().style, LayerStyle::HOVER);
        bench.hover(&added[1], false);
        assert_eq!(bench.map().layer(layer_b).unwrap().style, LayerStyle::DEFAULT);
    }

    #[test]
    fn test_export_is_pretty_json_with_geometry_objects() {
        let mut bench = bench("https://example.org/", MemoryStore::new());
        bench.import_file("perimetros.kml", KML.as_bytes()).unwrap();
        let json = bench.export_json().unwrap();
        assert!(json.contains("\n  "));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["geometria"]["type"], "Polygon");
        assert_eq!(parsed[0]["nome"], "Lot A");
    }

    #[test]
    fn test_autosave_is_gated() {
        let backend = MemoryStore::new();
        let mut bench = bench("https://example.org/", backend.clone());
        let start = Instant::now();
        assert!(bench.autosave_tick(start).is_none());

        bench.import_file("perimetros.kml", KML.as_bytes()).unwrap();
        assert!(bench.autosave_tick(start).is_some());
        assert!(bench.autosave_tick(start + Duration::from_secs(10)).is_none());
        assert!(bench.autosave_tick(start + Duration::from_secs(31)).is_some());

        let link = bench.share_url().unwrap().url;
        let mut viewer = Workbench::new(
            WorkbenchSettings::default(),
            MemoryMap::new(),
            MemoryAddressBar::new(link),
            MemoryStore::new(),
        );
        pollster::block_on(viewer.initialize(no_remote()));
        assert!(viewer.started_from_link());
        assert!(viewer.autosave_tick(start).is_none());
    }

    #[test]
    fn test_undecodable_link_still_autosaves_local_collection() {
        let backend = MemoryStore::new();
        let mut owner = bench("https://example.org/?produtor=p1", backend.clone());
        owner.import_file("perimetros.kml", KML.as_bytes()).unwrap();

        let mut session = bench("https://example.org/?produtor=p1&data=%25%25broken", backend);
        let outcome = pollster::block_on(session.initialize(no_remote()));
        assert_eq!(outcome.source, Some(SourceKind::Local));
        assert!(!session.started_from_link());
        assert!(session.autosave_tick(Instant::now()).is_some());
    }

    #[test]
    fn test_share_requires_properties() {
        let mut bench = bench("https://example.org/", MemoryStore::new());
        assert_eq!(bench.share_url(), Err(ShareError::NothingToShare));
    }

    #[test]
    fn test_parse_area() {
        assert_eq!(parse_area("10").unwrap(), "10.00");
        assert_eq!(parse_area("3.14159").unwrap(), "3.14");
        assert_eq!(parse_area("").unwrap(), "N/A");
        assert_eq!(parse_area("N/A").unwrap(), "N/A");
        assert!(parse_area("-1").is_err());
        assert!(parse_area("12abc").is_err());
    }
}
