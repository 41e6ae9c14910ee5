//! Producer-scoped persistence of the property collection.
//!
//! The stored value is a JSON array of `PropertyRecord`s with `geometria`
//! written as a JSON-encoded string. The store is a cache of the in-memory
//! collection: every save overwrites the key with the full collection.

use super::{KeyValueStore, StorageError};
use crate::geo::MapSurface;
use crate::model::{GeometryForm, Property, PropertyCollection, PropertyId, PropertyKind, PropertyRecord};
use serde_json::Value as Json;

/// Single key used before collections were scoped by producer.
const LEGACY_KEY: &str = "portal_produtor_propriedades";

/// Outcome of a save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    /// Properties left out because their geometry could not be encoded.
    pub omitted: Vec<PropertyId>,
}

/// Result of reading the stored collection.
#[derive(Debug)]
pub enum LocalLoad {
    /// Storage refused access. Callers treat this as empty.
    Unavailable(StorageError),
    /// Nothing stored under the key.
    Empty,
    /// The stored value is not a record list.
    Corrupt(StorageError),
    Loaded {
        properties: Vec<Property>,
        /// Records dropped for missing or invalid geometry.
        skipped: usize,
    },
}

impl LocalLoad {
    /// Properties read, empty for every outcome but `Loaded`.
    pub fn into_properties(self) -> Vec<Property> {
        match self {
            Self::Loaded { properties, .. } => properties,
            _ => Vec::new(),
        }
    }
}

/// Reads and writes one producer's collection in a key-value backend.
pub struct PersistenceStore<S> {
    backend: S,
    key: String,
}

impl<S: KeyValueStore> PersistenceStore<S> {
    pub fn new(backend: S, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Points the store at another producer's key.
    pub fn rescope(&mut self, key: impl Into<String>) {
        self.key = key.into();
        log::debug!("Persistence store now scoped to {}", self.key);
    }

    /// Trial write and remove against the backend.
    pub fn is_available(&self) -> bool {
        self.backend.check_writable().is_ok()
    }

    /// Writes the whole collection, re-deriving each geometry from its
    /// rendered shape.
    pub fn save<M: MapSurface>(
        &self,
        collection: &PropertyCollection,
        map: &M,
    ) -> Result<SaveReport, StorageError> {
        let snapshot = collection.snapshot(map, GeometryForm::EncodedString);
        self.save_records(&snapshot.records)?;
        for id in &snapshot.omitted {
            log::warn!("Property {} not saved: geometry could not be encoded", id);
        }
        Ok(SaveReport {
            saved: snapshot.records.len(),
            omitted: snapshot.omitted,
        })
    }

    /// Overwrites the key with already-built records.
    pub fn save_records(&self, records: &[PropertyRecord]) -> Result<(), StorageError> {
        self.backend.check_writable()?;
        self.backend.put(&self.key, &records)?;
        log::debug!("Saved {} properties under {}", records.len(), self.key);
        Ok(())
    }

    /// Reads the stored collection.
    ///
    /// Each record is decoded on its own so one bad entry does not lose the
    /// rest. Returned properties are tagged `local` unless the record
    /// carries its own origin.
    pub fn load(&self) -> LocalLoad {
        if let Err(e) = self.backend.check_writable() {
            log::warn!("Local storage unavailable: {}", e);
            return LocalLoad::Unavailable(e);
        }
        let raw = match self.read_raw() {
            Ok(Some(raw)) => raw,
            Ok(None) => return LocalLoad::Empty,
            Err(e) => return LocalLoad::Corrupt(e),
        };
        let entries = match raw {
            Json::Array(entries) => entries,
            Json::Object(_) => vec![raw],
            other => {
                let e = StorageError::SerializationError(format!(
                    "expected a list of properties, found {}",
                    other
                ));
                log::error!("{}", e);
                return LocalLoad::Corrupt(e);
            }
        };
        if entries.is_empty() {
            return LocalLoad::Empty;
        }

        let mut properties = Vec::with_capacity(entries.len());
        let mut skipped = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            let property = serde_json::from_value::<PropertyRecord>(entry)
                .map_err(|e| e.to_string())
                .and_then(|record| {
                    record
                        .into_property(index, PropertyKind::Local)
                        .map_err(|e| e.to_string())
                });
            match property {
                Ok(property) => properties.push(property),
                Err(e) => {
                    log::warn!("Skipping stored property #{}: {}", index, e);
                    skipped += 1;
                }
            }
        }
        log::info!(
            "Loaded {} properties from {} ({} skipped)",
            properties.len(),
            self.key,
            skipped
        );
        LocalLoad::Loaded {
            properties,
            skipped,
        }
    }

    /// Value under the producer key, or under the pre-producer key when
    /// the producer key was never written.
    fn read_raw(&self) -> Result<Option<Json>, StorageError> {
        for key in [self.key.as_str(), LEGACY_KEY] {
            match self.backend.get::<Json>(key) {
                Ok(Some(raw)) => {
                    if key == LEGACY_KEY {
                        log::info!("Reading properties saved under the old key {}", LEGACY_KEY);
                    }
                    return Ok(Some(raw));
                }
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Stored properties under {} are unreadable: {}", key, e);
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Removes the stored collection.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.check_writable()?;
        self.backend.delete(&self.key)?;
        log::debug!("Cleared stored properties under {}", self.key);
        Ok(())
    }
}
