//! Generic storage abstraction for persistent data.
//!
//! This module provides a platform-agnostic interface for key-value storage.
//! On WASM targets, it uses the browser's localStorage. On native targets,
//! it provides an in-memory store and a directory-backed store.

#[cfg(target_arch = "wasm32")]
mod local_storage;
mod persistence;

#[cfg(target_arch = "wasm32")]
pub use local_storage::LocalStorageStore;
pub use persistence::{LocalLoad, PersistenceStore, SaveReport};

use serde::{de::DeserializeOwned, Serialize};

/// Key written and removed by the availability check.
const WRITE_CHECK_KEY: &str = "__parcel_workbench_write_check__";

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The storage mechanism is missing or refuses access.
    #[error("Local storage is not available in this browser: {0}")]
    Unavailable(String),
    /// A write was rejected (quota exceeded, read-only medium).
    #[error("Could not write to local storage: {0}")]
    WriteFailed(String),
    /// Serialization or deserialization failed.
    #[error("Stored data is malformed: {0}")]
    SerializationError(String),
}

/// A synchronous key-value storage interface.
///
/// Implementations provide raw string access; typed access is layered on
/// top through serde. The trait does not require `Send` since WASM is
/// single-threaded and JS handles cannot cross threads.
pub trait KeyValueStore {
    /// Reads the raw value stored under `key`.
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores a raw value, replacing any previous one.
    fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Deletes a value by key. Succeeds even if the key didn't exist.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Verifies the backend is usable with a trial write and remove.
    fn check_writable(&self) -> Result<(), StorageError> {
        self.set_raw(WRITE_CHECK_KEY, "1")?;
        self.delete(WRITE_CHECK_KEY)
    }

    /// Serializes `value` as JSON and stores it under `key`.
    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.set_raw(key, &json)
    }

    /// Retrieves and deserializes a value. `Ok(None)` if the key doesn't exist.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get_raw(key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StorageError::SerializationError(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub mod native {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, RwLock};

    /// A simple in-memory store for native builds and tests.
    ///
    /// Data is not persisted across restarts. Clones share the same map.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        data: Arc<RwLock<HashMap<String, String>>>,
        disabled: bool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// A store that rejects every operation, like a browser with
        /// storage disabled.
        pub fn unavailable() -> Self {
            Self {
                data: Arc::default(),
                disabled: true,
            }
        }

        fn check(&self) -> Result<(), StorageError> {
            if self.disabled {
                return Err(StorageError::Unavailable("storage disabled".to_string()));
            }
            Ok(())
        }
    }

    impl KeyValueStore for MemoryStore {
        fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.check()?;
            let data = self
                .data
                .read()
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            Ok(data.get(key).cloned())
        }

        fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.check()?;
            self.data
                .write()
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.check()?;
            self.data
                .write()
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?
                .remove(key);
            Ok(())
        }
    }

    /// Stores each key as a JSON file inside a directory.
    #[derive(Clone, Debug)]
    pub struct DirectoryStore {
        root: PathBuf,
    }

    impl DirectoryStore {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        fn path_for(&self, key: &str) -> PathBuf {
            let file: String = key
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                .collect();
            self.root.join(format!("{file}.json"))
        }
    }

    impl KeyValueStore for DirectoryStore {
        fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
            match std::fs::read_to_string(self.path_for(key)) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(StorageError::Unavailable(e.to_string())),
            }
        }

        fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
            std::fs::create_dir_all(&self.root)
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            std::fs::write(self.path_for(key), value)
                .map_err(|e| StorageError::WriteFailed(e.to_string()))
        }

        fn delete(&self, key: &str) -> Result<(), StorageError> {
            match std::fs::remove_file(self.path_for(key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::WriteFailed(e.to_string())),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_memory_store_round_trip() {
            let store = MemoryStore::new();
            store.put("k", &vec![1, 2, 3]).unwrap();
            let value: Option<Vec<i32>> = store.get("k").unwrap();
            assert_eq!(value, Some(vec![1, 2, 3]));

            store.delete("k").unwrap();
            let value: Option<Vec<i32>> = store.get("k").unwrap();
            assert_eq!(value, None);
        }

        #[test]
        fn test_write_check_reports_unavailable_store() {
            assert!(MemoryStore::new().check_writable().is_ok());
            assert!(matches!(
                MemoryStore::unavailable().check_writable(),
                Err(StorageError::Unavailable(_))
            ));
        }

        #[test]
        fn test_malformed_value_is_a_serialization_error() {
            let store = MemoryStore::new();
            store.set_raw("k", "{not json").unwrap();
            let result: Result<Option<Vec<i32>>, _> = store.get("k");
            assert!(matches!(result, Err(StorageError::SerializationError(_))));
        }

        #[test]
        fn test_directory_store_sanitizes_keys() {
            let root = std::env::temp_dir().join(format!(
                "parcel-workbench-test-{}",
                uuid::Uuid::new_v4().simple()
            ));
            let store = DirectoryStore::new(&root);
            assert_eq!(store.get_raw("propriedades_a/b").unwrap(), None);
            store.set_raw("propriedades_a/b", "[]").unwrap();
            assert!(root.join("propriedades_a_b.json").exists());
            assert_eq!(store.get_raw("propriedades_a/b").unwrap().as_deref(), Some("[]"));
            store.delete("propriedades_a/b").unwrap();
            store.delete("propriedades_a/b").unwrap();
            let _ = std::fs::remove_dir_all(root);
        }
    }
}
