//! localStorage-based storage implementation for WASM targets.

use super::{KeyValueStore, StorageError};
use web_sys::Storage;

/// Key-value store backed by the browser's `window.localStorage`.
///
/// The storage handle is looked up on every call so a browser that blocks
/// storage mid-session (private mode, cleared permissions) surfaces as
/// `StorageError::Unavailable` instead of a stale handle.
#[derive(Clone, Copy, Default)]
pub struct LocalStorageStore;

impl LocalStorageStore {
    pub fn new() -> Self {
        Self
    }

    fn storage(&self) -> Result<Storage, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("No window object".to_string()))?;
        window
            .local_storage()
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("localStorage not available".to_string()))
    }
}

impl KeyValueStore for LocalStorageStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage()?
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage()?
            .set_item(key, value)
            .map_err(|e| StorageError::WriteFailed(format!("{:?}", e)))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.storage()?
            .remove_item(key)
            .map_err(|e| StorageError::WriteFailed(format!("{:?}", e)))
    }
}
