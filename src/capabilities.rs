//! Capability detection performed once at startup.
//!
//! The codec and the persistence store consult this descriptor instead of
//! probing for optional pieces on every call.

use crate::storage::KeyValueStore;

/// What the running build and host can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// zlib deflate/inflate is compiled in.
    pub compression: bool,
    /// The key-value storage accepted a trial write.
    pub storage: bool,
}

impl Capabilities {
    /// Detects capabilities against the given storage backend.
    pub fn detect<S: KeyValueStore>(store: &S) -> Self {
        let caps = Self {
            compression: cfg!(feature = "deflate"),
            storage: store.check_writable().is_ok(),
        };
        if !caps.compression {
            log::warn!("Deflate support not compiled in; share links will be larger");
        }
        if !caps.storage {
            log::warn!("Local storage unavailable; properties will not survive a reload");
        }
        log::debug!("Detected capabilities: {:?}", caps);
        caps
    }

    /// Capabilities of a build without compression, for the given storage state.
    pub fn without_compression(self) -> Self {
        Self {
            compression: false,
            ..self
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            compression: cfg!(feature = "deflate"),
            storage: true,
        }
    }
}
