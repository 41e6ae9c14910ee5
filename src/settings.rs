//! Workbench settings.
//!
//! Limits and names shared by the codec, the store and the share link.
//! Settings can be read from a JSON file so deployments can point the
//! remote producer files somewhere else without a rebuild.

use serde::{Deserialize, Serialize};
use std::path::Path;
use web_time::Duration;

/// Tunable settings for a workbench session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchSettings {
    /// Query parameter carrying the share token.
    pub share_param: String,
    /// Query parameter carrying the producer id.
    pub producer_param: String,
    /// Producer id used when the URL has none.
    pub default_producer: String,
    /// Prefix of the local storage key, followed by the producer id.
    pub storage_key_prefix: String,
    /// Largest serialized JSON payload accepted for sharing, in characters.
    pub max_payload_chars: usize,
    /// Largest share URL produced, in characters.
    pub max_url_chars: usize,
    /// Largest byte run fed to the base64 encoder at once.
    pub base64_chunk_bytes: usize,
    /// Seconds between background saves.
    pub autosave_secs: u64,
    /// File name offered for JSON exports.
    pub export_file_name: String,
    /// Location of a producer's perimeter file; `{producer}` is substituted.
    pub remote_template: String,
}

impl Default for WorkbenchSettings {
    fn default() -> Self {
        Self {
            share_param: "data".to_string(),
            producer_param: "produtor".to_string(),
            default_producer: "default".to_string(),
            storage_key_prefix: "propriedades_".to_string(),
            max_payload_chars: 50_000,
            max_url_chars: 2_000,
            base64_chunk_bytes: 32_767,
            autosave_secs: 30,
            export_file_name: "propriedades_exportadas.json".to_string(),
            remote_template: "perimetros/{producer}.kml".to_string(),
        }
    }
}

impl WorkbenchSettings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads settings from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Self = serde_json::from_str(&text)?;
        log::info!("Loaded workbench settings from {}", path.display());
        Ok(settings)
    }

    /// Storage key for a producer's collection.
    pub fn storage_key(&self, producer: &str) -> String {
        format!("{}{}", self.storage_key_prefix, producer)
    }

    /// Remote perimeter file location for a producer.
    ///
    /// `None` when the producer id could step outside the remote directory.
    pub fn remote_location(&self, producer: &str) -> Option<String> {
        let unsafe_id = producer.is_empty()
            || producer.contains(['/', '\\'])
            || producer.contains("..");
        if unsafe_id {
            log::warn!("Producer id {:?} is not usable in a file name", producer);
            return None;
        }
        Some(self.remote_template.replace("{producer}", producer))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_secs)
    }
}

/// Errors raised while reading a settings file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_is_scoped_by_producer() {
        let settings = WorkbenchSettings::default();
        assert_eq!(settings.storage_key("default"), "propriedades_default");
        assert_eq!(settings.storage_key("42"), "propriedades_42");
    }

    #[test]
    fn test_remote_location_substitutes_producer() {
        let settings = WorkbenchSettings::default();
        assert_eq!(settings.remote_location("abc").as_deref(), Some("perimetros/abc.kml"));
        assert_eq!(settings.remote_location("fazenda.2").as_deref(), Some("perimetros/fazenda.2.kml"));
    }

    #[test]
    fn test_remote_location_rejects_path_traversal() {
        let settings = WorkbenchSettings::default();
        assert_eq!(settings.remote_location("../../etc/x"), None);
        assert_eq!(settings.remote_location(".."), None);
        assert_eq!(settings.remote_location("a/b"), None);
        assert_eq!(settings.remote_location("a\\b"), None);
        assert_eq!(settings.remote_location(""), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings: WorkbenchSettings =
            serde_json::from_str(r#"{"max_url_chars": 8000}"#).unwrap();
        assert_eq!(settings.max_url_chars, 8000);
        assert_eq!(settings.max_payload_chars, 50_000);
        assert_eq!(settings.share_param, "data");
    }
}
