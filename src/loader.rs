//! Startup reconciliation.
//!
//! Exactly one source fills the collection, tried in priority order:
//!
//! 1. the share token in the URL
//! 2. the producer's remote perimeter file
//! 3. the producer's locally stored collection
//!
//! A source that is absent, fails or yields nothing falls through to the
//! next. Sources are never merged. Running out of sources leaves an empty
//! collection, which is a normal start and not an error.

use crate::geo::MapSurface;
use crate::import;
use crate::model::PropertyCollection;
use crate::settings::WorkbenchSettings;
use crate::share::{ShareLinkManager, UrlParams};
use crate::storage::{KeyValueStore, LocalLoad, PersistenceStore};
use std::fmt;
use std::future::Future;

/// Where the startup collection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    SharedLink,
    Remote,
    Local,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SharedLink => "shared link",
            Self::Remote => "remote file",
            Self::Local => "local storage",
        })
    }
}

/// Errors raised while fetching a remote perimeter file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("request for {location} failed with status {status}")]
    Status { location: String, status: u16 },
    #[error("network error: {0}")]
    Network(String),
}

/// Fetches a producer's perimeter file.
pub trait RemoteSource {
    fn fetch(&self, location: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>>;
}

/// Reads remote perimeter files from a local directory.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl DirectorySource {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl RemoteSource for DirectorySource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.root.join(location);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(FetchError::Network(e.to_string())),
        }
    }
}

/// Why a source did not supply the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source: SourceKind,
    pub reason: String,
}

/// Result of startup reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Source used, `None` when every source was empty or failed.
    pub source: Option<SourceKind>,
    pub loaded: usize,
    pub skipped: usize,
    /// Sources tried before the one used, with the reason each fell through.
    pub attempts: Vec<SourceAttempt>,
}

impl LoadOutcome {
    fn fell_through(&mut self, source: SourceKind, reason: impl fmt::Display) {
        log::info!("Not loading from {}: {}", source, reason);
        self.attempts.push(SourceAttempt {
            source,
            reason: reason.to_string(),
        });
    }
}

/// Collaborators the startup load reads from.
pub struct Reconciler<'a, S, R> {
    pub settings: &'a WorkbenchSettings,
    pub share: &'a ShareLinkManager,
    pub store: &'a PersistenceStore<S>,
    /// `None` disables the remote source.
    pub remote: Option<&'a R>,
}

impl<S: KeyValueStore, R: RemoteSource> Reconciler<'_, S, R> {
    /// Fills `collection` from the first source that yields properties.
    ///
    /// The remote file is only looked up when the URL names a producer.
    /// Nothing here publishes to the URL or writes to storage.
    pub async fn run<M: MapSurface>(
        &self,
        params: &UrlParams,
        collection: &mut PropertyCollection,
        map: &mut M,
    ) -> LoadOutcome {
        let mut outcome = LoadOutcome {
            source: None,
            loaded: 0,
            skipped: 0,
            attempts: Vec::new(),
        };

        match self
            .share
            .consume(params.data.as_deref(), collection, map)
        {
            Ok(report) => {
                outcome.source = Some(SourceKind::SharedLink);
                outcome.loaded = report.loaded;
                outcome.skipped = report.skipped;
                return outcome;
            }
            Err(e) => outcome.fell_through(SourceKind::SharedLink, e),
        }

        match (params.producer.as_deref(), self.remote) {
            (Some(producer), Some(remote)) => match self.settings.remote_location(producer) {
                None => outcome.fell_through(SourceKind::Remote, "producer id is not a valid file name"),
                Some(location) => match self.load_remote(remote, &location, collection, map).await {
                    Ok((loaded, skipped)) => {
                        outcome.source = Some(SourceKind::Remote);
                        outcome.loaded = loaded;
                        outcome.skipped = skipped;
                        return outcome;
                    }
                    Err(reason) => outcome.fell_through(SourceKind::Remote, reason),
                }
            }
            (None, _) => outcome.fell_through(SourceKind::Remote, "no producer in the URL"),
            (Some(_), None) => outcome.fell_through(SourceKind::Remote, "remote files disabled"),
        }

        match self.store.load() {
            LocalLoad::Loaded {
                properties,
                skipped,
            } => {
                let report = collection.install(properties, map);
                if report.installed > 0 {
                    if let Some(bounds) = collection.bounds() {
                        map.fit_bounds(bounds);
                    }
                    outcome.source = Some(SourceKind::Local);
                    outcome.loaded = report.installed;
                    outcome.skipped = skipped + report.rejected;
                    return outcome;
                }
                outcome.fell_through(SourceKind::Local, "no valid stored properties");
            }
            LocalLoad::Empty => outcome.fell_through(SourceKind::Local, "nothing stored"),
            LocalLoad::Unavailable(e) | LocalLoad::Corrupt(e) => {
                outcome.fell_through(SourceKind::Local, e)
            }
        }

        log::info!("Starting with an empty collection");
        outcome
    }

    async fn load_remote<M: MapSurface>(
        &self,
        remote: &R,
        location: &str,
        collection: &mut PropertyCollection,
        map: &mut M,
    ) -> Result<(usize, usize), String> {
        let bytes = remote.fetch(location).await.map_err(|e| e.to_string())?;
        let properties = import::parse_file(location, &bytes).map_err(|e| e.to_string())?;
        let report = collection.install(properties, map);
        if report.installed == 0 {
            return Err(format!("{} holds no usable properties", location));
        }
        if let Some(bounds) = collection.bounds() {
            map.fit_bounds(bounds);
        }
        log::info!("Loaded {} properties from {}", report.installed, location);
        Ok((report.installed, report.rejected))
    }
}
