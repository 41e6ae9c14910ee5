//! Query string state for shareable URLs.
//!
//! The producer id and the share token travel in the page's query string.
//! Writing goes through `history.replaceState` so updating the token never
//! navigates or adds a history entry.

use crate::settings::WorkbenchSettings;
use url::Url;

/// Parsed URL parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParams {
    pub producer: Option<String>,
    /// Share token, still percent-encoded once.
    pub data: Option<String>,
}

impl UrlParams {
    /// Reads the producer and share parameters. Empty values count as absent.
    pub fn parse(url: &Url, settings: &WorkbenchSettings) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            if key == settings.producer_param.as_str() {
                params.producer = Some(value.into_owned());
            } else if key == settings.share_param.as_str() {
                params.data = Some(value.into_owned());
            }
        }
        params
    }

    /// Producer id, or the configured default.
    pub fn producer_or_default<'a>(&'a self, settings: &'a WorkbenchSettings) -> &'a str {
        self.producer
            .as_deref()
            .unwrap_or(settings.default_producer.as_str())
    }
}

/// Copy of `url` with `param` set to `value`, other parameters kept in order.
pub fn with_param(url: &Url, param: &str, value: &str) -> Url {
    let mut updated = without_param(url, param);
    updated.query_pairs_mut().append_pair(param, value);
    updated
}

/// Copy of `url` without `param`. The query is dropped when nothing is left.
pub fn without_param(url: &Url, param: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut updated = url.clone();
    if kept.is_empty() {
        updated.set_query(None);
    } else {
        updated.query_pairs_mut().clear().extend_pairs(kept);
    }
    updated
}

/// Errors reported by an address bar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressBarError {
    #[error("the page address is not available")]
    Unavailable,
    #[error("the page address could not be parsed: {0}")]
    Invalid(String),
    #[error("the page address could not be updated: {0}")]
    ReplaceFailed(String),
}

/// The page address the share token lives in.
pub trait AddressBar {
    fn current(&self) -> Result<Url, AddressBarError>;

    /// Replaces the address without navigating.
    fn replace(&mut self, url: &Url) -> Result<(), AddressBarError>;
}

/// Address bar of the hosting browser window.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserAddressBar;

#[cfg(target_arch = "wasm32")]
impl AddressBar for BrowserAddressBar {
    fn current(&self) -> Result<Url, AddressBarError> {
        let href = web_sys::window()
            .ok_or(AddressBarError::Unavailable)?
            .location()
            .href()
            .map_err(|_| AddressBarError::Unavailable)?;
        Url::parse(&href).map_err(|e| AddressBarError::Invalid(e.to_string()))
    }

    fn replace(&mut self, url: &Url) -> Result<(), AddressBarError> {
        let history = web_sys::window()
            .ok_or(AddressBarError::Unavailable)?
            .history()
            .map_err(|_| AddressBarError::Unavailable)?;
        history
            .replace_state_with_url(&wasm_bindgen::JsValue::NULL, "", Some(url.as_str()))
            .map_err(|e| AddressBarError::ReplaceFailed(format!("{:?}", e)))
    }
}

/// Address bar held in memory, for native builds and tests.
#[derive(Debug, Clone)]
pub struct MemoryAddressBar {
    url: Url,
    replacements: usize,
}

impl MemoryAddressBar {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            replacements: 0,
        }
    }

    /// Parses `address`, e.g. `https://example.org/?produtor=p1`.
    pub fn parse(address: &str) -> Result<Self, AddressBarError> {
        Url::parse(address)
            .map(Self::new)
            .map_err(|e| AddressBarError::Invalid(e.to_string()))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// How many times the address was replaced.
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl AddressBar for MemoryAddressBar {
    fn current(&self) -> Result<Url, AddressBarError> {
        Ok(self.url.clone())
    }

    fn replace(&mut self, url: &Url) -> Result<(), AddressBarError> {
        self.url = url.clone();
        self.replacements += 1;
        Ok(())
    }
}
