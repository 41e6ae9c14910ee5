//! JavaScript-facing session object.
//!
//! The page creates one `ParcelWorkbench` with its map adapter, awaits
//! `initialize()`, then forwards user actions. Results are returned as
//! JSON text or plain JS values; failures are thrown as JS errors carrying
//! the user-facing message.

use super::bridge::{JsMap, MapBridge};
use super::download::download_text;
use super::fetch::HttpSource;
use crate::geo::LayerId;
use crate::model::PropertyId;
use crate::settings::WorkbenchSettings;
use crate::share::BrowserAddressBar;
use crate::storage::LocalStorageStore;
use crate::workbench::{AttributeEdit, SyncReport, Workbench};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

/// How often the page asks whether an autosave is due.
const AUTOSAVE_TICK_MS: u32 = 1_000;

type BrowserWorkbench = Workbench<MapBridge, BrowserAddressBar, LocalStorageStore>;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = setInterval)]
    fn set_interval(closure: &Closure<dyn FnMut()>, millis: u32) -> i32;

    #[wasm_bindgen(js_name = clearInterval)]
    fn clear_interval(handle: i32);
}

/// Summary row for the property list.
#[derive(Serialize)]
struct PropertySummary<'a> {
    id: &'a str,
    nome: &'a str,
    area: &'a str,
    tipo: &'a str,
    matricula: &'a str,
    car: &'a str,
    itr: &'a str,
    ccir: &'a str,
    ativo: bool,
}

/// Outcome sent back after a change.
#[derive(Serialize)]
struct ChangeSummary {
    added: Vec<String>,
    rejected: usize,
    saved: Option<usize>,
    save_error: Option<String>,
    shared: Option<usize>,
    share_error: Option<String>,
}

impl ChangeSummary {
    fn new(sync: SyncReport) -> Self {
        let (saved, save_error) = match sync.saved {
            Ok(report) => (Some(report.saved), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let (shared, share_error) = match sync.published {
            Ok(report) => (Some(report.shared), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            added: Vec::new(),
            rejected: 0,
            saved,
            save_error,
            shared,
            share_error,
        }
    }
}

#[derive(Serialize)]
struct ShareSummary {
    url: String,
    whatsapp: String,
    email: String,
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(|e| JsError::new(&e.to_string()))
}

fn busy() -> JsError {
    JsError::new("The workbench is still loading. Try again in a moment.")
}

/// Browser session over the page's map, address bar and localStorage.
#[wasm_bindgen]
pub struct ParcelWorkbench {
    inner: Rc<RefCell<BrowserWorkbench>>,
    autosave: Option<(i32, Closure<dyn FnMut()>)>,
}

impl ParcelWorkbench {
    fn with<T>(&self, f: impl FnOnce(&mut BrowserWorkbench) -> T) -> Result<T, JsError> {
        let mut workbench = self.inner.try_borrow_mut().map_err(|_| busy())?;
        Ok(f(&mut workbench))
    }

    fn start_autosave(&mut self) {
        if self.autosave.is_some() {
            return;
        }
        let inner = Rc::clone(&self.inner);
        let closure = Closure::<dyn FnMut()>::new(move || {
            if let Ok(mut workbench) = inner.try_borrow_mut() {
                if let Some(Ok(report)) = workbench.autosave_tick(web_time::Instant::now()) {
                    log::debug!("Autosaved {} properties", report.saved);
                }
            }
        });
        let handle = set_interval(&closure, AUTOSAVE_TICK_MS);
        self.autosave = Some((handle, closure));
    }
}

#[wasm_bindgen]
impl ParcelWorkbench {
    /// Creates a session. `settings` is optional JSON overriding defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(map: JsMap, settings: Option<String>) -> Result<ParcelWorkbench, JsError> {
        let settings = match settings {
            Some(json) => serde_json::from_str::<WorkbenchSettings>(&json)
                .map_err(|e| JsError::new(&format!("invalid settings: {}", e)))?,
            None => WorkbenchSettings::default(),
        };
        let workbench = Workbench::new(
            settings,
            MapBridge::new(map),
            BrowserAddressBar,
            LocalStorageStore::new(),
        );
        Ok(Self {
            inner: Rc::new(RefCell::new(workbench)),
            autosave: None,
        })
    }

    /// Loads the startup collection and starts autosaving. Resolves to the
    /// name of the source used, or `null` when starting empty.
    pub fn initialize(&mut self) -> js_sys::Promise {
        self.start_autosave();
        let inner = Rc::clone(&self.inner);
        wasm_bindgen_futures::future_to_promise(async move {
            let mut workbench = inner.try_borrow_mut().map_err(|_| JsValue::from(busy()))?;
            let outcome = workbench.initialize(Some(&HttpSource)).await;
            Ok(outcome
                .source
                .map(|s| JsValue::from_str(&s.to_string()))
                .unwrap_or(JsValue::NULL))
        })
    }

    /// Imports a perimeter file picked by the user.
    #[wasm_bindgen(js_name = importFile)]
    pub fn import_file(&self, file_name: &str, bytes: &[u8]) -> Result<String, JsError> {
        let report = self
            .with(|w| w.import_file(file_name, bytes))?
            .map_err(|e| JsError::new(&e.to_string()))?;
        let mut summary = ChangeSummary::new(report.sync);
        summary.added = report.added.iter().map(|id| id.to_string()).collect();
        summary.rejected = report.rejected;
        to_json(&summary)
    }

    /// The collection as summary rows, in insertion order.
    pub fn properties(&self) -> Result<String, JsError> {
        self.with(|w| {
            let active = w.collection().active().map(|p| p.id.clone());
            let rows: Vec<PropertySummary<'_>> = w
                .collection()
                .iter()
                .map(|p| PropertySummary {
                    id: p.id.as_str(),
                    nome: &p.name,
                    area: &p.area,
                    tipo: p.kind.as_str(),
                    matricula: &p.matricula,
                    car: &p.car,
                    itr: &p.itr,
                    ccir: &p.ccir,
                    ativo: active.as_ref() == Some(&p.id),
                })
                .collect();
            to_json(&rows)
        })?
    }

    /// Id of the property drawn as `layer`, for clicks on the map.
    #[wasm_bindgen(js_name = propertyAtLayer)]
    pub fn property_at_layer(&self, layer: u32) -> Result<Option<String>, JsError> {
        self.with(|w| {
            w.collection()
                .find_by_layer(LayerId(layer))
                .map(|p| p.id.to_string())
        })
    }

    pub fn select(&self, id: &str) -> Result<(), JsError> {
        self.with(|w| w.select(&PropertyId::from(id)).map(|_| ()))?
            .map_err(|e| JsError::new(&e.to_string()))
    }

    pub fn hover(&self, id: &str, entered: bool) -> Result<(), JsError> {
        self.with(|w| w.hover(&PropertyId::from(id), entered))
    }

    /// Edits attributes. `undefined` leaves a field unchanged.
    #[wasm_bindgen(js_name = updateAttributes)]
    #[allow(clippy::too_many_arguments)]
    pub fn update_attributes(
        &self,
        id: &str,
        name: Option<String>,
        area: Option<String>,
        matricula: Option<String>,
        car: Option<String>,
        itr: Option<String>,
        ccir: Option<String>,
    ) -> Result<String, JsError> {
        let edit = AttributeEdit {
            name,
            area,
            matricula,
            car,
            itr,
            ccir,
        };
        let sync = self
            .with(|w| w.update_attributes(&PropertyId::from(id), edit))?
            .map_err(|e| JsError::new(&e.to_string()))?;
        to_json(&ChangeSummary::new(sync))
    }

    /// Re-measures a property after its shape was edited on the map.
    #[wasm_bindgen(js_name = recomputeArea)]
    pub fn recompute_area(&self, id: &str) -> Result<String, JsError> {
        self.with(|w| w.recompute_area(&PropertyId::from(id)))?
            .map_err(|e| JsError::new(&e.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<String, JsError> {
        let sync = self
            .with(|w| w.delete(&PropertyId::from(id)))?
            .map_err(|e| JsError::new(&e.to_string()))?;
        to_json(&ChangeSummary::new(sync))
    }

    /// Saves the collection to localStorage now.
    #[wasm_bindgen(js_name = saveLocal)]
    pub fn save_local(&self) -> Result<usize, JsError> {
        self.with(|w| w.save_local())?
            .map(|report| report.saved)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Publishes the collection and returns the share links.
    #[wasm_bindgen(js_name = shareUrl)]
    pub fn share_url(&self) -> Result<String, JsError> {
        let links = self
            .with(|w| w.share_url())?
            .map_err(|e| JsError::new(&e.to_string()))?;
        to_json(&ShareSummary {
            url: links.url.to_string(),
            whatsapp: links.whatsapp,
            email: links.email,
        })
    }

    /// Downloads the collection as a JSON file.
    #[wasm_bindgen(js_name = exportJson)]
    pub fn export_json(&self) -> Result<(), JsError> {
        let (file_name, json) = self.with(|w| {
            (
                w.settings().export_file_name.clone(),
                w.export_json(),
            )
        })?;
        let json = json.map_err(|e| JsError::new(&e.to_string()))?;
        download_text(&file_name, &json, "application/json")
            .map_err(|e| JsError::new(&format!("download failed: {:?}", e)))
    }
}

impl Drop for ParcelWorkbench {
    fn drop(&mut self) {
        if let Some((handle, _closure)) = self.autosave.take() {
            clear_interval(handle);
        }
    }
}
