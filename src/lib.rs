//! Parcel Workbench - a map viewer for rural property perimeters.
//!
//! Perimeters are imported from KML, KMZ or zipped Shapefiles, rendered on a
//! map, annotated with registry numbers, kept in the browser's local storage
//! and shared as a compressed token in the page URL.
//!
//! The core (codec, persistence, share links, startup reconciliation) is
//! platform independent. The `web` module binds it to the browser; the
//! native binary drives the same core from the command line.

pub mod capabilities;
pub mod codec;
pub mod geo;
pub mod import;
pub mod loader;
pub mod model;
pub mod settings;
pub mod share;
pub mod storage;
pub mod workbench;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use workbench::Workbench;

/// Entry point for the WASM module.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    web::logger::init(log::LevelFilter::Debug);
    log::info!("Parcel Workbench {}", env!("CARGO_PKG_VERSION"));
}
