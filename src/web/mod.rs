//! Browser bindings: the exported session object, the page's map adapter,
//! HTTP fetches, downloads and console logging.

mod api;
mod bridge;
mod download;
mod fetch;
pub mod logger;

pub use api::ParcelWorkbench;
pub use bridge::{JsMap, MapBridge};
pub use download::download_text;
pub use fetch::HttpSource;
