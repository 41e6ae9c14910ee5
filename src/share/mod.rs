//! Share links: the property collection carried in the page URL.

mod manager;
pub mod url_state;

pub use manager::{
    email_link, whatsapp_link, ConsumeError, ConsumeReport, DecodedBatch, PublishReport,
    ShareError, ShareLinkManager,
};
#[cfg(target_arch = "wasm32")]
pub use url_state::BrowserAddressBar;
pub use url_state::{AddressBar, AddressBarError, MemoryAddressBar, UrlParams};
