//! Remote perimeter files fetched over HTTP.

use crate::loader::{FetchError, RemoteSource};
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, RequestMode, Response};

/// Fetches producer files relative to the page.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSource;

impl RemoteSource for HttpSource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let window = web_sys::window()
            .ok_or_else(|| FetchError::Network("no window object".to_string()))?;

        let opts = RequestInit::new();
        opts.set_method("GET");
        opts.set_mode(RequestMode::SameOrigin);
        let request = Request::new_with_str_and_init(location, &opts)
            .map_err(|e| FetchError::Network(format!("{:?}", e)))?;

        let response: Response = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(|e| FetchError::Network(format!("{:?}", e)))?
            .dyn_into()
            .map_err(|_| FetchError::Network("fetch did not return a Response".to_string()))?;

        match response.status() {
            200..=299 => {}
            404 => return Err(FetchError::NotFound(location.to_string())),
            status => {
                return Err(FetchError::Status {
                    location: location.to_string(),
                    status,
                })
            }
        }

        let buffer = response
            .array_buffer()
            .map_err(|e| FetchError::Network(format!("{:?}", e)))?;
        let buffer = JsFuture::from(buffer)
            .await
            .map_err(|e| FetchError::Network(format!("{:?}", e)))?;
        Ok(js_sys::Uint8Array::new(&buffer).to_vec())
    }
}
