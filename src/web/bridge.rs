//! Map surface implemented by the hosting page.
//!
//! The page owns the slippy map and hands the workbench an object with
//! the methods below. Geometries and styles cross the boundary as JSON
//! text; layers are identified by the integer the page returns.

use crate::geo::{LayerId, LayerStyle, MapSurface, SurfaceError};
use geo_types::Rect;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    /// Page-side map adapter.
    pub type JsMap;

    #[wasm_bindgen(method, catch, js_name = addLayer)]
    fn add_layer(this: &JsMap, geometry: &str, style: &str) -> Result<u32, JsValue>;

    #[wasm_bindgen(method, js_name = removeLayer)]
    fn remove_layer(this: &JsMap, layer: u32);

    #[wasm_bindgen(method, js_name = setStyle)]
    fn set_style(this: &JsMap, layer: u32, style: &str);

    #[wasm_bindgen(method, js_name = fitBounds)]
    fn fit_bounds(this: &JsMap, west: f64, south: f64, east: f64, north: f64);

    #[wasm_bindgen(method, js_name = layerGeoJson)]
    fn layer_geojson(this: &JsMap, layer: u32) -> Option<String>;
}

pub struct MapBridge {
    map: JsMap,
}

impl MapBridge {
    pub fn new(map: JsMap) -> Self {
        Self { map }
    }
}

fn style_json(style: &LayerStyle) -> String {
    serde_json::to_string(style).unwrap_or_default()
}

impl MapSurface for MapBridge {
    fn add_layer(
        &mut self,
        geometry: &geojson::Geometry,
        style: &LayerStyle,
    ) -> Result<LayerId, SurfaceError> {
        let geometry = serde_json::to_string(geometry)
            .map_err(|e| SurfaceError::Rejected(e.to_string()))?;
        self.map
            .add_layer(&geometry, &style_json(style))
            .map(LayerId)
            .map_err(|e| SurfaceError::Rejected(format!("{:?}", e)))
    }

    fn remove_layer(&mut self, layer: LayerId) {
        self.map.remove_layer(layer.0);
    }

    fn set_style(&mut self, layer: LayerId, style: &LayerStyle) {
        self.map.set_style(layer.0, &style_json(style));
    }

    fn fit_bounds(&mut self, bounds: Rect<f64>) {
        let (min, max) = (bounds.min(), bounds.max());
        self.map.fit_bounds(min.x, min.y, max.x, max.y);
    }

    fn layer_geojson(&self, layer: LayerId) -> Option<serde_json::Value> {
        let text = self.map.layer_geojson(layer.0)?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Layer {} returned invalid GeoJSON: {}", layer, e);
                None
            }
        }
    }
}
