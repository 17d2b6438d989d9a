//! Default document and schema-evolution merge.
//!
//! Projects saved by older versions lack fields added since. On load the
//! saved JSON is merged over the JSON of the default document:
//!
//! - objects merge key by key, recursively; the saved side wins,
//! - missing keys and `null`s take the default,
//! - arrays and scalars from the saved side replace the default wholesale.
//!
//! Arrays are never merged element-wise, so a short saved `komas` never
//! picks up ghost entries from a longer default.

use super::model::{
    Audio, BlendMode, CaptureShot, Document, LayerConfig, Timeline,
};
use crate::codec::BlobRef;
use crate::error::Result;
use serde_json::{json, Map, Value};

pub const DEFAULT_NAME: &str = "Untitled";

/// Script evaluated before each capture; returns a list of alerts.
pub const DEFAULT_SHOOT_CONDITION: &str = include_str!("default_shoot_condition.js");

/// Crosshair drawn over the viewport, in unit coordinates.
pub const DEFAULT_OVERLAY: &str = include_str!("default_overlay.svg");

impl<B> Default for Document<B> {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            fps: 15,
            capture_shot: CaptureShot::default(),
            preview_range: [0, 0],
            onionskin: 0.0,
            komas: Vec::new(),
            resolution: [1920, 1280],
            timeline: Timeline {
                drawing: None,
                settings: object(json!({ "zoomFactor": 1 })),
            },
            is_looping: false,
            shoot_condition: DEFAULT_SHOOT_CONDITION.to_string(),
            camera_configs: object(json!({
                "exposureMode": "M",
                "aperture": 4,
                "shutterSpeed": "1/30",
                "iso": 100,
                "whiteBalance": "fluorescent",
                "colorTemperature": 5500,
                "imageQuality": "raw 14bit,fine",
            })),
            visible_properties: object(json!({
                "shootTime": { "visible": true, "color": "#ffffff" },
                "focalLength": { "visible": true, "color": "#ff0000" },
                "focusDistance": { "visible": true, "color": "#00ff00" },
                "aperture": { "visible": true, "color": "#0000ff" },
                "shutterSpeed": { "visible": true, "color": "#ffff00" },
                "iso": { "visible": true, "color": "#00ffff" },
                "colorTemperature": { "visible": true, "color": "#ff00ff" },
            })),
            viewport: json!({
                "transform": "fit",
                "overlay": DEFAULT_OVERLAY,
                "zoom": 1.3,
            }),
            layers: vec![
                LayerConfig::default(),
                LayerConfig {
                    opacity: 1.0,
                    blend_mode: BlendMode::Difference,
                },
            ],
            audio: Audio::default(),
            markers: Vec::new(),
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// The default document in its flattened JSON form.
pub fn default_json() -> Result<Value> {
    Ok(serde_json::to_value(Document::<BlobRef>::default())?)
}

/// Merge a saved document over defaults. See the module docs for the policy.
pub fn merge_with_defaults(saved: Value, defaults: Value) -> Value {
    match (saved, defaults) {
        (Value::Object(mut saved), Value::Object(defaults)) => {
            for (key, default) in defaults {
                let merged = match saved.remove(&key) {
                    None | Some(Value::Null) => default,
                    Some(value) => merge_with_defaults(value, default),
                };
                saved.insert(key, merged);
            }
            Value::Object(saved)
        }
        (Value::Null, defaults) => defaults,
        (saved, _) => saved,
    }
}
