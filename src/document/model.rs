//! The project document tree.
//!
//! Every type is generic over its blob representation `B`: live documents
//! hold [`Payload`]s, flattened ones hold [`BlobRef`](crate::codec::BlobRef)
//! filename markers.

use crate::types::Payload;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Root persisted aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "B: Deserialize<'de>"))]
pub struct Document<B = Payload> {
    /// Also the prefix of every payload filename.
    pub name: String,
    pub fps: u32,
    /// Where the next capture is written.
    pub capture_shot: CaptureShot,
    /// Inclusive `[in, out]` frame bounds.
    pub preview_range: [usize; 2],
    /// Onion-skin opacity; the sign selects the direction.
    pub onionskin: f64,
    /// Indexed by frame. May be shorter than the capture cursor.
    #[serde(deserialize_with = "deserialize_komas")]
    pub komas: Vec<Koma<B>>,
    pub resolution: [u32; 2],
    pub timeline: Timeline,
    pub is_looping: bool,
    pub shoot_condition: String,
    pub camera_configs: Map<String, Value>,
    pub visible_properties: Map<String, Value>,
    pub viewport: Value,
    pub layers: Vec<LayerConfig>,
    pub audio: Audio<B>,
    /// Not sorted by frame.
    pub markers: Vec<Marker>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureShot {
    pub frame: usize,
    pub layer: usize,
}

/// One timeline frame slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "B: Deserialize<'de>"))]
pub struct Koma<B = Payload> {
    /// Indexed by layer; `None` is an empty slot.
    #[serde(default)]
    pub shots: Vec<Option<Shot<B>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_shots: Vec<Shot<B>>,
    /// Metadata for a pending capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<KomaTarget>,
}

impl<B> Koma<B> {
    /// A placeholder koma with no shots.
    pub fn empty() -> Self {
        Self {
            shots: Vec::new(),
            backup_shots: Vec::new(),
            target: None,
        }
    }

    /// True when no layer holds a shot.
    pub fn is_empty(&self) -> bool {
        self.shots.iter().all(Option::is_none)
    }
}

impl<B> Default for Koma<B> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Holes in a saved `komas` array are written as `null`.
fn deserialize_komas<'de, D, B>(deserializer: D) -> Result<Vec<Koma<B>>, D::Error>
where
    D: Deserializer<'de>,
    B: Deserialize<'de>,
{
    let komas = Vec::<Option<Koma<B>>>::deserialize(deserializer)?;
    Ok(komas.into_iter().map(Option::unwrap_or_default).collect())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KomaTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_configs: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerPose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dmx: Option<Vec<f64>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerPose {
    pub position: [f64; 3],
    pub rotation: [f64; 4],
}

/// One captured image set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "B: Deserialize<'de>"))]
pub struct Shot<B = Payload> {
    /// Low-resolution live-view frame.
    pub lv: B,
    pub jpg: B,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<B>,
    /// Camera-side names of the captured files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jpg_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_filename: Option<String>,
    #[serde(default)]
    pub camera_configs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerPose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dmx: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot_time: Option<f64>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_date: Option<i64>,
}

impl<B> Shot<B> {
    pub fn new(jpg: B, lv: B) -> Self {
        Self {
            lv,
            jpg,
            raw: None,
            jpg_filename: None,
            raw_filename: None,
            camera_configs: Map::new(),
            tracker: None,
            dmx: None,
            shoot_time: None,
            capture_date: None,
        }
    }

    pub fn with_raw(mut self, raw: B) -> Self {
        self.raw = Some(raw);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub label: String,
    pub frame: usize,
    /// In `[0, 1]`.
    pub vertical_position: f64,
    pub duration: usize,
    /// CSS color.
    pub color: String,
}

impl Marker {
    pub fn new(frame: usize, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            frame,
            vertical_position: 0.0,
            duration: 0,
            color: "#ffffff".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Lighten,
    Darken,
    Difference,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// In `[0, 1]`.
    pub opacity: f64,
    #[serde(rename = "mixBlendMode", alias = "blendMode", default)]
    pub blend_mode: BlendMode,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "B: Deserialize<'de>"))]
pub struct Audio<B = Payload> {
    #[serde(
        rename = "src",
        alias = "payload",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<B>,
    pub start_frame: i64,
}

impl<B> Default for Audio<B> {
    fn default() -> Self {
        Self {
            payload: None,
            start_frame: 0,
        }
    }
}

/// Timeline settings. Everything except the drawing is opaque.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Free-form annotation drawn over the timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing: Option<Value>,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl<B> Document<B> {
    /// Shot at `frame`/`layer`, or `None` for out-of-range and empty slots.
    pub fn shot(&self, frame: usize, layer: usize) -> Option<&Shot<B>> {
        self.komas.get(frame)?.shots.get(layer)?.as_ref()
    }

    /// Pad `komas` with empty placeholders up to `len`. Never truncates.
    pub fn grow_komas(&mut self, len: usize) {
        if self.komas.len() < len {
            self.komas.resize_with(len, Koma::empty);
        }
    }

    /// Assign a shot, growing `komas` and the koma's `shots` as needed.
    pub fn set_shot(&mut self, frame: usize, layer: usize, shot: Shot<B>) {
        self.grow_komas(frame + 1);
        let shots = &mut self.komas[frame].shots;
        if shots.len() <= layer {
            shots.resize_with(layer + 1, || None);
        }
        shots[layer] = Some(shot);
    }

    /// Layer config at `index`, provisioning defaults up to it.
    pub fn layer_mut(&mut self, index: usize) -> &mut LayerConfig {
        if self.layers.len() <= index {
            self.layers.resize_with(index + 1, LayerConfig::default);
        }
        &mut self.layers[index]
    }

    /// Number of layer slots at `frame` (0 past the end).
    pub fn layer_count(&self, frame: usize) -> usize {
        self.komas.get(frame).map_or(0, |koma| koma.shots.len())
    }

    /// Length of the timeline including the capture cursor frame.
    pub fn all_komas_len(&self) -> usize {
        self.komas.len().max(self.capture_shot.frame + 1)
    }

    pub fn set_in_point(&mut self, value: usize) {
        let [_, out_point] = self.preview_range;
        self.preview_range[0] = value.min(out_point);
        self.clamp_preview_range();
    }

    pub fn set_out_point(&mut self, value: usize) {
        let [in_point, _] = self.preview_range;
        let last = self.all_komas_len() - 1;
        self.preview_range[1] = value.max(in_point).min(last);
        self.clamp_preview_range();
    }

    /// Restore `0 <= in <= out <= all_komas_len - 1`.
    pub fn clamp_preview_range(&mut self) {
        let last = self.all_komas_len() - 1;
        let out_point = self.preview_range[1].min(last);
        let in_point = self.preview_range[0].min(out_point);
        self.preview_range = [in_point, out_point];
    }
}

impl<B: Clone> Document<B> {
    /// `komas` padded with empty komas through the capture cursor.
    pub fn all_komas(&self) -> Vec<Koma<B>> {
        let mut komas = self.komas.clone();
        komas.resize_with(self.all_komas_len(), Koma::empty);
        komas
    }

    /// The komas inside the preview range.
    pub fn preview_komas(&self) -> Vec<Koma<B>> {
        let [in_point, out_point] = self.preview_range;
        let all = self.all_komas();
        let end = (out_point + 1).min(all.len());
        let start = in_point.min(end);
        all[start..end].to_vec()
    }
}
