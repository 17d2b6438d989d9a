//! Project document model and schema defaults.

mod defaults;
mod model;

pub use defaults::{
    default_json, merge_with_defaults, DEFAULT_NAME, DEFAULT_OVERLAY, DEFAULT_SHOOT_CONDITION,
};
pub use model::{
    Audio, BlendMode, CaptureShot, Document, Koma, KomaTarget, LayerConfig, Marker, Shot,
    Timeline, TrackerPose,
};
