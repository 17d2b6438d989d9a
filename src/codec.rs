//! Flattening codec.
//!
//! Converts between a live [`Document`] holding [`Payload`]s and its JSON
//! manifest, where each payload is replaced by a `{"$type": "blob",
//! "filename": ...}` marker and stored as a separate file.
//!
//! Payload slots are either essential (`jpg`, `lv` of a layer shot) or
//! optional (`raw`, backup shots, audio). A failure on an optional slot is
//! logged and the slot resolves to absent; a failure on an essential slot
//! propagates.

use crate::document::{Audio, Document, Koma, Shot};
use crate::error::{ProjectError, Result};
use crate::types::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Name of the manifest inside a project directory.
pub const MANIFEST_FILENAME: &str = "project.json";

/// Filename of the audio payload.
pub const AUDIO_FILENAME: &str = "audio.wav";

/// Manifest key carrying the format version.
pub const FORMAT_VERSION_KEY: &str = "formatVersion";

/// Current manifest format version.
pub const FORMAT_VERSION: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobTag {
    #[serde(rename = "blob")]
    Blob,
}

/// A payload reference in the flattened form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlobRef {
    Marker {
        #[serde(rename = "$type")]
        kind: BlobTag,
        filename: String,
    },
    /// Bare filename written by early versions.
    Filename(String),
}

impl BlobRef {
    pub fn marker(filename: impl Into<String>) -> Self {
        BlobRef::Marker {
            kind: BlobTag::Blob,
            filename: filename.into(),
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            BlobRef::Marker { filename, .. } | BlobRef::Filename(filename) => filename,
        }
    }

    /// The referenced filename, if this is a recognized reference.
    ///
    /// Bare strings only count when they carry an image extension.
    pub fn resolve(&self) -> Result<&str> {
        match self {
            BlobRef::Marker { filename, .. } => Ok(filename),
            BlobRef::Filename(filename) if is_legacy_blob_filename(filename) => Ok(filename),
            BlobRef::Filename(other) => Err(ProjectError::InvalidFormat(format!(
                "Unrecognized blob reference: {other}"
            ))),
        }
    }
}

fn is_legacy_blob_filename(name: &str) -> bool {
    name.ends_with(".jpg") || name.ends_with(".dng")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathSegment {
    Key(&'static str),
    Index(usize),
}

/// Structural location of a payload, e.g. `komas-7-shots-0-jpg`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobPath(Vec<PathSegment>);

impl BlobPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn key(mut self, key: &'static str) -> Self {
        self.0.push(PathSegment::Key(key));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    fn pop(&mut self) {
        self.0.pop();
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            match segment {
                PathSegment::Key(key) => f.write_str(key)?,
                PathSegment::Index(index) => write!(f, "{index}")?,
            }
        }
        Ok(())
    }
}

/// Filename for a payload of the project called `name`.
///
/// - `komas/F/shots/L/jpg` → `<name>_layer=L_FFFF.jpg`
/// - `komas/F/shots/L/lv`  → `<name>_layer=L_lv_FFFF.jpg`
/// - `komas/F/shots/L/raw` → `<name>_layer=L_FFFF.dng`
/// - `komas/F/backupShots/I/*` → same with `backup=I` in place of `layer=L`
/// - `audio/src` → `audio.wav`
///
/// Other paths have no project filename.
pub fn project_filename(name: &str, path: &BlobPath) -> Option<String> {
    use PathSegment::{Index, Key};

    let (group, frame, role) = match path.segments() {
        [Key("komas"), Index(frame), Key("shots"), Index(layer), Key(role)] => {
            (format!("layer={layer}"), *frame, *role)
        }
        [Key("komas"), Index(frame), Key("backupShots"), Index(index), Key(role)] => {
            (format!("backup={index}"), *frame, *role)
        }
        [Key("audio"), Key("src")] => return Some(AUDIO_FILENAME.to_string()),
        _ => return None,
    };

    let (suffix, extension) = match role {
        "lv" => ("_lv", "jpg"),
        "jpg" => ("", "jpg"),
        "raw" => ("", "dng"),
        _ => return None,
    };

    Some(format!("{name}_{group}{suffix}_{frame:04}.{extension}"))
}

/// Walks every payload slot of a document, rebuilding it with a different
/// blob representation.
struct BlobMapper<'f, B, C> {
    visit: &'f mut dyn FnMut(&BlobPath, &B) -> Result<C>,
    path: BlobPath,
}

impl<'f, B, C> BlobMapper<'f, B, C> {
    fn new(visit: &'f mut dyn FnMut(&BlobPath, &B) -> Result<C>) -> Self {
        Self {
            visit,
            path: BlobPath::new(),
        }
    }

    fn scoped<T>(
        &mut self,
        segment: PathSegment,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.path.push(segment);
        let result = f(self);
        self.path.pop();
        result
    }

    fn essential(&mut self, key: &'static str, blob: &B) -> Result<C> {
        self.scoped(PathSegment::Key(key), |m| (m.visit)(&m.path, blob))
    }

    fn optional(&mut self, key: &'static str, blob: Option<&B>) -> Option<C> {
        let blob = blob?;
        self.scoped(PathSegment::Key(key), |m| match (m.visit)(&m.path, blob) {
            Ok(mapped) => Ok(Some(mapped)),
            Err(e) => {
                warn!(path = %m.path, error = %e, "dropping optional payload");
                Ok(None)
            }
        })
        .ok()
        .flatten()
    }

    fn document(&mut self, doc: &Document<B>) -> Result<Document<C>> {
        let komas = self.scoped(PathSegment::Key("komas"), |m| {
            doc.komas
                .iter()
                .enumerate()
                .map(|(frame, koma)| m.scoped(PathSegment::Index(frame), |m| m.koma(koma)))
                .collect::<Result<Vec<_>>>()
        })?;

        let audio_payload = self.scoped(PathSegment::Key("audio"), |m| {
            Ok(m.optional("src", doc.audio.payload.as_ref()))
        })?;

        Ok(Document {
            name: doc.name.clone(),
            fps: doc.fps,
            capture_shot: doc.capture_shot,
            preview_range: doc.preview_range,
            onionskin: doc.onionskin,
            komas,
            resolution: doc.resolution,
            timeline: doc.timeline.clone(),
            is_looping: doc.is_looping,
            shoot_condition: doc.shoot_condition.clone(),
            camera_configs: doc.camera_configs.clone(),
            visible_properties: doc.visible_properties.clone(),
            viewport: doc.viewport.clone(),
            layers: doc.layers.clone(),
            audio: Audio {
                payload: audio_payload,
                start_frame: doc.audio.start_frame,
            },
            markers: doc.markers.clone(),
        })
    }

    fn koma(&mut self, koma: &Koma<B>) -> Result<Koma<C>> {
        let shots = self.scoped(PathSegment::Key("shots"), |m| {
            koma.shots
                .iter()
                .enumerate()
                .map(|(layer, shot)| match shot {
                    Some(shot) => m.scoped(PathSegment::Index(layer), |m| m.shot(shot).map(Some)),
                    None => Ok(None),
                })
                .collect::<Result<Vec<_>>>()
        })?;

        // A backup shot that cannot be mapped is dropped rather than failing the koma
        let backup_shots = self.scoped(PathSegment::Key("backupShots"), |m| {
            let mut mapped = Vec::with_capacity(koma.backup_shots.len());
            for (index, shot) in koma.backup_shots.iter().enumerate() {
                match m.scoped(PathSegment::Index(index), |m| m.shot(shot)) {
                    Ok(shot) => mapped.push(shot),
                    Err(e) => {
                        warn!(path = %m.path, index, error = %e, "dropping backup shot")
                    }
                }
            }
            Ok(mapped)
        })?;

        Ok(Koma {
            shots,
            backup_shots,
            target: koma.target.clone(),
        })
    }

    fn shot(&mut self, shot: &Shot<B>) -> Result<Shot<C>> {
        let lv = self.essential("lv", &shot.lv)?;
        let jpg = self.essential("jpg", &shot.jpg)?;
        let raw = self.optional("raw", shot.raw.as_ref());

        Ok(Shot {
            lv,
            jpg,
            raw,
            jpg_filename: shot.jpg_filename.clone(),
            raw_filename: shot.raw_filename.clone(),
            camera_configs: shot.camera_configs.clone(),
            tracker: shot.tracker,
            dmx: shot.dmx.clone(),
            shoot_time: shot.shoot_time,
            capture_date: shot.capture_date,
        })
    }
}

/// Flatten a live document into its JSON manifest.
///
/// Every payload is handed to `save_blob` under the name chosen by
/// `path_to_filename` (falling back to the dash-joined path) before this
/// returns, so writing the returned manifest afterwards always leaves a
/// self-consistent directory.
pub fn flatten<F, S>(
    document: &Document<Payload>,
    mut path_to_filename: F,
    mut save_blob: S,
) -> Result<Value>
where
    F: FnMut(&BlobPath) -> Option<String>,
    S: FnMut(&str, &Payload) -> Result<()>,
{
    let mut visit = |path: &BlobPath, payload: &Payload| -> Result<BlobRef> {
        let filename = path_to_filename(path).unwrap_or_else(|| path.to_string());
        save_blob(&filename, payload)?;
        Ok(BlobRef::marker(filename))
    };

    let flat = BlobMapper::new(&mut visit).document(document)?;

    let mut json = serde_json::to_value(&flat)?;
    if let Value::Object(map) = &mut json {
        map.insert(FORMAT_VERSION_KEY.to_string(), FORMAT_VERSION.into());
    }
    Ok(json)
}

/// Rebuild a live document from its JSON manifest, resolving every blob
/// reference through `open_blob`.
pub fn unflatten<O>(json: Value, mut open_blob: O) -> Result<Document<Payload>>
where
    O: FnMut(&str) -> Result<Payload>,
{
    check_format_version(&json)?;

    let flat: Document<BlobRef> = serde_json::from_value(json)?;

    let mut visit = |_: &BlobPath, blob: &BlobRef| -> Result<Payload> { open_blob(blob.resolve()?) };
    BlobMapper::new(&mut visit).document(&flat)
}

/// Reject manifests written by a newer format.
pub fn check_format_version(json: &Value) -> Result<()> {
    let version = match json.get(FORMAT_VERSION_KEY) {
        None | Some(Value::Null) => return Ok(()),
        Some(value) => value.as_u64().ok_or_else(|| {
            ProjectError::InvalidFormat(format!("Invalid format version: {value}"))
        })?,
    };

    if version > FORMAT_VERSION {
        return Err(ProjectError::InvalidFormat(format!(
            "Unsupported format version: {version} (newest known is {FORMAT_VERSION})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Marker;
    use serde_json::json;
    use std::collections::HashMap;

    fn payload(tag: &str) -> Payload {
        Payload::new(tag.as_bytes().to_vec())
    }

    fn sample_document() -> Document {
        let mut doc = Document::default();
        doc.name = "walk".to_string();
        doc.set_shot(0, 0, Shot::new(payload("jpg0"), payload("lv0")).with_raw(payload("raw0")));
        doc.set_shot(2, 1, Shot::new(payload("jpg2"), payload("lv2")));
        doc.komas[2].backup_shots.push(Shot::new(payload("old-jpg"), payload("old-lv")));
        doc.audio.payload = Some(payload("wav"));
        doc.markers.push(Marker::new(1, "hit"));
        doc
    }

    fn flatten_into(doc: &Document, files: &mut HashMap<String, Payload>) -> Value {
        let name = doc.name.clone();
        flatten(
            doc,
            |path| project_filename(&name, path),
            |filename, payload| {
                files.insert(filename.to_string(), payload.clone());
                Ok(())
            },
        )
        .unwrap()
    }

    #[test]
    fn test_project_filenames() {
        let path = BlobPath::new().key("komas").index(7).key("shots").index(0).key("jpg");
        assert_eq!(project_filename("walk", &path).unwrap(), "walk_layer=0_0007.jpg");

        let path = BlobPath::new().key("komas").index(7).key("shots").index(1).key("lv");
        assert_eq!(project_filename("walk", &path).unwrap(), "walk_layer=1_lv_0007.jpg");

        let path = BlobPath::new().key("komas").index(12).key("shots").index(0).key("raw");
        assert_eq!(project_filename("walk", &path).unwrap(), "walk_layer=0_0012.dng");

        let path = BlobPath::new().key("komas").index(3).key("backupShots").index(0).key("jpg");
        assert_eq!(project_filename("walk", &path).unwrap(), "walk_backup=0_0003.jpg");

        let path = BlobPath::new().key("audio").key("src");
        assert_eq!(project_filename("walk", &path).unwrap(), "audio.wav");

        let path = BlobPath::new().key("timeline").key("thumb");
        assert!(project_filename("walk", &path).is_none());
        assert_eq!(path.to_string(), "timeline-thumb");
    }

    #[test]
    fn test_flatten_replaces_payloads_with_markers() {
        let doc = sample_document();
        let mut files = HashMap::new();
        let json = flatten_into(&doc, &mut files);

        assert_eq!(
            json["komas"][0]["shots"][0]["jpg"],
            json!({ "$type": "blob", "filename": "walk_layer=0_0000.jpg" })
        );
        assert_eq!(json["komas"][1]["shots"], json!([]));
        assert_eq!(json["komas"][2]["shots"][0], Value::Null);
        assert_eq!(json["audio"]["src"]["filename"], "audio.wav");
        assert_eq!(json[FORMAT_VERSION_KEY], FORMAT_VERSION);

        // jpg+lv+raw, jpg+lv, backup jpg+lv, audio
        assert_eq!(files.len(), 8);
        assert_eq!(files["walk_layer=1_lv_0002.jpg"], payload("lv2"));
    }

    #[test]
    fn test_roundtrip() {
        let doc = sample_document();
        let mut files = HashMap::new();
        let json = flatten_into(&doc, &mut files);

        let restored = unflatten(json, |filename| {
            files.get(filename).cloned().ok_or_else(|| ProjectError::NotFound {
                directory: "test".into(),
                filename: filename.into(),
            })
        })
        .unwrap();

        assert_eq!(restored, doc);
    }

    #[test]
    fn test_missing_raw_degrades_to_none() {
        let doc = sample_document();
        let mut files = HashMap::new();
        let json = flatten_into(&doc, &mut files);
        files.remove("walk_layer=0_0000.dng");

        let restored = unflatten(json, |filename| {
            files.get(filename).cloned().ok_or_else(|| ProjectError::NotFound {
                directory: "test".into(),
                filename: filename.into(),
            })
        })
        .unwrap();

        assert!(restored.shot(0, 0).unwrap().raw.is_none());
        assert_eq!(restored.shot(0, 0).unwrap().jpg, payload("jpg0"));
    }

    #[test]
    fn test_missing_jpg_propagates() {
        let doc = sample_document();
        let mut files = HashMap::new();
        let json = flatten_into(&doc, &mut files);
        files.remove("walk_layer=1_0002.jpg");

        let result = unflatten(json, |filename| {
            files.get(filename).cloned().ok_or_else(|| ProjectError::NotFound {
                directory: "test".into(),
                filename: filename.into(),
            })
        });

        assert!(matches!(result, Err(ProjectError::NotFound { ref filename, .. }) if filename == "walk_layer=1_0002.jpg"));
    }

    #[test]
    fn test_failed_optional_write_is_omitted() {
        let doc = sample_document();
        let json = flatten(
            &doc,
            |path| project_filename("walk", path),
            |filename, _| {
                if filename.ends_with(".dng") {
                    Err(ProjectError::PermissionDenied("walk".into()))
                } else {
                    Ok(())
                }
            },
        )
        .unwrap();

        assert!(json["komas"][0]["shots"][0].get("raw").is_none());
        assert!(json["komas"][0]["shots"][0].get("jpg").is_some());
    }

    #[test]
    fn test_legacy_bare_filenames() {
        let json = json!({
            "name": "old",
            "fps": 10,
            "captureShot": { "frame": 0, "layer": 0 },
            "previewRange": [0, 0],
            "onionskin": 0,
            "komas": [{ "shots": [{ "lv": "old_lv_0000.jpg", "jpg": "old_0000.jpg" }] }],
            "resolution": [640, 480],
            "timeline": {},
            "isLooping": false,
            "shootCondition": "",
            "cameraConfigs": {},
            "visibleProperties": {},
            "viewport": {},
            "layers": [],
            "audio": { "startFrame": 0 },
            "markers": []
        });

        let restored = unflatten(json, |filename| Ok(payload(filename))).unwrap();
        assert_eq!(restored.shot(0, 0).unwrap().jpg, payload("old_0000.jpg"));
    }

    #[test]
    fn test_unrecognized_bare_string_rejected() {
        let blob = BlobRef::Filename("notes.txt".into());
        assert!(matches!(blob.resolve(), Err(ProjectError::InvalidFormat(_))));
    }

    #[test]
    fn test_newer_format_rejected() {
        let json = json!({ FORMAT_VERSION_KEY: FORMAT_VERSION + 1 });
        assert!(matches!(
            check_format_version(&json),
            Err(ProjectError::InvalidFormat(_))
        ));
        assert!(check_format_version(&json!({})).is_ok());
    }
}
