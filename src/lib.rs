//! # Koma Store
//!
//! Project persistence and undo for a stop-motion capture timeline.
//!
//! ## Core Concepts
//!
//! - **Document**: frames (komas) of layered shots, markers, audio and settings
//! - **Payloads**: image and audio bytes, identified by their SHA-256 hash
//! - **Directories**: a project is a `project.json` manifest plus one file per payload
//! - **Autosave**: debounced, non-overlapping saves driven by change events
//! - **History**: bounded undo/redo over frames, markers and the timeline drawing
//!
//! ## Example
//!
//! ```ignore
//! use koma_store::{Autosave, FsDirectory, Payload, Project, ProjectConfig, Shot};
//! use std::sync::Arc;
//!
//! let project = Arc::new(
//!     Project::new(ProjectConfig::default())?
//!         .with_local(Arc::new(FsDirectory::create("./scratch")?)),
//! );
//! let _autosave = Autosave::spawn(Arc::clone(&project))?;
//!
//! project.restore(None)?;
//! project.set_shot(0, 0, Shot::new(Payload::new(jpg), Payload::new(lv)));
//! project.undo();
//! ```

pub mod autosave;
pub mod blobs;
pub mod codec;
pub mod directory;
pub mod document;
pub mod error;
pub mod history;
pub mod project;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use autosave::{Admission, Autosave, Debounce, SaveCoalescer, SaveState};
pub use blobs::{BlobCache, BlobStore, BlobWrite, StagedBlobs, StorageEstimate};
pub use codec::{flatten, project_filename, unflatten, BlobPath, BlobRef, MANIFEST_FILENAME};
pub use directory::{
    DirHandle, Directory, DirectoryId, DirectoryPicker, FsDirectory, MemoryDirectory, Permission,
};
pub use document::{
    Audio, BlendMode, CaptureShot, Document, Koma, KomaTarget, LayerConfig, Marker, Shot,
    Timeline, TrackerPose,
};
pub use error::{ProjectError, Result};
pub use history::{History, UndoableData};
pub use project::{OpenOutcome, Project, ProjectConfig, SaveOutcome, SaveReport};
pub use subscriptions::{
    DropReason, ProjectEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
