//! The project controller tying all components together.

use crate::autosave::{Admission, SaveCoalescer};
use crate::blobs::{BlobStore, BlobWrite, StagedBlobs, StorageEstimate};
use crate::codec::{self, project_filename, MANIFEST_FILENAME};
use crate::directory::{clear_directory, DirHandle, DirectoryPicker};
use crate::document::{
    default_json, merge_with_defaults, CaptureShot, Document, Koma, LayerConfig, Marker, Shot,
    DEFAULT_NAME,
};
use crate::error::{ProjectError, Result};
use crate::history::{History, UndoableData};
use crate::subscriptions::{
    ProjectEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
use crate::types::Payload;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Project configuration.
#[derive(Clone, Debug)]
pub struct ProjectConfig {
    /// Root of the scratch payload cache.
    pub cache_path: PathBuf,

    /// Payload cache size (number of payloads kept in memory).
    pub blob_cache_size: usize,

    /// Maximum number of undo steps.
    pub history_capacity: usize,

    /// Quiet period before an autosave.
    pub autosave_delay: Duration,

    /// Quiet period after a write before the storage estimate refreshes.
    pub storage_estimate_delay: Duration,

    /// Max buffered events per subscription.
    pub event_buffer_size: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("./.koma-cache"),
            blob_cache_size: 256,
            history_capacity: 400,
            autosave_delay: Duration::from_millis(500),
            storage_estimate_delay: Duration::from_secs(1),
            event_buffer_size: 1024,
        }
    }
}

/// Result of [`Project::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    /// Another open was in flight; this call did nothing.
    AlreadyOpening,
    /// The directory held no project; a new one was started in it.
    Fresh,
}

/// Result of [`Project::save`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(SaveReport),
    /// A save was in flight; it runs one more pass on this caller's behalf.
    Deferred,
    /// An open is in flight; nothing was written.
    Skipped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Name of the directory written to.
    pub directory: String,
    /// Revision the last written manifest reflects.
    pub revision: u64,
    /// Passes run, including trailing passes owed to deferred callers.
    pub passes: usize,
    pub blobs_written: usize,
    pub blobs_skipped: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeScope {
    /// Touches undo-tracked data; recorded in history.
    Undoable,
    /// Session state only.
    Session,
}

/// Resets the opening flag when an open finishes, successfully or not.
struct OpeningGuard<'a>(&'a AtomicBool);

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A stop-motion project bound to a directory.
///
/// Provides a unified interface for:
/// - Reading and mutating the document
/// - Opening, saving and creating projects
/// - Undo and redo over frames, markers and the timeline drawing
/// - Subscribing to change and lifecycle events
///
/// Shared across threads as `Arc<Project>`. Mutators never wait on disk I/O:
/// saving works on a snapshot taken under a short read lock.
pub struct Project {
    config: ProjectConfig,

    /// Live document tree.
    document: RwLock<Document>,

    /// Bound directory. Only changed while `document` is write-locked.
    directory: RwLock<Option<DirHandle>>,

    /// Payload persistence for the bound directory.
    blobs: Mutex<BlobStore>,

    /// Undo history. Always locked after `document`.
    history: Mutex<History<UndoableData>>,

    /// Scratch directory used by `create_new`.
    local: Option<DirHandle>,

    picker: Option<Arc<dyn DirectoryPicker>>,

    opening: AtomicBool,
    saves: SaveCoalescer,

    /// Bumped on every mutation, under the document lock.
    revision: AtomicU64,
    saved_revision: AtomicU64,

    /// Nesting depth of `pause_autosave`.
    autosave_pauses: AtomicUsize,

    events: SubscriptionManager,
}

impl Project {
    /// Create a project holding the default document, bound to no directory.
    pub fn new(config: ProjectConfig) -> Result<Self> {
        let blobs = BlobStore::new(
            &config.cache_path,
            config.blob_cache_size,
            config.storage_estimate_delay,
        )?;
        let document = Document::default();
        let history = History::new(config.history_capacity, UndoableData::capture(&document));

        Ok(Self {
            config,
            document: RwLock::new(document),
            directory: RwLock::new(None),
            blobs: Mutex::new(blobs),
            history: Mutex::new(history),
            local: None,
            picker: None,
            opening: AtomicBool::new(false),
            saves: SaveCoalescer::new(),
            revision: AtomicU64::new(0),
            saved_revision: AtomicU64::new(0),
            autosave_pauses: AtomicUsize::new(0),
            events: SubscriptionManager::new(),
        })
    }

    /// Set the scratch directory. The project starts bound to it.
    pub fn with_local(mut self, local: DirHandle) -> Self {
        *self.directory.get_mut() = Some(Arc::clone(&local));
        self.local = Some(local);
        self
    }

    /// Set the collaborator that prompts the user for a directory.
    pub fn with_picker(mut self, picker: impl DirectoryPicker + 'static) -> Self {
        self.picker = Some(Arc::new(picker));
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    // --- Binding ---

    /// Currently bound directory.
    pub fn directory(&self) -> Option<DirHandle> {
        self.directory.read().clone()
    }

    pub fn local_directory(&self) -> Option<DirHandle> {
        self.local.clone()
    }

    /// Whether the project lives in a user-chosen directory rather than the
    /// scratch one.
    pub fn is_saved_to_disk(&self) -> bool {
        match (self.directory(), &self.local) {
            (None, _) => false,
            (Some(directory), Some(local)) => !directory.is_same_entry(local.as_ref()),
            (Some(_), None) => true,
        }
    }

    fn bind(&self, directory: DirHandle) {
        let _document = self.document.write();
        debug!(directory = %directory.id(), "binding directory");
        *self.directory.write() = Some(directory);
    }

    fn pick(&self) -> Result<DirHandle> {
        let picker = self.picker.as_ref().ok_or(ProjectError::NoDirectoryBound)?;
        picker.request()
    }

    // --- Open / Save / Create ---

    pub fn is_opening(&self) -> bool {
        self.opening.load(Ordering::Acquire)
    }

    pub fn is_saving(&self) -> bool {
        self.saves.is_running()
    }

    /// Open the project stored in `handle`, or in a directory chosen through
    /// the picker.
    ///
    /// On any failure the current document, binding and history are left
    /// untouched. A call made while another open is in flight returns
    /// [`OpenOutcome::AlreadyOpening`] without effect.
    pub fn open(&self, handle: Option<DirHandle>) -> Result<OpenOutcome> {
        if self
            .opening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("open already in flight, ignoring");
            return Ok(OpenOutcome::AlreadyOpening);
        }
        let _guard = OpeningGuard(&self.opening);

        let directory = match handle {
            Some(directory) => directory,
            None => self.pick()?,
        };
        directory.query_or_request_read_write()?;

        let (document, staged) = self.load(&directory)?;
        self.install(document, staged, directory);
        Ok(OpenOutcome::Opened)
    }

    /// Startup helper: open `handle` if given, otherwise the scratch
    /// directory. An empty scratch directory starts a fresh project.
    pub fn restore(&self, handle: Option<DirHandle>) -> Result<OpenOutcome> {
        if let Some(handle) = handle {
            return self.open(Some(handle));
        }

        let local = self.local.clone().ok_or(ProjectError::NoDirectoryBound)?;
        let has_manifest = local
            .list_entries()?
            .iter()
            .any(|entry| entry == MANIFEST_FILENAME);

        if has_manifest {
            return self.open(Some(local));
        }

        info!("scratch directory is empty, starting a new project");
        self.bind(local);
        Ok(OpenOutcome::Fresh)
    }

    /// Read and unflatten a project. Payload mappings are staged, so the
    /// blob store of the bound directory is untouched until `install`.
    fn load(&self, directory: &DirHandle) -> Result<(Document, StagedBlobs)> {
        let bytes = directory.read_file(MANIFEST_FILENAME)?;
        let saved: Value = serde_json::from_slice(&bytes)?;
        codec::check_format_version(&saved)?;

        let merged = merge_with_defaults(saved, default_json()?);

        let mut blobs = self.blobs.lock();
        let mut staged = blobs.stage(directory.id());
        let document = codec::unflatten(merged, |filename| {
            blobs.open_staged(&mut staged, directory.as_ref(), filename)
        })?;
        Ok((document, staged))
    }

    fn install(&self, mut document: Document, staged: StagedBlobs, directory: DirHandle) {
        document.clamp_preview_range();
        let name = directory.name().to_string();

        self.blobs.lock().commit(staged);

        self.pause_autosave();
        {
            let mut current = self.document.write();
            *current = document;
            *self.directory.write() = Some(directory);

            let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
            self.saved_revision.store(revision, Ordering::Release);

            self.history.lock().clear(UndoableData::capture(&current));
        }
        self.resume_autosave();

        info!(directory = %name, "opened project");
        self.events.broadcast(ProjectEvent::Opened { directory: name });
    }

    /// Save to the bound directory, prompting for one if none is bound.
    ///
    /// Saves never overlap. Calls arriving while a save is in flight return
    /// [`SaveOutcome::Deferred`] and are served by exactly one trailing pass
    /// of the running save, which picks up the latest document.
    pub fn save(&self) -> Result<SaveOutcome> {
        if self.is_opening() {
            debug!("open in flight, skipping save");
            return Ok(SaveOutcome::Skipped);
        }

        if self.saves.request() == Admission::Deferred {
            debug!("save in flight, deferring");
            return Ok(SaveOutcome::Deferred);
        }

        if let Err(e) = self.ensure_directory() {
            self.saves.abort();
            return Err(e);
        }

        let mut report = SaveReport::default();
        loop {
            match self.save_pass(&mut report) {
                Ok(()) => {}
                Err(e) => {
                    self.saves.abort();
                    warn!(error = %e, "save failed");
                    return Err(e);
                }
            }
            if !self.saves.finish() {
                break;
            }
            debug!("running trailing save pass");
        }

        if report.passes == 0 {
            return Ok(SaveOutcome::Skipped);
        }

        info!(
            directory = %report.directory,
            revision = report.revision,
            passes = report.passes,
            written = report.blobs_written,
            skipped = report.blobs_skipped,
            "saved project"
        );
        self.events.broadcast(ProjectEvent::Saved {
            directory: report.directory.clone(),
            revision: report.revision,
        });
        Ok(SaveOutcome::Saved(report))
    }

    fn ensure_directory(&self) -> Result<()> {
        if self.directory.read().is_some() {
            return Ok(());
        }
        let directory = self.pick()?;
        directory.query_or_request_read_write()?;
        self.bind(directory);
        Ok(())
    }

    /// Write one consistent snapshot of the document.
    fn save_pass(&self, report: &mut SaveReport) -> Result<()> {
        if self.is_opening() {
            debug!("open started mid-save, skipping pass");
            return Ok(());
        }

        let (document, directory, revision) = {
            let document = self.document.read();
            let directory = self
                .directory
                .read()
                .clone()
                .ok_or(ProjectError::NoDirectoryBound)?;
            (document.clone(), directory, self.revision.load(Ordering::Acquire))
        };

        let mut written = 0;
        let mut skipped = 0;
        let json = {
            let mut blobs = self.blobs.lock();
            codec::flatten(
                &document,
                |path| project_filename(&document.name, path),
                |filename, payload| {
                    match blobs.save(directory.as_ref(), filename, payload)? {
                        BlobWrite::Written => written += 1,
                        BlobWrite::Unchanged => skipped += 1,
                    }
                    Ok(())
                },
            )?
        };

        let bytes = serde_json::to_vec(&json)?;
        directory.write_file(MANIFEST_FILENAME, &bytes)?;
        self.saved_revision.fetch_max(revision, Ordering::AcqRel);

        report.directory = directory.name().to_string();
        report.revision = revision;
        report.passes += 1;
        report.blobs_written += written;
        report.blobs_skipped += skipped;
        Ok(())
    }

    /// Prompt for a new directory, bind to it and save there.
    ///
    /// An untitled project takes the directory's name.
    pub fn save_as(&self) -> Result<SaveOutcome> {
        let directory = self.pick()?;
        directory.query_or_request_read_write()?;

        let rename = self.with_document(|doc| doc.name == DEFAULT_NAME)
            && !directory.name().is_empty();
        if rename {
            let name = directory.name().to_string();
            self.mutate(ChangeScope::Session, |doc| doc.name = name);
        }

        info!(directory = %directory.name(), "saving project as");
        self.bind(directory);
        self.save()
    }

    /// Save the current project, then start a new one in the scratch
    /// directory, wiping whatever it held.
    pub fn create_new(&self) -> Result<()> {
        if self.directory().is_some() {
            self.save()?;
        }

        let local = self.local.clone();
        if let Some(local) = &local {
            clear_directory(local.as_ref())?;
            let mut blobs = self.blobs.lock();
            blobs.bind(local.id())?;
            blobs.forget_all();
        }

        let revision = {
            let mut document = self.document.write();
            *document = Document::default();
            *self.directory.write() = local.clone();
            let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;

            self.history.lock().clear(UndoableData::capture(&document));
            revision
        };

        info!("created new project");
        self.notify_changed(revision, ChangeScope::Undoable);
        self.events.broadcast(ProjectEvent::Created {
            directory: local.map(|local| local.name().to_string()),
        });
        Ok(())
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Whether the document changed since it was last loaded or saved.
    pub fn has_unsaved_changes(&self) -> bool {
        self.revision() > self.saved_revision.load(Ordering::Acquire)
    }

    pub fn storage_estimate(&self) -> Result<StorageEstimate> {
        self.blobs.lock().storage_estimate()
    }

    /// Refresh the storage estimate if its debounce has expired.
    pub fn poll_storage_estimate(&self, now: Instant) -> Result<bool> {
        self.blobs.lock().poll_estimate(now)
    }

    // --- Autosave control ---

    /// Suppress change events (and therefore autosaves). Nests.
    pub fn pause_autosave(&self) {
        self.autosave_pauses.fetch_add(1, Ordering::AcqRel);
    }

    pub fn resume_autosave(&self) {
        let _ = self
            .autosave_pauses
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn is_autosave_paused(&self) -> bool {
        self.autosave_pauses.load(Ordering::Acquire) > 0
    }

    // --- Events ---

    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriptionHandle {
        self.events.subscribe(SubscriptionConfig {
            buffer_size: self.config.event_buffer_size,
            filter,
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    fn notify_changed(&self, revision: u64, scope: ChangeScope) {
        if self.is_autosave_paused() {
            return;
        }
        self.events.broadcast(ProjectEvent::Changed {
            revision,
            undoable: scope == ChangeScope::Undoable,
        });
    }

    /// Apply `f` to the document, record history and announce the change.
    fn mutate<R>(&self, scope: ChangeScope, f: impl FnOnce(&mut Document) -> R) -> R {
        let (result, revision) = {
            let mut document = self.document.write();
            let result = f(&mut document);
            let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;

            if scope == ChangeScope::Undoable {
                self.history.lock().record(UndoableData::capture(&document));
            }
            (result, revision)
        };

        self.notify_changed(revision, scope);
        result
    }

    // --- Reads ---

    /// Run `f` with read access to the document.
    pub fn with_document<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.document.read())
    }

    /// A copy of the document. Payload bytes are shared, not copied.
    pub fn snapshot(&self) -> Document {
        self.document.read().clone()
    }

    pub fn name(&self) -> String {
        self.document.read().name.clone()
    }

    pub fn preview_range(&self) -> [usize; 2] {
        self.document.read().preview_range
    }

    pub fn capture_shot(&self) -> CaptureShot {
        self.document.read().capture_shot
    }

    /// Shot at `frame`/`layer`, or `None` for out-of-range and empty slots.
    pub fn shot(&self, frame: usize, layer: usize) -> Option<Shot> {
        self.document.read().shot(frame, layer).cloned()
    }

    pub fn all_komas(&self) -> Vec<Koma> {
        self.document.read().all_komas()
    }

    pub fn preview_komas(&self) -> Vec<Koma> {
        self.document.read().preview_komas()
    }

    pub fn layer_count(&self, frame: usize) -> usize {
        self.document.read().layer_count(frame)
    }

    /// Number of stored komas.
    pub fn duration(&self) -> usize {
        self.document.read().komas.len()
    }

    /// Layer config at `index`, provisioning default layers up to it.
    pub fn layer(&self, index: usize) -> LayerConfig {
        if let Some(layer) = self.document.read().layers.get(index) {
            return *layer;
        }
        self.mutate(ChangeScope::Session, |doc| *doc.layer_mut(index))
    }

    // --- Mutations ---

    /// Assign a shot, growing the timeline as needed.
    pub fn set_shot(&self, frame: usize, layer: usize, shot: Shot) {
        self.mutate(ChangeScope::Undoable, |doc| doc.set_shot(frame, layer, shot));
    }

    pub fn set_capture_shot(&self, capture_shot: CaptureShot) {
        self.mutate(ChangeScope::Undoable, |doc| {
            doc.capture_shot = capture_shot;
            doc.clamp_preview_range();
        });
    }

    /// Grow the timeline to at least `len` komas. Never shrinks.
    pub fn set_duration(&self, len: usize) {
        self.mutate(ChangeScope::Undoable, |doc| doc.grow_komas(len));
    }

    pub fn set_in_point(&self, value: usize) {
        self.mutate(ChangeScope::Session, |doc| doc.set_in_point(value));
    }

    pub fn set_out_point(&self, value: usize) {
        self.mutate(ChangeScope::Session, |doc| doc.set_out_point(value));
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.mutate(ChangeScope::Session, |doc| doc.name = name);
    }

    pub fn set_fps(&self, fps: u32) {
        self.mutate(ChangeScope::Session, |doc| doc.fps = fps.max(1));
    }

    /// Replace the layer config at `index`. Opacity is clamped to `[0, 1]`.
    pub fn set_layer(&self, index: usize, mut config: LayerConfig) {
        config.opacity = config.opacity.clamp(0.0, 1.0);
        self.mutate(ChangeScope::Session, |doc| *doc.layer_mut(index) = config);
    }

    pub fn set_audio(&self, payload: Option<Payload>, start_frame: i64) {
        self.mutate(ChangeScope::Session, |doc| {
            doc.audio.payload = payload;
            doc.audio.start_frame = start_frame;
        });
    }

    /// Replace the free-form timeline drawing.
    pub fn set_drawing(&self, drawing: Option<Value>) {
        self.mutate(ChangeScope::Undoable, |doc| doc.timeline.drawing = drawing);
    }

    pub fn add_markers(&self, markers: impl IntoIterator<Item = Marker>) {
        self.mutate(ChangeScope::Undoable, |doc| doc.markers.extend(markers));
    }

    /// Remove markers by index. Out-of-range indices are ignored. Returns the
    /// number removed.
    pub fn remove_markers(&self, indices: &[usize]) -> usize {
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();

        self.mutate(ChangeScope::Undoable, |doc| {
            let mut removed = 0;
            for &index in indices.iter().rev() {
                if index < doc.markers.len() {
                    doc.markers.remove(index);
                    removed += 1;
                }
            }
            removed
        })
    }

    /// Edit the marker at `index`. Returns false if there is none.
    pub fn update_marker(&self, index: usize, f: impl FnOnce(&mut Marker)) -> bool {
        if index >= self.document.read().markers.len() {
            return false;
        }
        self.mutate(ChangeScope::Undoable, |doc| match doc.markers.get_mut(index) {
            Some(marker) => {
                f(marker);
                marker.vertical_position = marker.vertical_position.clamp(0.0, 1.0);
                true
            }
            None => false,
        })
    }

    /// Arbitrary edit, recorded as one undo step.
    pub fn patch<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        self.mutate(ChangeScope::Undoable, |doc| {
            let result = f(doc);
            doc.clamp_preview_range();
            result
        })
    }

    // --- History ---

    /// Step back one undo entry. Returns false at the boundary.
    pub fn undo(&self) -> bool {
        self.step(|history| history.undo())
    }

    /// Step forward one redo entry. Returns false at the boundary.
    pub fn redo(&self) -> bool {
        self.step(|history| history.redo())
    }

    fn step(&self, f: impl FnOnce(&mut History<UndoableData>) -> Option<UndoableData>) -> bool {
        let revision = {
            let mut document = self.document.write();
            let Some(state) = f(&mut self.history.lock()) else {
                return false;
            };
            state.apply_to(&mut document);
            self.revision.fetch_add(1, Ordering::AcqRel) + 1
        };

        self.notify_changed(revision, ChangeScope::Undoable);
        true
    }

    /// Record the current undo-tracked state as a new entry, even while
    /// history is paused.
    pub fn commit(&self) {
        let document = self.document.read();
        self.history.lock().commit(UndoableData::capture(&document));
    }

    /// Stop recording mutations, e.g. while applying an already recorded
    /// change.
    pub fn pause_history(&self) {
        self.history.lock().pause();
    }

    pub fn resume_history(&self) {
        self.history.lock().resume();
    }

    pub fn can_undo(&self) -> bool {
        self.history.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.lock().can_redo()
    }

    pub fn undo_len(&self) -> usize {
        self.history.lock().undo_len()
    }
}
