//! Per-directory payload persistence.

use super::cache::BlobCache;
use crate::autosave::Debounce;
use crate::directory::{Directory, DirectoryId};
use crate::error::Result;
use crate::types::Payload;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of [`BlobStore::save`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobWrite {
    Written,
    /// The file already holds this payload.
    Unchanged,
}

/// Payloads opened from a directory that is not yet bound.
///
/// Filled by [`BlobStore::open_staged`] while a project loads and handed to
/// [`BlobStore::commit`] once the whole project has loaded. Dropping it
/// leaves the store exactly as it was.
#[derive(Debug)]
pub struct StagedBlobs {
    directory: DirectoryId,
    files: HashMap<String, Payload>,
}

impl StagedBlobs {
    pub fn directory(&self) -> &DirectoryId {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Storage usage as last estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageEstimate {
    /// Bytes used by the scratch cache.
    pub usage: u64,
    /// Usage plus the free space left on the cache volume.
    pub quota: u64,
}

/// Opens and saves payloads for the currently bound directory.
///
/// Filenames map to the payload they currently hold. Opening a filename
/// twice yields the same handle, and saving a payload under the filename
/// that already holds it skips the write. The map and the scratch cache
/// are dropped whenever a different directory is bound.
pub struct BlobStore {
    cache: BlobCache,

    /// Directory the filename map belongs to.
    bound: Option<DirectoryId>,

    /// Filename to the payload it holds in `bound`.
    files: HashMap<String, Payload>,

    estimate: StorageEstimate,
    estimate_refresh: Debounce,
}

impl BlobStore {
    pub fn new(
        cache_path: impl AsRef<Path>,
        cache_size: usize,
        estimate_delay: Duration,
    ) -> Result<Self> {
        let cache = BlobCache::new(cache_path, cache_size)?;
        // Stale entries from a previous session are never reused
        cache.clear()?;

        let mut estimate_refresh = Debounce::new(estimate_delay);
        estimate_refresh.schedule(Instant::now());

        Ok(Self {
            cache,
            bound: None,
            files: HashMap::new(),
            estimate: StorageEstimate::default(),
            estimate_refresh,
        })
    }

    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    pub fn bound(&self) -> Option<&DirectoryId> {
        self.bound.as_ref()
    }

    /// Bind to a directory. Switching directories clears the scratch cache
    /// and forgets every filename mapping.
    pub fn bind(&mut self, directory: &DirectoryId) -> Result<()> {
        if self.bound.as_ref() == Some(directory) {
            return Ok(());
        }

        if let Some(previous) = self.bound.replace(directory.clone()) {
            info!(from = %previous, to = %directory, "directory changed, dropping payload cache");
        }
        self.files.clear();
        self.cache.clear()?;
        self.estimate_refresh.schedule(Instant::now());
        Ok(())
    }

    /// Read a payload from `directory`.
    ///
    /// The bytes are copied into the scratch cache, so the returned payload
    /// stays valid even if the file is overwritten later.
    pub fn open(&mut self, directory: &dyn Directory, filename: &str) -> Result<Payload> {
        self.bind(directory.id())?;

        let mut files = std::mem::take(&mut self.files);
        let result = self.read_into(&mut files, directory, filename);
        self.files = files;
        result
    }

    /// Start loading `directory` without touching the current binding.
    ///
    /// Reloading the bound directory starts from its current mappings, so
    /// filenames that are already open keep their handles.
    pub fn stage(&self, directory: &DirectoryId) -> StagedBlobs {
        let files = if self.bound.as_ref() == Some(directory) {
            self.files.clone()
        } else {
            HashMap::new()
        };
        StagedBlobs {
            directory: directory.clone(),
            files,
        }
    }

    /// Like [`open`](Self::open), recording the mapping in `staged`.
    pub fn open_staged(
        &mut self,
        staged: &mut StagedBlobs,
        directory: &dyn Directory,
        filename: &str,
    ) -> Result<Payload> {
        debug_assert_eq!(&staged.directory, directory.id());
        self.read_into(&mut staged.files, directory, filename)
    }

    /// Bind the staged directory and adopt its mappings.
    ///
    /// When the directory changes the scratch cache is rebuilt from the
    /// staged payloads. The cache is a scratch copy, so failures there are
    /// logged rather than returned.
    pub fn commit(&mut self, staged: StagedBlobs) {
        let StagedBlobs { directory, files } = staged;

        if self.bound.as_ref() != Some(&directory) {
            if let Some(previous) = self.bound.replace(directory.clone()) {
                info!(from = %previous, to = %directory, "directory changed, rebuilding payload cache");
            }
            let rebuilt = self
                .cache
                .clear()
                .and_then(|()| files.values().try_for_each(|payload| self.cache.put(payload)));
            if let Err(e) = rebuilt {
                warn!(error = %e, "failed to rebuild payload cache");
            }
        }

        self.files = files;
        self.estimate_refresh.schedule(Instant::now());
    }

    fn read_into(
        &mut self,
        files: &mut HashMap<String, Payload>,
        directory: &dyn Directory,
        filename: &str,
    ) -> Result<Payload> {
        if let Some(payload) = files.get(filename) {
            debug!(filename, "payload already open");
            return Ok(payload.clone());
        }

        let loaded = Payload::new(directory.read_file(filename)?);
        let payload = match self.cache.get(&loaded.hash())? {
            Some(cached) => cached,
            None => {
                self.cache.put(&loaded)?;
                self.estimate_refresh.schedule(Instant::now());
                loaded
            }
        };

        files.insert(filename.to_string(), payload.clone());
        Ok(payload)
    }

    /// Write `payload` to `filename` unless the file already holds it.
    pub fn save(
        &mut self,
        directory: &dyn Directory,
        filename: &str,
        payload: &Payload,
    ) -> Result<BlobWrite> {
        self.bind(directory.id())?;

        if self.files.get(filename) == Some(payload) {
            debug!(filename, "payload unchanged, skipping write");
            return Ok(BlobWrite::Unchanged);
        }

        directory.write_file(filename, payload.bytes())?;
        self.files.insert(filename.to_string(), payload.clone());
        self.estimate_refresh.schedule(Instant::now());

        debug!(filename, bytes = payload.len(), "wrote payload");
        Ok(BlobWrite::Written)
    }

    /// Forget every mapping of the bound directory, e.g. after it was wiped.
    pub fn forget_all(&mut self) {
        self.files.clear();
    }

    /// Latest storage estimate, refreshed if the refresh timer has expired.
    pub fn storage_estimate(&mut self) -> Result<StorageEstimate> {
        self.poll_estimate(Instant::now())?;
        Ok(self.estimate)
    }

    /// Refresh the estimate if the debounce after the last write has passed.
    pub fn poll_estimate(&mut self, now: Instant) -> Result<bool> {
        if !self.estimate_refresh.take_due(now) {
            return Ok(false);
        }

        let usage = self.cache.total_size()?;
        let available = fs2::available_space(self.cache.path())?;
        self.estimate = StorageEstimate {
            usage,
            quota: usage.saturating_add(available),
        };

        debug!(usage, quota = self.estimate.quota, "refreshed storage estimate");
        Ok(true)
    }
}
