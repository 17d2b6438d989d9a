//! Scratch cache for opened payloads.

use crate::error::{ProjectError, Result};
use crate::types::{Hash, Payload};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for cache files.
const CACHE_MAGIC: &[u8; 4] = b"KCB\0";

/// Current cache file format version.
const CACHE_VERSION: u8 = 1;

/// Magic, version and content length.
const HEADER_LEN: u64 = 4 + 1 + 8;

/// Trailing CRC32.
const TRAILER_LEN: u64 = 4;

/// Content-addressed copies of payloads, on disk and in an LRU.
pub struct BlobCache {
    /// Base directory for cache files.
    path: PathBuf,

    /// Recently used payloads, so identical content shares one allocation.
    memory: Mutex<LruCache<Hash, Payload>>,
}

impl BlobCache {
    /// Create a cache rooted at the given path.
    pub fn new(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path,
            memory: Mutex::new(LruCache::new(cache_size)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a payload copy. A no-op if the content is already cached.
    pub fn put(&self, payload: &Payload) -> Result<()> {
        let hash = payload.hash();
        self.memory.lock().put(hash, payload.clone());

        let blob_path = self.blob_path(&hash);
        if blob_path.exists() {
            return Ok(());
        }

        fs::create_dir_all(self.shard_path(&hash))?;

        let content = payload.bytes();
        let mut file = File::create(&blob_path)?;

        file.write_all(CACHE_MAGIC)?;
        file.write_all(&[CACHE_VERSION])?;
        file.write_all(&(content.len() as u64).to_le_bytes())?;
        file.write_all(content)?;
        file.write_all(&crc32fast::hash(content).to_le_bytes())?;

        debug!(hash = %hash, bytes = content.len(), "cached payload");
        Ok(())
    }

    /// Look up a payload by content hash.
    pub fn get(&self, hash: &Hash) -> Result<Option<Payload>> {
        if let Some(payload) = self.memory.lock().get(hash).cloned() {
            return Ok(Some(payload));
        }

        let file = match File::open(self.blob_path(hash)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != CACHE_MAGIC {
            return Err(ProjectError::InvalidFormat("Invalid cache file magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != CACHE_VERSION {
            return Err(ProjectError::InvalidFormat(format!(
                "Unsupported cache file version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        reader.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);
        let expected_len = len
            .checked_add(HEADER_LEN + TRAILER_LEN)
            .filter(|&total| total == file_len);
        if expected_len.is_none() {
            return Err(ProjectError::InvalidFormat(format!(
                "Cache file length mismatch: header says {len} bytes, file has {file_len}"
            )));
        }

        let mut content = vec![0u8; len as usize];
        reader.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&content);
        if stored != computed {
            return Err(ProjectError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let computed_hash = Hash::from_bytes(&content);
        if &computed_hash != hash {
            return Err(ProjectError::HashMismatch {
                expected: *hash,
                got: computed_hash,
            });
        }

        let payload = Payload::from_parts(*hash, content.into());
        self.memory.lock().put(*hash, payload.clone());
        Ok(Some(payload))
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.memory.lock().contains(hash) || self.blob_path(hash).exists()
    }

    /// Drop every cached payload, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        self.memory.lock().clear();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }

        debug!(path = %self.path.display(), "cleared payload cache");
        Ok(())
    }

    /// Number of cached payloads on disk.
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                count += fs::read_dir(entry.path())?.count();
            }
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Total bytes of all cache files.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for blob_entry in fs::read_dir(entry.path())? {
                    total += blob_entry?.metadata()?.len();
                }
            }
        }

        Ok(total)
    }

    fn shard_path(&self, hash: &Hash) -> PathBuf {
        self.path.join(hash.shard_prefix())
    }

    fn blob_path(&self, hash: &Hash) -> PathBuf {
        self.shard_path(hash).join(hash.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let cache = BlobCache::new(dir.path().join("cache"), 16).unwrap();

        let payload = Payload::new(b"jpeg".to_vec());
        cache.put(&payload).unwrap();

        let cached = cache.get(&payload.hash()).unwrap().unwrap();
        assert!(cached.ptr_eq(&payload));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_get_from_disk_after_eviction() {
        let dir = TempDir::new().unwrap();
        let cache = BlobCache::new(dir.path().join("cache"), 1).unwrap();

        let first = Payload::new(b"first".to_vec());
        let second = Payload::new(b"second".to_vec());
        cache.put(&first).unwrap();
        cache.put(&second).unwrap();

        // `first` was evicted from memory but is still on disk
        let reloaded = cache.get(&first.hash()).unwrap().unwrap();
        assert_eq!(reloaded.bytes(), b"first");
        assert!(!reloaded.ptr_eq(&first));
    }

    #[test]
    fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = BlobCache::new(dir.path().join("cache"), 16).unwrap();

        assert!(cache.get(&Hash::from_bytes(b"absent")).unwrap().is_none());
        assert!(!cache.contains(&Hash::from_bytes(b"absent")));
    }

    #[test]
    fn test_corrupt_file_detected() {
        let dir = TempDir::new().unwrap();
        let cache = BlobCache::new(dir.path().join("cache"), 1).unwrap();

        let payload = Payload::new(b"raw sensor data".to_vec());
        cache.put(&payload).unwrap();
        cache.put(&Payload::new(b"evict".to_vec())).unwrap();

        // Flip one content byte
        let path = cache.blob_path(&payload.hash());
        let mut bytes = fs::read(&path).unwrap();
        bytes[14] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let result = cache.get(&payload.hash());
        assert!(matches!(result, Err(ProjectError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_oversized_length_header_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = BlobCache::new(dir.path().join("cache"), 1).unwrap();

        let payload = Payload::new(b"raw sensor data".to_vec());
        cache.put(&payload).unwrap();
        cache.put(&Payload::new(b"evict".to_vec())).unwrap();

        // Claim far more content than the file holds
        let path = cache.blob_path(&payload.hash());
        let mut bytes = fs::read(&path).unwrap();
        bytes[5..13].copy_from_slice(&(u64::MAX / 2).to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let result = cache.get(&payload.hash());
        assert!(matches!(result, Err(ProjectError::InvalidFormat(_))));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let cache = BlobCache::new(dir.path().join("cache"), 16).unwrap();

        let payload = Payload::new(b"lv".to_vec());
        cache.put(&payload).unwrap();
        assert!(cache.total_size().unwrap() > 0);

        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
        assert!(!cache.contains(&payload.hash()));
    }
}
