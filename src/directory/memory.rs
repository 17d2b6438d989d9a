//! In-memory directory.

use super::{validate_filename, Directory, DirectoryId};
use crate::error::{ProjectError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// Permission state of a [`MemoryDirectory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Granted,
    /// Not yet granted; the next prompt resolves to `accept`.
    Prompt { accept: bool },
    Denied,
}

/// A directory whose files live in memory.
pub struct MemoryDirectory {
    id: DirectoryId,
    name: String,
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    permission: Mutex<Permission>,
}

impl MemoryDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        let id = NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: DirectoryId::new(format!("memory:{id}")),
            name: name.into(),
            files: RwLock::new(BTreeMap::new()),
            permission: Mutex::new(Permission::Granted),
        }
    }

    /// Same as [`MemoryDirectory::new`] but starting in the given permission state.
    pub fn with_permission(name: impl Into<String>, permission: Permission) -> Self {
        let dir = Self::new(name);
        *dir.permission.lock() = permission;
        dir
    }

    pub fn set_permission(&self, permission: Permission) {
        *self.permission.lock() = permission;
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.read().contains_key(filename)
    }

    /// Total bytes held.
    pub fn total_size(&self) -> u64 {
        self.files.read().values().map(|b| b.len() as u64).sum()
    }
}

impl Directory for MemoryDirectory {
    fn id(&self) -> &DirectoryId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn query_or_request_read_write(&self) -> Result<()> {
        let mut permission = self.permission.lock();
        match *permission {
            Permission::Granted => Ok(()),
            Permission::Prompt { accept: true } => {
                *permission = Permission::Granted;
                Ok(())
            }
            Permission::Prompt { accept: false } | Permission::Denied => {
                *permission = Permission::Denied;
                Err(ProjectError::PermissionDenied(self.name.clone()))
            }
        }
    }

    fn read_file(&self, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;
        self.files
            .read()
            .get(filename)
            .cloned()
            .ok_or_else(|| ProjectError::NotFound {
                directory: self.name.clone(),
                filename: filename.to_string(),
            })
    }

    fn write_file(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        validate_filename(filename)?;
        self.files.write().insert(filename.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list_entries(&self) -> Result<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn remove_entry(&self, name: &str) -> Result<()> {
        self.files.write().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dir = MemoryDirectory::new("shots");
        dir.write_file("a.jpg", b"abc").unwrap();

        assert!(dir.contains("a.jpg"));
        assert_eq!(dir.read_file("a.jpg").unwrap(), b"abc");
        assert_eq!(dir.total_size(), 3);
    }

    #[test]
    fn test_prompt_grants_once_accepted() {
        let dir = MemoryDirectory::with_permission("shots", Permission::Prompt { accept: true });
        dir.query_or_request_read_write().unwrap();
        dir.query_or_request_read_write().unwrap();
    }

    #[test]
    fn test_prompt_refused_is_permission_denied() {
        let dir = MemoryDirectory::with_permission("shots", Permission::Prompt { accept: false });
        let err = dir.query_or_request_read_write().unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_distinct_ids() {
        let a = MemoryDirectory::new("same");
        let b = MemoryDirectory::new("same");
        assert!(!a.is_same_entry(&b));
        assert!(a.is_same_entry(&a));
    }
}
