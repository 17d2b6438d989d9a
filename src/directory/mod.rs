//! Capability-scoped directory handles.
//!
//! Every byte the engine persists goes through a [`Directory`]. A handle
//! grants access to one flat directory of named files; callers never build
//! paths themselves.
//!
//! - [`FsDirectory`] is backed by a real filesystem directory with atomic writes.
//! - [`MemoryDirectory`] keeps files in memory and lets the permission prompt
//!   be scripted. It backs the scratch "local" project and the tests.

mod fs;
mod memory;

pub use fs::FsDirectory;
pub use memory::{MemoryDirectory, Permission};

use crate::error::{ProjectError, Result};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a directory.
pub type DirHandle = Arc<dyn Directory>;

/// Stable identity of a directory, used to tell two handles to the same
/// place apart from handles to different places.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DirectoryId(String);

impl DirectoryId {
    pub fn new(id: impl Into<String>) -> Self {
        DirectoryId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirectoryId({})", self.0)
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directory the engine can read from and write to.
pub trait Directory: Send + Sync {
    /// Identity of the underlying location.
    fn id(&self) -> &DirectoryId;

    /// Display name. Empty for the scratch directory.
    fn name(&self) -> &str;

    /// Check read-write permission, prompting if needed.
    ///
    /// Fails with [`ProjectError::PermissionDenied`] if the user declines.
    fn query_or_request_read_write(&self) -> Result<()>;

    /// Read a whole file. Fails with [`ProjectError::NotFound`] if absent.
    fn read_file(&self, filename: &str) -> Result<Vec<u8>>;

    /// Create or overwrite a file.
    fn write_file(&self, filename: &str, bytes: &[u8]) -> Result<()>;

    /// Names of all entries in the directory.
    fn list_entries(&self) -> Result<Vec<String>>;

    /// Remove an entry. Removing a missing entry is not an error.
    fn remove_entry(&self, name: &str) -> Result<()>;

    /// Whether `other` refers to the same location.
    fn is_same_entry(&self, other: &dyn Directory) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for dyn Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("id", self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// Prompts the user for a directory.
///
/// Refusal surfaces as [`ProjectError::PermissionDenied`].
pub trait DirectoryPicker: Send + Sync {
    fn request(&self) -> Result<DirHandle>;
}

impl<F> DirectoryPicker for F
where
    F: Fn() -> Result<DirHandle> + Send + Sync,
{
    fn request(&self) -> Result<DirHandle> {
        self()
    }
}

/// Remove every entry of a directory.
pub fn clear_directory(directory: &dyn Directory) -> Result<()> {
    for name in directory.list_entries()? {
        directory.remove_entry(&name)?;
    }
    Ok(())
}

/// Reject names that would escape the directory.
pub(crate) fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(&['/', '\\', '\0'][..]);

    if invalid {
        return Err(ProjectError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("Untitled_layer=0_0001.jpg").is_ok());
        assert!(validate_filename("project.json").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../escape.jpg").is_err());
        assert!(validate_filename("nested/file.jpg").is_err());
    }

    #[test]
    fn test_closure_picker() {
        let dir: DirHandle = Arc::new(MemoryDirectory::new("picked"));
        let picker = move || -> Result<DirHandle> { Ok(Arc::clone(&dir)) };

        let handle = picker.request().unwrap();
        assert_eq!(handle.name(), "picked");
    }

    #[test]
    fn test_clear_directory() {
        let dir = MemoryDirectory::new("scratch");
        dir.write_file("a.jpg", b"a").unwrap();
        dir.write_file("b.jpg", b"b").unwrap();

        clear_directory(&dir).unwrap();
        assert!(dir.list_entries().unwrap().is_empty());
    }
}
