//! Filesystem-backed directory.

use super::{validate_filename, Directory, DirectoryId};
use crate::error::{ProjectError, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Suffix of the temporary sibling written before an atomic rename.
const TEMP_SUFFIX: &str = ".partial";

/// A directory on the local filesystem.
#[derive(Debug)]
pub struct FsDirectory {
    id: DirectoryId,
    name: String,
    path: PathBuf,
}

impl FsDirectory {
    /// Open an existing directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProjectError::NotFound {
                directory: path.display().to_string(),
                filename: String::new(),
            },
            _ => ProjectError::Io(e),
        })?;

        if !canonical.is_dir() {
            return Err(ProjectError::InvalidFilename(canonical.display().to_string()));
        }

        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            id: DirectoryId::new(canonical.display().to_string()),
            name,
            path: canonical,
        })
    }

    /// Create the directory (and parents) if needed, then open it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(path.as_ref())?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_path(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.path.join(filename))
    }

    fn not_found(&self, filename: &str) -> ProjectError {
        ProjectError::NotFound {
            directory: self.name.clone(),
            filename: filename.to_string(),
        }
    }
}

impl Directory for FsDirectory {
    fn id(&self) -> &DirectoryId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn query_or_request_read_write(&self) -> Result<()> {
        let metadata = fs::metadata(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => self.not_found(""),
            ErrorKind::PermissionDenied => ProjectError::PermissionDenied(self.name.clone()),
            _ => ProjectError::Io(e),
        })?;

        if metadata.permissions().readonly() {
            return Err(ProjectError::PermissionDenied(self.name.clone()));
        }
        Ok(())
    }

    fn read_file(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.file_path(filename)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => self.not_found(filename),
            ErrorKind::PermissionDenied => ProjectError::PermissionDenied(self.name.clone()),
            _ => ProjectError::Io(e),
        })
    }

    fn write_file(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        let path = self.file_path(filename)?;
        let temp_path = self.path.join(format!(".{filename}{TEMP_SUFFIX}"));

        let mut file = File::create(&temp_path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => ProjectError::PermissionDenied(self.name.clone()),
            _ => ProjectError::Io(e),
        })?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn list_entries(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    fn remove_entry(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;

        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
