// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Plain-file storage for uploaded documents and the audit log.
//!
//! Records live in redb; this module only handles opaque blobs and
//! append-only JSONL files under the data directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use super::StoragePaths;

/// Error type for file storage operations.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("file storage not initialized")]
    NotInitialized,

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}

impl From<io::Error> for FileError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            FileError::NotFound("File".to_string())
        } else {
            FileError::Io(e)
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;

/// File storage rooted at the configured data directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    paths: StoragePaths,
    initialized: bool,
}

impl FileStorage {
    /// Does NOT create the directory structure. Call `initialize()` first.
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Create the upload and audit directories. Idempotent.
    pub fn initialize(&mut self) -> FileResult<()> {
        for dir in [self.paths.uploads_dir(), self.paths.audit_dir()] {
            fs::create_dir_all(&dir)?;
        }
        self.initialized = true;
        Ok(())
    }

    /// Write-read-delete probe of the data directory.
    pub fn health_check(&self) -> FileResult<()> {
        self.ensure_initialized()?;

        let test_file = self.paths.root().join(".health_check");
        let test_data = b"health_check_data";

        fs::write(&test_file, test_data)?;
        let read_data = fs::read(&test_file)?;
        fs::remove_file(&test_file)?;

        if read_data != test_data {
            return Err(FileError::IntegrityViolation(
                "Health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }

    /// Write raw bytes, replacing any existing file. The write goes to a
    /// temporary sibling first and is renamed into place.
    pub fn write_raw(&self, path: impl AsRef<Path>, data: &[u8]) -> FileResult<()> {
        self.ensure_initialized()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(data)?;
            file.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn read_raw(&self, path: impl AsRef<Path>) -> FileResult<Vec<u8>> {
        self.ensure_initialized()?;

        let mut file = File::open(path.as_ref())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Append one line, creating the file and its directory as needed.
    pub fn append_line(&self, path: impl AsRef<Path>, line: &str) -> FileResult<()> {
        self.ensure_initialized()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        File::open(path.as_ref()).is_ok()
    }

    pub fn delete(&self, path: impl AsRef<Path>) -> FileResult<()> {
        self.ensure_initialized()?;
        fs::remove_file(path.as_ref())?;
        Ok(())
    }

    /// Remove a directory tree if present.
    pub fn delete_dir(&self, path: impl AsRef<Path>) -> FileResult<()> {
        self.ensure_initialized()?;
        match fs::remove_dir_all(path.as_ref()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_initialized(&self) -> FileResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(FileError::NotInitialized)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_files() -> (TempDir, FileStorage) {
        let temp = TempDir::new().unwrap();
        let mut files = FileStorage::new(StoragePaths::new(temp.path()));
        files.initialize().unwrap();
        (temp, files)
    }

    #[test]
    fn initialize_creates_directories() {
        let (_temp, files) = test_files();
        assert!(files.paths().uploads_dir().exists());
        assert!(files.paths().audit_dir().exists());
    }

    #[test]
    fn write_and_read_raw() {
        let (_temp, files) = test_files();
        let data = b"%PDF-1.4 \x00\x01\x02";
        let path = files.paths().document("ben-1", "doc-1.pdf");

        files.write_raw(&path, data).unwrap();
        assert_eq!(files.read_raw(&path).unwrap(), data);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn append_line_accumulates() {
        let (_temp, files) = test_files();
        let path = files.paths().audit_events_file("2026-01-01");
        files.append_line(&path, "{\"a\":1}").unwrap();
        files.append_line(&path, "{\"a\":2}").unwrap();

        let content = String::from_utf8(files.read_raw(&path).unwrap()).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_temp, files) = test_files();
        let result = files.read_raw(files.paths().document("ben-x", "nope"));
        assert!(matches!(result, Err(FileError::NotFound(_))));
    }

    #[test]
    fn delete_dir_tolerates_missing() {
        let (_temp, files) = test_files();
        let dir = files.paths().beneficiary_uploads("ben-1");
        files
            .write_raw(files.paths().document("ben-1", "a"), b"x")
            .unwrap();
        files.delete_dir(&dir).unwrap();
        assert!(!dir.exists());
        files.delete_dir(&dir).unwrap();
    }

    #[test]
    fn health_check_works() {
        let (_temp, files) = test_files();
        files.health_check().unwrap();
    }

    #[test]
    fn uninitialized_storage_returns_error() {
        let files = FileStorage::new(StoragePaths::new("/tmp/never-init"));
        let result = files.read_raw("/tmp/any.bin");
        assert!(matches!(result, Err(FileError::NotInitialized)));
    }
}
