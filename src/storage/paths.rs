// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the data directory layout.

use std::path::{Path, PathBuf};

/// Default data directory when `DATA_DIR` is unset.
pub const DATA_ROOT: &str = "./data";

/// Storage path utilities for the data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all persistent data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The redb database file.
    pub fn database_file(&self) -> PathBuf {
        self.root.join("portal.redb")
    }

    // ========== Upload Paths ==========

    /// Directory containing all uploaded documents.
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Directory for one beneficiary's documents.
    pub fn beneficiary_uploads(&self, beneficiary_id: &str) -> PathBuf {
        self.uploads_dir().join(beneficiary_id)
    }

    /// Path to a stored document blob.
    pub fn document(&self, beneficiary_id: &str, storage_key: &str) -> PathBuf {
        self.beneficiary_uploads(beneficiary_id).join(storage_key)
    }

    // ========== Audit Log Paths ==========

    /// Directory containing audit logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Directory for a specific date's audit logs.
    pub fn audit_date_dir(&self, date: &str) -> PathBuf {
        self.audit_dir().join(date)
    }

    /// Path to a daily audit events file (JSONL format).
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_date_dir(date).join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("./data"));
        assert_eq!(paths.database_file(), PathBuf::from("./data/portal.redb"));
    }

    #[test]
    fn document_paths_are_per_beneficiary() {
        let paths = StoragePaths::new("/tmp/test-data");
        assert_eq!(paths.uploads_dir(), PathBuf::from("/tmp/test-data/uploads"));
        assert_eq!(
            paths.document("ben-1", "doc-9.pdf"),
            PathBuf::from("/tmp/test-data/uploads/ben-1/doc-9.pdf")
        );
    }

    #[test]
    fn audit_paths_are_correct() {
        let paths = StoragePaths::new("/srv/dbt");
        assert_eq!(paths.audit_dir(), PathBuf::from("/srv/dbt/audit"));
        assert_eq!(
            paths.audit_events_file("2026-03-01"),
            PathBuf::from("/srv/dbt/audit/2026-03-01/events.jsonl")
        );
    }
}
