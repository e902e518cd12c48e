// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded record database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → JSON user
//! - `user_index`: `email:<addr>` / `mobile:<n>` / `employee:<id>` / `aadhaar:<digest>` → user_id
//! - `beneficiaries`: beneficiary_id → JSON beneficiary
//! - `beneficiary_index`: `aadhaar:<digest>` / `mobile:<n>` → beneficiary_id
//! - `funds`: fund_id → JSON fund
//! - `fund_index`: `<beneficiary_id>|<scheme_code>` → fund_id
//! - `grievances`: grievance_id → JSON grievance
//! - `grievance_index`: ticket_number → grievance_id
//! - `disbursement_jobs`: fund_id → JSON settlement job
//! - `counters`: sequence name → u64
//!
//! Every mutation runs inside one write transaction opened by
//! [`PortalDatabase::write`]; the closure's guard checks and its writes commit
//! together or not at all.

use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, Table, TableDefinition,
    WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::TransitionError;

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const USER_INDEX: TableDefinition<&str, &str> = TableDefinition::new("user_index");
pub(crate) const BENEFICIARIES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("beneficiaries");
pub(crate) const BENEFICIARY_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("beneficiary_index");
pub(crate) const FUNDS: TableDefinition<&str, &[u8]> = TableDefinition::new("funds");
pub(crate) const FUND_INDEX: TableDefinition<&str, &str> = TableDefinition::new("fund_index");
pub(crate) const GRIEVANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("grievances");
pub(crate) const GRIEVANCE_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("grievance_index");
pub(crate) const DISBURSEMENT_JOBS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("disbursement_jobs");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

pub(crate) type RecordTableDef = TableDefinition<'static, &'static str, &'static [u8]>;
pub(crate) type RecordTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
pub(crate) type IndexTable<'txn> = Table<'txn, &'static str, &'static str>;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: user {user_id} cannot access {resource}")]
    PermissionDenied { user_id: String, resource: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// PortalDatabase
// =============================================================================

/// Embedded ACID database holding every portal record.
pub struct PortalDatabase {
    db: Database,
}

impl PortalDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_INDEX)?;
            let _ = write_txn.open_table(BENEFICIARIES)?;
            let _ = write_txn.open_table(BENEFICIARY_INDEX)?;
            let _ = write_txn.open_table(FUNDS)?;
            let _ = write_txn.open_table(FUND_INDEX)?;
            let _ = write_txn.open_table(GRIEVANCES)?;
            let _ = write_txn.open_table(GRIEVANCE_INDEX)?;
            let _ = write_txn.open_table(DISBURSEMENT_JOBS)?;
            let _ = write_txn.open_table(COUNTERS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Run `f` inside a read transaction.
    pub fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> StoreResult<T>) -> StoreResult<T> {
        let read_txn = self.db.begin_read()?;
        f(&read_txn)
    }

    /// Run `f` inside a write transaction, committing only if it returns `Ok`.
    ///
    /// An error aborts the transaction, discarding every write made by `f`.
    pub fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> StoreResult<T>) -> StoreResult<T> {
        let write_txn = self.db.begin_write()?;
        let value = f(&write_txn)?;
        write_txn.commit()?;
        Ok(value)
    }

    /// Read every record of a table.
    pub(crate) fn load_table<T: DeserializeOwned>(
        &self,
        table: RecordTableDef,
    ) -> StoreResult<Vec<T>> {
        self.read(|txn| load_all(&txn.open_table(table)?))
    }

    /// Confirm the database answers a read transaction.
    pub fn health_check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(COUNTERS)?;
        Ok(())
    }
}

// =============================================================================
// Record helpers
// =============================================================================

/// Deserialize the record stored under `key`.
pub(crate) fn load<T, R>(table: &R, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

/// Like [`load`], but a missing record is `StoreError::NotFound(what)`.
pub(crate) fn load_existing<T, R>(table: &R, key: &str, what: &str) -> StoreResult<T>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    load(table, key)?.ok_or_else(|| StoreError::NotFound(what.to_string()))
}

pub(crate) fn load_all<T, R>(table: &R) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut records = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        records.push(serde_json::from_slice(value.value())?);
    }
    Ok(records)
}

pub(crate) fn store<T: Serialize>(table: &mut RecordTable<'_>, key: &str, value: &T) -> StoreResult<()> {
    let json = serde_json::to_vec(value)?;
    table.insert(key, json.as_slice())?;
    Ok(())
}

pub(crate) fn remove(table: &mut RecordTable<'_>, key: &str) -> StoreResult<bool> {
    Ok(table.remove(key)?.is_some())
}

// =============================================================================
// Unique index helpers
// =============================================================================

/// Reserve `key` for `owner`. Fails with `AlreadyExists(what)` if another
/// record holds it; re-claiming one's own key is a no-op.
pub(crate) fn claim_unique(
    index: &mut IndexTable<'_>,
    key: &str,
    owner: &str,
    what: &str,
) -> StoreResult<()> {
    let current = index.get(key)?.map(|v| v.value().to_string());
    match current {
        Some(existing) if existing != owner => Err(StoreError::AlreadyExists(what.to_string())),
        Some(_) => Ok(()),
        None => {
            index.insert(key, owner)?;
            Ok(())
        }
    }
}

/// Drop `key` if it is held by `owner`.
pub(crate) fn release_unique(index: &mut IndexTable<'_>, key: &str, owner: &str) -> StoreResult<()> {
    let held = index.get(key)?.is_some_and(|v| v.value() == owner);
    if held {
        index.remove(key)?;
    }
    Ok(())
}

pub(crate) fn lookup_unique<R>(index: &R, key: &str) -> StoreResult<Option<String>>
where
    R: ReadableTable<&'static str, &'static str>,
{
    Ok(index.get(key)?.map(|v| v.value().to_string()))
}

/// Move an index entry from `old` to `new` when the keyed value changed.
pub(crate) fn reindex(
    index: &mut IndexTable<'_>,
    old: Option<&str>,
    new: Option<&str>,
    owner: &str,
    what: &str,
) -> StoreResult<()> {
    if old == new {
        return Ok(());
    }
    if let Some(new) = new {
        claim_unique(index, new, owner, what)?;
    }
    if let Some(old) = old {
        release_unique(index, old, owner)?;
    }
    Ok(())
}

/// Next value of a named, monotonically increasing sequence (starting at 1).
pub(crate) fn next_sequence(txn: &WriteTransaction, name: &str) -> StoreResult<u64> {
    let mut counters = txn.open_table(COUNTERS)?;
    let current = counters.get(name)?.map(|v| v.value()).unwrap_or(0);
    let next = current + 1;
    counters.insert(name, next)?;
    Ok(next)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;

    pub(crate) fn temp_db() -> (PortalDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = PortalDatabase::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: String,
        body: String,
    }

    #[test]
    fn store_and_load_record() {
        let (db, _dir) = temp_db();
        let note = Note {
            id: "n1".into(),
            body: "hello".into(),
        };

        db.write(|txn| {
            let mut table = txn.open_table(FUNDS)?;
            store(&mut table, &note.id, &note)
        })
        .unwrap();

        let loaded: Option<Note> = db.read(|txn| load(&txn.open_table(FUNDS)?, "n1")).unwrap();
        assert_eq!(loaded, Some(note));

        let all: Vec<Note> = db.load_table(FUNDS).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn failed_closure_rolls_back() {
        let (db, _dir) = temp_db();

        let result: StoreResult<()> = db.write(|txn| {
            let mut table = txn.open_table(FUNDS)?;
            store(
                &mut table,
                "n1",
                &Note {
                    id: "n1".into(),
                    body: "lost".into(),
                },
            )?;
            Err(StoreError::Conflict("abort".into()))
        });
        assert!(result.is_err());

        let loaded: Option<Note> = db.read(|txn| load(&txn.open_table(FUNDS)?, "n1")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn unique_keys_are_exclusive() {
        let (db, _dir) = temp_db();

        db.write(|txn| {
            let mut index = txn.open_table(USER_INDEX)?;
            claim_unique(&mut index, "email:a@example.in", "u1", "Email")?;
            // re-claim by the same owner is fine
            claim_unique(&mut index, "email:a@example.in", "u1", "Email")
        })
        .unwrap();

        let err = db
            .write(|txn| {
                let mut index = txn.open_table(USER_INDEX)?;
                claim_unique(&mut index, "email:a@example.in", "u2", "Email")
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(ref w) if w == "Email"));

        db.write(|txn| {
            let mut index = txn.open_table(USER_INDEX)?;
            reindex(
                &mut index,
                Some("email:a@example.in"),
                Some("email:b@example.in"),
                "u1",
                "Email",
            )
        })
        .unwrap();

        let (old, new) = db
            .read(|txn| {
                let index = txn.open_table(USER_INDEX)?;
                Ok((
                    lookup_unique(&index, "email:a@example.in")?,
                    lookup_unique(&index, "email:b@example.in")?,
                ))
            })
            .unwrap();
        assert_eq!(old, None);
        assert_eq!(new.as_deref(), Some("u1"));
    }

    #[test]
    fn sequences_increment_per_name() {
        let (db, _dir) = temp_db();
        let a1 = db.write(|txn| next_sequence(txn, "a")).unwrap();
        let a2 = db.write(|txn| next_sequence(txn, "a")).unwrap();
        let b1 = db.write(|txn| next_sequence(txn, "b")).unwrap();
        assert_eq!((a1, a2, b1), (1, 2, 1));
    }

    #[test]
    fn health_check_passes_on_open_db() {
        let (db, _dir) = temp_db();
        db.health_check().unwrap();
    }
}
