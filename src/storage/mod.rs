// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Records live in a single `redb` database; uploaded documents and the audit
//! trail are plain files next to it.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   portal.redb                 # users, beneficiaries, funds, grievances, jobs
//!   uploads/{beneficiary_id}/
//!     {storage_key}             # uploaded document bodies
//!   audit/
//!     {date}/events.jsonl       # daily audit logs
//! ```
//!
//! Sensitive fields (Aadhaar, bank account, IFSC) are sealed by
//! [`crate::crypto::FieldCipher`] before they reach this layer.

pub mod audit;
pub mod database;
pub mod files;
pub mod ownership;
pub mod paths;
pub mod repository;

pub use audit::{events_to_csv, AuditEvent, AuditEventType, AuditFilter, AuditRepository};
pub use database::{PortalDatabase, StoreError, StoreResult};
pub use files::{FileError, FileResult, FileStorage};
pub use ownership::{OwnedResource, OwnershipCheck, OwnershipEnforcer};
pub use paths::StoragePaths;
pub use repository::{
    BeneficiaryRepository, DisbursementJob, DisbursementQueue, FundRepository,
    normalize_email, GrievanceRepository, StoredUser, UserRepository, UserResponse,
};
