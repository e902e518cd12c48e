// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! DBT Portal - Direct Benefit Transfer service
//!
//! Registers beneficiaries, sanctions and disburses scheme funds, tracks
//! grievances against an SLA and keeps an append-only audit trail.
//!
//! ## Modules
//!
//! - `api` - HTTP handlers, router and OpenAPI document (Axum)
//! - `auth` - Portal-issued JWTs, passwords and role guards
//! - `crypto` - AES-GCM field encryption and keyed digests
//! - `disbursement` - Background settlement of queued disbursements
//! - `domain` - Beneficiary, fund and grievance records and their rules
//! - `storage` - Embedded database (redb), document files and audit log

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod disbursement;
pub mod domain;
pub mod error;
pub mod rate_limit;
pub mod response;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;
