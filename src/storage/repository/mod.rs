// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the portal database.
//!
//! Each repository borrows the [`PortalDatabase`](super::PortalDatabase) and
//! runs every mutation inside one write transaction.

pub mod beneficiaries;
pub mod disbursements;
pub mod funds;
pub mod grievances;
pub mod users;

pub use beneficiaries::BeneficiaryRepository;
pub use disbursements::{DisbursementJob, DisbursementQueue};
pub use funds::{FundRepository, DEFAULT_SETTLEMENT_DELAY_SECS};
pub use grievances::GrievanceRepository;
pub use users::{normalize_email, StoredUser, UserRepository, UserResponse};
