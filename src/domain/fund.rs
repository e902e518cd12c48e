// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fund record: sanction, approval and the disbursement transaction.
//!
//! ## State Machine
//!
//! Approval is decided once: `pending → approved | rejected`.
//!
//! The transaction moves independently once approval is granted:
//!
//! ```text
//! pending ──initiate──► initiated ──process──► processing ──complete──► successful
//!    │                   │    ▲                     │
//!    │                   │    └──────retry──────┐   │
//!    │                   ├──────fail──────────► failed ◄┘
//!    ▼                   ▼                      │
//! cancelled ◄──────── cancel ◄──────────────────┘
//! ```
//!
//! `fail` increments `retry_count`; `retry` is refused once it reaches
//! `max_retries`. Initiation and retry both require an approved fund and an
//! unexpired sanction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Actor, TransitionError};

/// Retry budget for a failed disbursement.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Initiated,
    Processing,
    Successful,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Successful => "successful",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    /// A settlement job is outstanding in these states.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TransactionStatus::Initiated | TransactionStatus::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Amount {
    #[schema(value_type = String, example = "50000.00")]
    pub sanctioned: Decimal,
    #[schema(value_type = String, example = "0")]
    pub disbursed: Decimal,
    /// Always `sanctioned - disbursed`; recomputed on every save.
    #[schema(value_type = String, example = "50000.00")]
    pub pending: Decimal,
}

impl Amount {
    pub fn sanctioned(sanctioned: Decimal) -> Self {
        Self {
            sanctioned,
            disbursed: Decimal::ZERO,
            pending: sanctioned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Sanction {
    pub order_number: String,
    pub order_date: NaiveDate,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub sanctioned_by: String,
}

impl Sanction {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Approval {
    pub status: ApprovalStatus,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub rejection_reason: Option<String>,
}

impl Default for Approval {
    fn default() -> Self {
        Self {
            status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
            remarks: None,
            rejection_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub status: TransactionStatus,
    pub initiated_by: Option<String>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub transaction_id: Option<String>,
    pub utr_number: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            status: TransactionStatus::Pending,
            initiated_by: None,
            initiated_at: None,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            failure_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            transaction_id: None,
            utr_number: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// One fund per (beneficiary, scheme) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Fund {
    pub id: String,
    pub beneficiary_id: String,
    pub scheme_code: String,
    pub scheme_name: String,
    pub amount: Amount,
    pub sanction: Sanction,
    pub approval: Approval,
    pub transaction: Transaction,
    pub remarks: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every save.
    pub version: u64,
}

/// Events accepted by [`Fund::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundEvent {
    Approve { remarks: Option<String> },
    Reject { reason: Option<String> },
    InitiateDisbursement,
    Process { transaction_id: String },
    Complete { utr_number: String },
    Fail { reason: String },
    Retry,
    Cancel { reason: Option<String> },
}

impl FundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FundEvent::Approve { .. } => "approve",
            FundEvent::Reject { .. } => "reject",
            FundEvent::InitiateDisbursement => "initiate_disbursement",
            FundEvent::Process { .. } => "process",
            FundEvent::Complete { .. } => "complete",
            FundEvent::Fail { .. } => "fail",
            FundEvent::Retry => "retry",
            FundEvent::Cancel { .. } => "cancel",
        }
    }
}

/// The pair of status fields the state machine moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct FundState {
    pub approval: ApprovalStatus,
    pub transaction: TransactionStatus,
}

impl Fund {
    pub fn state(&self) -> FundState {
        FundState {
            approval: self.approval.status,
            transaction: self.transaction.status,
        }
    }

    /// Validate `event` against the current state and apply it.
    ///
    /// On error the record is left untouched.
    pub fn apply(
        &mut self,
        event: FundEvent,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<FundState, TransitionError> {
        match event {
            FundEvent::Approve { remarks } => {
                self.ensure_approval_pending()?;
                self.approval.status = ApprovalStatus::Approved;
                self.approval.decided_by = Some(actor.id.clone());
                self.approval.decided_at = Some(now);
                self.approval.remarks = remarks;
            }
            FundEvent::Reject { reason } => {
                self.ensure_approval_pending()?;
                self.approval.status = ApprovalStatus::Rejected;
                self.approval.decided_by = Some(actor.id.clone());
                self.approval.decided_at = Some(now);
                self.approval.rejection_reason = reason;
            }
            FundEvent::InitiateDisbursement => {
                self.ensure_approved()?;
                self.ensure_transaction(TransactionStatus::Pending)?;
                self.ensure_sanction_valid(now)?;
                self.transaction.status = TransactionStatus::Initiated;
                self.transaction.initiated_by = Some(actor.id.clone());
                self.transaction.initiated_at = Some(now);
            }
            FundEvent::Process { transaction_id } => {
                self.ensure_transaction(TransactionStatus::Initiated)?;
                self.transaction.status = TransactionStatus::Processing;
                self.transaction.transaction_id = Some(transaction_id);
                self.transaction.processed_at = Some(now);
            }
            FundEvent::Complete { utr_number } => {
                self.ensure_transaction(TransactionStatus::Processing)?;
                self.transaction.status = TransactionStatus::Successful;
                self.transaction.utr_number = Some(utr_number);
                self.transaction.completed_at = Some(now);
                self.amount.disbursed = self.amount.sanctioned;
                self.amount.pending = Decimal::ZERO;
            }
            FundEvent::Fail { reason } => {
                if !self.transaction.status.is_in_flight() {
                    return Err(TransitionError::InvalidTransactionState {
                        expected: TransactionStatus::Processing,
                        actual: self.transaction.status,
                    });
                }
                self.transaction.status = TransactionStatus::Failed;
                self.transaction.failed_at = Some(now);
                self.transaction.failure_reason = Some(reason);
                self.transaction.retry_count += 1;
            }
            FundEvent::Retry => {
                self.ensure_transaction(TransactionStatus::Failed)?;
                if self.transaction.retry_count >= self.transaction.max_retries {
                    return Err(TransitionError::RetriesExhausted {
                        max: self.transaction.max_retries,
                    });
                }
                self.ensure_approved()?;
                self.ensure_sanction_valid(now)?;
                self.transaction.status = TransactionStatus::Initiated;
                self.transaction.initiated_by = Some(actor.id.clone());
                self.transaction.initiated_at = Some(now);
                self.transaction.transaction_id = None;
                self.transaction.failure_reason = None;
            }
            FundEvent::Cancel { reason } => {
                if !matches!(
                    self.transaction.status,
                    TransactionStatus::Pending
                        | TransactionStatus::Initiated
                        | TransactionStatus::Failed
                ) {
                    return Err(TransitionError::NotCancellable(self.transaction.status));
                }
                self.transaction.status = TransactionStatus::Cancelled;
                self.transaction.cancelled_by = Some(actor.id.clone());
                self.transaction.cancelled_at = Some(now);
                self.transaction.cancellation_reason = reason;
            }
        }
        Ok(self.state())
    }

    /// Recompute derived amounts and bump the version. Called on every save.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.amount.pending = self.amount.sanctioned - self.amount.disbursed;
        self.version += 1;
        self.updated_at = now;
    }

    fn ensure_approval_pending(&self) -> Result<(), TransitionError> {
        match self.approval.status {
            ApprovalStatus::Pending => Ok(()),
            decided => Err(TransitionError::ApprovalAlreadyDecided(decided)),
        }
    }

    fn ensure_approved(&self) -> Result<(), TransitionError> {
        match self.approval.status {
            ApprovalStatus::Approved => Ok(()),
            other => Err(TransitionError::NotApproved(other)),
        }
    }

    fn ensure_transaction(&self, expected: TransactionStatus) -> Result<(), TransitionError> {
        if self.transaction.status == expected {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransactionState {
                expected,
                actual: self.transaction.status,
            })
        }
    }

    fn ensure_sanction_valid(&self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.sanction.is_valid_at(now) {
            Ok(())
        } else {
            Err(TransitionError::SanctionExpired(self.sanction.valid_until))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::Role;
    use chrono::Duration;

    pub(crate) fn sample_fund(beneficiary_id: &str, valid_for: Duration) -> Fund {
        let now = Utc::now();
        Fund {
            id: "fund-1".to_string(),
            beneficiary_id: beneficiary_id.to_string(),
            scheme_code: "POA-RELIEF".to_string(),
            scheme_name: "Relief under PoA Act".to_string(),
            amount: Amount::sanctioned(Decimal::new(8_250_000, 2)),
            sanction: Sanction {
                order_number: "SO/2026/117".to_string(),
                order_date: now.date_naive(),
                valid_from: now - Duration::days(1),
                valid_until: now + valid_for,
                sanctioned_by: "officer-1".to_string(),
            },
            approval: Approval::default(),
            transaction: Transaction::default(),
            remarks: None,
            created_by: "officer-1".to_string(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn officer() -> Actor {
        Actor::new("officer-1", Role::SchemeOfficer)
    }

    fn approved_fund() -> Fund {
        let mut fund = sample_fund("ben-1", Duration::days(30));
        fund.apply(FundEvent::Approve { remarks: None }, &officer(), Utc::now())
            .unwrap();
        fund
    }

    #[test]
    fn approval_is_decided_once() {
        let mut fund = approved_fund();
        assert_eq!(fund.approval.decided_by.as_deref(), Some("officer-1"));

        let err = fund
            .apply(FundEvent::Reject { reason: None }, &officer(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::ApprovalAlreadyDecided(ApprovalStatus::Approved)
        );
    }

    #[test]
    fn initiate_rejected_when_not_approved() {
        let mut fund = sample_fund("ben-1", Duration::days(30));
        let err = fund
            .apply(FundEvent::InitiateDisbursement, &officer(), Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::NotApproved(ApprovalStatus::Pending));
        assert_eq!(fund.transaction.status, TransactionStatus::Pending);
    }

    #[test]
    fn initiate_rejected_when_transaction_not_pending() {
        let mut fund = approved_fund();
        fund.apply(FundEvent::InitiateDisbursement, &officer(), Utc::now())
            .unwrap();
        let err = fund
            .apply(FundEvent::InitiateDisbursement, &officer(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransactionState {
                expected: TransactionStatus::Pending,
                actual: TransactionStatus::Initiated,
            }
        );
    }

    #[test]
    fn initiate_rejected_when_sanction_expired() {
        let mut fund = approved_fund();
        let now = Utc::now();
        fund.sanction.valid_until = now;
        let err = fund
            .apply(FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap_err();
        assert_eq!(err, TransitionError::SanctionExpired(now));
    }

    #[test]
    fn completion_settles_amounts() {
        let mut fund = approved_fund();
        let now = Utc::now();
        fund.apply(FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap();
        fund.apply(
            FundEvent::Process {
                transaction_id: "TXN1".into(),
            },
            &officer(),
            now,
        )
        .unwrap();
        let state = fund
            .apply(
                FundEvent::Complete {
                    utr_number: "UTR1".into(),
                },
                &officer(),
                now,
            )
            .unwrap();

        assert_eq!(state.transaction, TransactionStatus::Successful);
        assert_eq!(fund.amount.disbursed, fund.amount.sanctioned);
        assert_eq!(fund.amount.pending, Decimal::ZERO);
        assert_eq!(fund.transaction.utr_number.as_deref(), Some("UTR1"));
    }

    #[test]
    fn retry_allowed_below_limit_and_refused_at_limit() {
        let mut fund = approved_fund();
        let now = Utc::now();
        fund.apply(FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap();

        for attempt in 1..=3 {
            fund.apply(
                FundEvent::Fail {
                    reason: format!("bank timeout {attempt}"),
                },
                &officer(),
                now,
            )
            .unwrap();
            assert_eq!(fund.transaction.retry_count, attempt);

            if attempt < 3 {
                let state = fund.apply(FundEvent::Retry, &officer(), now).unwrap();
                assert_eq!(state.transaction, TransactionStatus::Initiated);
            }
        }

        let err = fund.apply(FundEvent::Retry, &officer(), now).unwrap_err();
        assert_eq!(err, TransitionError::RetriesExhausted { max: 3 });
        assert_eq!(fund.transaction.status, TransactionStatus::Failed);
    }

    #[test]
    fn retry_rechecks_sanction() {
        let mut fund = approved_fund();
        let now = Utc::now();
        fund.apply(FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap();
        fund.apply(FundEvent::Fail { reason: "x".into() }, &officer(), now)
            .unwrap();
        fund.sanction.valid_until = now - Duration::seconds(1);
        let err = fund.apply(FundEvent::Retry, &officer(), now).unwrap_err();
        assert!(matches!(err, TransitionError::SanctionExpired(_)));
    }

    #[test]
    fn cancel_only_before_processing() {
        let mut fund = approved_fund();
        let now = Utc::now();
        fund.apply(FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap();
        fund.apply(
            FundEvent::Process {
                transaction_id: "TXN1".into(),
            },
            &officer(),
            now,
        )
        .unwrap();
        let err = fund
            .apply(FundEvent::Cancel { reason: None }, &officer(), now)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotCancellable(TransactionStatus::Processing)
        );

        let mut pending = sample_fund("ben-2", Duration::days(1));
        pending
            .apply(
                FundEvent::Cancel {
                    reason: Some("duplicate".into()),
                },
                &officer(),
                now,
            )
            .unwrap();
        assert_eq!(pending.transaction.status, TransactionStatus::Cancelled);
    }

    #[test]
    fn touch_recomputes_pending_and_bumps_version() {
        let mut fund = sample_fund("ben-1", Duration::days(1));
        fund.amount.disbursed = Decimal::new(250_000, 2);
        fund.amount.pending = Decimal::ZERO;
        fund.touch(Utc::now());
        assert_eq!(
            fund.amount.pending,
            fund.amount.sanctioned - fund.amount.disbursed
        );
        assert_eq!(fund.version, 1);
    }
}
