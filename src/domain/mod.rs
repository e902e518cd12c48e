// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Domain Records
//!
//! Beneficiary applications, fund records and grievance tickets, each with an
//! explicit status enum and a transition function that validates the current
//! state, the event and the acting user before mutating anything.
//!
//! Guards return [`TransitionError`]; nothing is written when a guard fails.
//! Persistence wraps each transition in a single database write transaction,
//! so the guard and the write are atomic.

pub mod beneficiary;
pub mod fund;
pub mod grievance;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthenticatedUser, Role};

pub use beneficiary::{
    Address, ApplicationStatus, BankDetails, Beneficiary, CaseDetails, Category, Document,
    DocumentType, FamilyMember, Gender, StatusChange,
};
pub use fund::{
    Amount, Approval, ApprovalStatus, Fund, FundEvent, FundState, Sanction, Transaction,
    TransactionStatus,
};
pub use grievance::{
    Communication, Escalation, Feedback, Grievance, GrievanceCategory, GrievanceStatus, Priority,
    Resolution, SlaStatus, MAX_ESCALATION_LEVEL,
};

/// User id recorded for transitions performed by background work.
pub const SYSTEM_ACTOR_ID: &str = "system";

/// The user performing a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&AuthenticatedUser> for Actor {
    fn from(user: &AuthenticatedUser) -> Self {
        Actor::new(user.user_id.clone(), user.role)
    }
}

/// A rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    // Beneficiary
    #[error("application cannot move from {from} to {to}")]
    InvalidApplicationTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },

    #[error("a rejection reason is required")]
    RejectionReasonRequired,

    #[error("applications are marked disbursed only by completing a fund disbursement")]
    DisbursementViaFundOnly,

    #[error("application cannot be edited while {0}")]
    NotEditable(ApplicationStatus),

    #[error("only the applicant's registrar can submit this application")]
    NotOwner,

    #[error("only an admin or scheme officer can review applications")]
    ReviewerRequired,

    #[error("beneficiary must be approved before funds can be sanctioned (currently {0})")]
    BeneficiaryNotApproved(ApplicationStatus),

    // Fund
    #[error("fund approval has already been decided ({0})")]
    ApprovalAlreadyDecided(ApprovalStatus),

    #[error("fund is not approved (approval is {0})")]
    NotApproved(ApprovalStatus),

    #[error("transaction is {actual}, expected {expected}")]
    InvalidTransactionState {
        expected: TransactionStatus,
        actual: TransactionStatus,
    },

    #[error("sanction validity expired at {0}")]
    SanctionExpired(DateTime<Utc>),

    #[error("retry limit of {max} attempts reached")]
    RetriesExhausted { max: u32 },

    #[error("transaction cannot be cancelled while {0}")]
    NotCancellable(TransactionStatus),

    // Grievance
    #[error("grievance cannot be assigned while {0}")]
    NotAssignable(GrievanceStatus),

    #[error("grievance is already {0}")]
    AlreadyResolved(GrievanceStatus),

    #[error("only the assigned officer or an admin can resolve this grievance")]
    NotAssignee,

    #[error("grievance cannot be escalated while {0}")]
    NotEscalatable(GrievanceStatus),

    #[error("grievance is already at the maximum escalation level {0}")]
    MaxEscalationReached(u8),

    #[error("grievance cannot be closed while {0}")]
    NotClosable(GrievanceStatus),

    #[error("grievance cannot be rejected while {0}")]
    NotRejectable(GrievanceStatus),

    #[error("grievance is {0} and no longer accepts messages")]
    ConversationClosed(GrievanceStatus),

    #[error("feedback can only be submitted once the grievance is resolved")]
    NotResolved,

    #[error("only the complainant can perform this action")]
    NotComplainant,

    #[error("feedback has already been submitted")]
    FeedbackAlreadySubmitted,
}

impl TransitionError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::InvalidApplicationTransition { .. } => "invalid_status_transition",
            TransitionError::RejectionReasonRequired => "rejection_reason_required",
            TransitionError::DisbursementViaFundOnly => "disbursement_via_fund_only",
            TransitionError::NotEditable(_) => "application_not_editable",
            TransitionError::NotOwner => "not_owner",
            TransitionError::ReviewerRequired => "reviewer_required",
            TransitionError::BeneficiaryNotApproved(_) => "beneficiary_not_approved",
            TransitionError::ApprovalAlreadyDecided(_) => "approval_already_decided",
            TransitionError::NotApproved(_) => "fund_not_approved",
            TransitionError::InvalidTransactionState { .. } => "invalid_transaction_state",
            TransitionError::SanctionExpired(_) => "sanction_expired",
            TransitionError::RetriesExhausted { .. } => "retries_exhausted",
            TransitionError::NotCancellable(_) => "not_cancellable",
            TransitionError::NotAssignable(_) => "grievance_not_assignable",
            TransitionError::AlreadyResolved(_) => "grievance_already_resolved",
            TransitionError::NotAssignee => "not_assignee",
            TransitionError::NotEscalatable(_) => "grievance_not_escalatable",
            TransitionError::MaxEscalationReached(_) => "max_escalation_reached",
            TransitionError::NotClosable(_) => "grievance_not_closable",
            TransitionError::NotRejectable(_) => "grievance_not_rejectable",
            TransitionError::ConversationClosed(_) => "grievance_closed",
            TransitionError::NotResolved => "grievance_not_resolved",
            TransitionError::NotComplainant => "not_complainant",
            TransitionError::FeedbackAlreadySubmitted => "feedback_already_submitted",
        }
    }

    /// Violations caused by who is acting rather than the record's state (HTTP 403).
    pub fn is_actor_violation(&self) -> bool {
        matches!(
            self,
            TransitionError::NotAssignee
                | TransitionError::NotComplainant
                | TransitionError::NotOwner
                | TransitionError::ReviewerRequired
        )
    }
}

/// `Display` for snake_case status enums, via their `as_str`.
macro_rules! display_as_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )+
    };
}

display_as_str!(
    ApplicationStatus,
    ApprovalStatus,
    TransactionStatus,
    GrievanceStatus,
    SlaStatus,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_violations_are_flagged() {
        assert!(TransitionError::NotAssignee.is_actor_violation());
        assert!(TransitionError::ReviewerRequired.is_actor_violation());
        assert!(!TransitionError::NotResolved.is_actor_violation());
        assert!(!TransitionError::RetriesExhausted { max: 3 }.is_actor_violation());
    }

    #[test]
    fn messages_name_the_states() {
        let err = TransitionError::InvalidTransactionState {
            expected: TransactionStatus::Pending,
            actual: TransactionStatus::Initiated,
        };
        assert_eq!(err.to_string(), "transaction is initiated, expected pending");
        assert_eq!(err.code(), "invalid_transaction_state");
    }
}
