// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Grievance tickets: assignment, resolution, escalation and SLA tracking.
//!
//! The SLA fields (`sla_status`, `is_overdue`) are derived from wall-clock
//! time and refreshed by [`Grievance::refresh_sla`] on every read and save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Actor, TransitionError};
use crate::auth::Role;

/// Escalation stops at this level.
pub const MAX_ESCALATION_LEVEL: u8 = 3;

/// Share of the SLA target (percent) after which a ticket is in `warning`.
const SLA_WARNING_PERCENT: i64 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrievanceCategory {
    PaymentDelay,
    PaymentNotReceived,
    DocumentIssue,
    ApplicationStatus,
    OfficerConduct,
    TechnicalIssue,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrievanceStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
    Rejected,
}

impl GrievanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GrievanceStatus::Open => "open",
            GrievanceStatus::InProgress => "in_progress",
            GrievanceStatus::Resolved => "resolved",
            GrievanceStatus::Closed => "closed",
            GrievanceStatus::Rejected => "rejected",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, GrievanceStatus::Open | GrievanceStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    Normal,
    Warning,
    Overdue,
    Completed,
}

impl SlaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlaStatus::Normal => "normal",
            SlaStatus::Warning => "warning",
            SlaStatus::Overdue => "overdue",
            SlaStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Assignment {
    pub assigned_to: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Resolution {
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    pub summary: String,
    pub action_taken: Option<String>,
    /// Hours from filing to resolution.
    pub resolution_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Escalation {
    pub level: u8,
    pub escalated_by: String,
    pub escalated_to: String,
    pub escalated_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Communication {
    pub id: String,
    pub author_id: String,
    pub author_role: Role,
    pub message: String,
    /// Staff-only note, hidden from the complainant.
    pub internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Feedback {
    /// 1 to 5.
    pub rating: u8,
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Grievance {
    pub id: String,
    /// `GRV-<yyyymmdd>-<seq>`, assigned on insert.
    pub ticket_number: String,
    pub beneficiary_id: Option<String>,
    pub subject: String,
    pub description: String,
    pub category: GrievanceCategory,
    pub priority: Priority,
    pub status: GrievanceStatus,
    /// The filing user; only they may leave feedback.
    pub complainant_id: String,
    pub assignment: Option<Assignment>,
    pub resolution: Option<Resolution>,
    pub escalation_level: u8,
    #[serde(default)]
    pub escalations: Vec<Escalation>,
    #[serde(default)]
    pub communications: Vec<Communication>,
    pub feedback: Option<Feedback>,
    pub target_resolution_hours: u32,
    pub sla_status: SlaStatus,
    pub is_overdue: bool,
    pub closed_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grievance {
    /// SLA classification at `now`.
    ///
    /// Elapsed time is compared in whole seconds against the target so the
    /// 80% boundary is exact.
    pub fn sla_status_at(&self, now: DateTime<Utc>) -> SlaStatus {
        if !self.status.is_active() {
            return SlaStatus::Completed;
        }
        let elapsed = (now - self.created_at).num_seconds().max(0);
        let target = i64::from(self.target_resolution_hours) * 3600;

        if elapsed > target {
            SlaStatus::Overdue
        } else if elapsed * 100 >= target * SLA_WARNING_PERCENT {
            SlaStatus::Warning
        } else {
            SlaStatus::Normal
        }
    }

    pub fn refresh_sla(&mut self, now: DateTime<Utc>) {
        self.sla_status = self.sla_status_at(now);
        self.is_overdue = self.sla_status == SlaStatus::Overdue;
    }

    pub fn assigned_to(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.assigned_to.as_str())
    }

    /// Complainant, current assignee, or staff.
    pub fn visible_to(&self, actor: &Actor) -> bool {
        actor.id == self.complainant_id
            || self.assigned_to() == Some(actor.id.as_str())
            || actor.role.is_staff()
    }

    pub fn assign(
        &mut self,
        assignee: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<GrievanceStatus, TransitionError> {
        if !self.status.is_active() {
            return Err(TransitionError::NotAssignable(self.status));
        }
        self.assignment = Some(Assignment {
            assigned_to: assignee.to_string(),
            assigned_by: actor.id.clone(),
            assigned_at: now,
        });
        self.status = GrievanceStatus::InProgress;
        self.updated_at = now;
        Ok(self.status)
    }

    pub fn resolve(
        &mut self,
        summary: String,
        action_taken: Option<String>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<GrievanceStatus, TransitionError> {
        if self.assigned_to() != Some(actor.id.as_str()) && !actor.is_admin() {
            return Err(TransitionError::NotAssignee);
        }
        if !self.status.is_active() {
            return Err(TransitionError::AlreadyResolved(self.status));
        }
        let elapsed = (now - self.created_at).num_seconds().max(0) as f64 / 3600.0;
        self.resolution = Some(Resolution {
            resolved_by: actor.id.clone(),
            resolved_at: now,
            summary,
            action_taken,
            resolution_hours: (elapsed * 100.0).round() / 100.0,
        });
        self.status = GrievanceStatus::Resolved;
        self.updated_at = now;
        Ok(self.status)
    }

    /// Raise the escalation level and hand the ticket to `escalate_to`.
    ///
    /// The status is left as it is.
    pub fn escalate(
        &mut self,
        escalate_to: &str,
        reason: String,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<u8, TransitionError> {
        if !self.status.is_active() {
            return Err(TransitionError::NotEscalatable(self.status));
        }
        if self.escalation_level >= MAX_ESCALATION_LEVEL {
            return Err(TransitionError::MaxEscalationReached(self.escalation_level));
        }
        self.escalation_level += 1;
        self.escalations.push(Escalation {
            level: self.escalation_level,
            escalated_by: actor.id.clone(),
            escalated_to: escalate_to.to_string(),
            escalated_at: now,
            reason,
        });
        self.assignment = Some(Assignment {
            assigned_to: escalate_to.to_string(),
            assigned_by: actor.id.clone(),
            assigned_at: now,
        });
        self.updated_at = now;
        Ok(self.escalation_level)
    }

    /// Close a resolved ticket. Beneficiaries may close only their own.
    pub fn close(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<GrievanceStatus, TransitionError> {
        if !actor.role.is_staff() && actor.id != self.complainant_id {
            return Err(TransitionError::NotComplainant);
        }
        if self.status != GrievanceStatus::Resolved {
            return Err(TransitionError::NotClosable(self.status));
        }
        self.status = GrievanceStatus::Closed;
        self.closed_by = Some(actor.id.clone());
        self.closed_at = Some(now);
        self.updated_at = now;
        Ok(self.status)
    }

    pub fn reject(
        &mut self,
        reason: String,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<GrievanceStatus, TransitionError> {
        if !self.status.is_active() {
            return Err(TransitionError::NotRejectable(self.status));
        }
        self.status = GrievanceStatus::Rejected;
        self.rejection_reason = Some(reason);
        self.closed_by = Some(actor.id.clone());
        self.closed_at = Some(now);
        self.updated_at = now;
        Ok(self.status)
    }

    /// Append a message. Internal notes are available to staff only.
    pub fn add_communication(
        &mut self,
        id: String,
        message: String,
        internal: bool,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<&Communication, TransitionError> {
        if matches!(self.status, GrievanceStatus::Closed | GrievanceStatus::Rejected) {
            return Err(TransitionError::ConversationClosed(self.status));
        }
        let index = self.communications.len();
        self.communications.push(Communication {
            id,
            author_id: actor.id.clone(),
            author_role: actor.role,
            message,
            internal: internal && actor.role.is_staff(),
            created_at: now,
        });
        self.updated_at = now;
        Ok(&self.communications[index])
    }

    /// Record complainant feedback on a resolved ticket. Allowed once.
    pub fn submit_feedback(
        &mut self,
        rating: u8,
        comment: Option<String>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != GrievanceStatus::Resolved {
            return Err(TransitionError::NotResolved);
        }
        if actor.id != self.complainant_id {
            return Err(TransitionError::NotComplainant);
        }
        if self.feedback.is_some() {
            return Err(TransitionError::FeedbackAlreadySubmitted);
        }
        self.feedback = Some(Feedback {
            rating,
            comment,
            submitted_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Drop staff-only notes for non-staff readers.
    pub fn redact_for(mut self, role: Role) -> Self {
        if !role.is_staff() {
            self.communications.retain(|c| !c.internal);
        }
        self
    }
}
