// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Beneficiary application record and its status lifecycle.
//!
//! ## Transitions
//!
//! ```text
//! draft ──► submitted ──► under_review ──► approved ──► disbursed
//!               │   ▲           │                        (fund completion only)
//!               ▼   │           ▼
//!             rejected ◄────────┘
//! ```
//!
//! Every transition records a [`StatusChange`] and stamps the milestone that
//! matches the target: review (`under_review`, `rejected`), approval or
//! disbursement.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use super::{Actor, TransitionError};
use crate::auth::{ReviewerRoles, Role};
use crate::crypto::SealedField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Disbursed,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 6] = [
        ApplicationStatus::Draft,
        ApplicationStatus::Submitted,
        ApplicationStatus::UnderReview,
        ApplicationStatus::Approved,
        ApplicationStatus::Rejected,
        ApplicationStatus::Disbursed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Disbursed => "disbursed",
        }
    }

    /// The transition table.
    pub fn can_transition_to(self, to: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, to),
            (Draft, Submitted)
                | (Submitted, UnderReview)
                | (Submitted, Rejected)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Rejected, Submitted)
                | (Approved, Disbursed)
        )
    }

    pub fn next(self, to: ApplicationStatus) -> Result<ApplicationStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError::InvalidApplicationTransition { from: self, to })
        }
    }

    /// Profile fields may be changed only before submission or after rejection.
    pub fn is_editable(self) -> bool {
        matches!(self, ApplicationStatus::Draft | ApplicationStatus::Rejected)
    }

    /// The milestone stamped when entering this status.
    pub fn milestone(self) -> Option<Milestone> {
        match self {
            ApplicationStatus::UnderReview | ApplicationStatus::Rejected => Some(Milestone::Review),
            ApplicationStatus::Approved => Some(Milestone::Approval),
            ApplicationStatus::Disbursed => Some(Milestone::Disbursement),
            ApplicationStatus::Draft | ApplicationStatus::Submitted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Review,
    Approval,
    Disbursement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Social category of the applicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sc,
    St,
    Obc,
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 200, message = "address line is required"))]
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100, message = "city or village is required"))]
    pub city_or_village: String,
    #[validate(length(min = 1, max = 100, message = "district is required"))]
    pub district: String,
    #[validate(length(min = 1, max = 100, message = "state is required"))]
    pub state: String,
    #[validate(custom(function = "validate_pincode"))]
    pub pincode: String,
}

fn validate_pincode(pincode: &str) -> Result<(), ValidationError> {
    if pincode.len() == 6 && pincode.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("pincode").with_message("pincode must be 6 digits".into()))
    }
}

/// Details of the incident the relief is claimed for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct CaseDetails {
    #[validate(length(max = 50))]
    pub fir_number: Option<String>,
    #[validate(length(max = 100))]
    pub police_station: Option<String>,
    pub incident_date: Option<NaiveDate>,
    #[serde(default)]
    pub offence_sections: Vec<String>,
    #[validate(length(max = 50))]
    pub court_case_number: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

/// Bank account, encrypted at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_holder_name: String,
    pub account_number: SealedField,
    pub ifsc: SealedField,
    pub bank_name: String,
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    AadhaarCard,
    CasteCertificate,
    FirCopy,
    BankPassbook,
    MedicalReport,
    Photograph,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: String,
    pub document_type: DocumentType,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the stored content.
    pub sha256: String,
    /// Path relative to the upload directory.
    pub storage_key: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub verified: bool,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FamilyMember {
    pub name: String,
    pub relationship: String,
    pub age: Option<u8>,
    pub occupation: Option<String>,
    #[serde(default)]
    pub dependent: bool,
}

/// One entry of the application's status trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusChange {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: String,
    /// `DBT-<year>-<seq>`, assigned on insert.
    pub registration_number: String,
    pub full_name: String,
    pub father_or_spouse_name: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub category: Category,
    pub mobile: String,
    pub email: Option<String>,
    pub aadhaar: SealedField,
    /// Keyed digest of the Aadhaar number, used by the uniqueness index.
    pub aadhaar_digest: String,
    pub address: Address,
    pub case_details: Option<CaseDetails>,
    pub bank_details: Option<BankDetails>,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub family_members: Vec<FamilyMember>,
    pub application_status: ApplicationStatus,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub review_date: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approval_date: Option<DateTime<Utc>>,
    pub disbursed_by: Option<String>,
    pub disbursement_date: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub remarks: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Beneficiary {
    /// Move the application to `to` on behalf of `actor`.
    ///
    /// `disbursed` is refused here; see [`Beneficiary::mark_disbursed`].
    pub fn apply_status(
        &mut self,
        to: ApplicationStatus,
        actor: &Actor,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApplicationStatus, TransitionError> {
        match to {
            ApplicationStatus::Disbursed => return Err(TransitionError::DisbursementViaFundOnly),
            ApplicationStatus::Submitted => {
                if actor.id != self.created_by && !actor.is_admin() {
                    return Err(TransitionError::NotOwner);
                }
            }
            ApplicationStatus::UnderReview
            | ApplicationStatus::Approved
            | ApplicationStatus::Rejected => {
                if !actor.role.is_in::<ReviewerRoles>() {
                    return Err(TransitionError::ReviewerRequired);
                }
            }
            ApplicationStatus::Draft => {}
        }

        let next = self.application_status.next(to)?;
        let remarks = remarks
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        if next == ApplicationStatus::Rejected && remarks.is_none() {
            return Err(TransitionError::RejectionReasonRequired);
        }

        self.record(next, actor, remarks, now);
        Ok(next)
    }

    /// Mark an approved application as paid out. Called by fund completion.
    pub fn mark_disbursed(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let next = self.application_status.next(ApplicationStatus::Disbursed)?;
        self.record(next, actor, None, now);
        Ok(())
    }

    fn record(
        &mut self,
        to: ApplicationStatus,
        actor: &Actor,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status_history.push(StatusChange {
            from: self.application_status,
            to,
            changed_by: actor.id.clone(),
            changed_at: now,
            remarks: remarks.clone(),
        });
        self.application_status = to;

        match to.milestone() {
            Some(Milestone::Review) => {
                self.reviewed_by = Some(actor.id.clone());
                self.review_date = Some(now);
            }
            Some(Milestone::Approval) => {
                self.approved_by = Some(actor.id.clone());
                self.approval_date = Some(now);
            }
            Some(Milestone::Disbursement) => {
                self.disbursed_by = Some(actor.id.clone());
                self.disbursement_date = Some(now);
            }
            None => {}
        }

        match to {
            ApplicationStatus::Rejected => self.rejection_reason = remarks,
            ApplicationStatus::Submitted => {
                self.submitted_at = Some(now);
                self.rejection_reason = None;
            }
            _ => {
                if remarks.is_some() {
                    self.remarks = remarks;
                }
            }
        }
        self.updated_at = now;
    }

    pub fn ensure_editable(&self) -> Result<(), TransitionError> {
        if self.application_status.is_editable() {
            Ok(())
        } else {
            Err(TransitionError::NotEditable(self.application_status))
        }
    }

    pub fn document(&self, document_id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == document_id)
    }

    /// Record a verification decision on an uploaded document.
    ///
    /// Returns `None` when no document has that id.
    pub fn verify_document(
        &mut self,
        document_id: &str,
        actor: &Actor,
        verified: bool,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<&Document> {
        let document = self.documents.iter_mut().find(|d| d.id == document_id)?;
        document.verified = verified;
        document.verified_by = Some(actor.id.clone());
        document.verified_at = Some(now);
        document.verification_remarks = remarks;
        self.updated_at = now;
        Some(document)
    }

    /// Who may read the record: its registrar, or any role in `StaffRoles`.
    pub fn visible_to(&self, user_id: &str, role: Role) -> bool {
        self.created_by == user_id || role.is_in::<crate::auth::StaffRoles>()
    }

    /// The `(who, when)` pair stamped for a milestone.
    pub fn milestone_stamp(&self, milestone: Milestone) -> (Option<&str>, Option<DateTime<Utc>>) {
        match milestone {
            Milestone::Review => (self.reviewed_by.as_deref(), self.review_date),
            Milestone::Approval => (self.approved_by.as_deref(), self.approval_date),
            Milestone::Disbursement => (self.disbursed_by.as_deref(), self.disbursement_date),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample(created_by: &str) -> Beneficiary {
        let now = Utc::now();
        Beneficiary {
            id: "ben-1".to_string(),
            registration_number: "DBT-2026-000001".to_string(),
            full_name: "Sunita Devi".to_string(),
            father_or_spouse_name: None,
            date_of_birth: NaiveDate::from_ymd_opt(1988, 4, 12).unwrap(),
            gender: Gender::Female,
            category: Category::Sc,
            mobile: "9876543210".to_string(),
            email: None,
            aadhaar: crate::crypto::FieldCipher::new("test")
                .unwrap()
                .encrypt(crate::crypto::purpose::AADHAAR, "123456789012")
                .unwrap(),
            aadhaar_digest: "digest".to_string(),
            address: Address {
                line1: "Ward 4".to_string(),
                line2: None,
                city_or_village: "Rampur".to_string(),
                district: "Sitapur".to_string(),
                state: "Uttar Pradesh".to_string(),
                pincode: "261001".to_string(),
            },
            case_details: None,
            bank_details: None,
            documents: Vec::new(),
            family_members: Vec::new(),
            application_status: ApplicationStatus::Draft,
            status_history: Vec::new(),
            submitted_at: None,
            reviewed_by: None,
            review_date: None,
            approved_by: None,
            approval_date: None,
            disbursed_by: None,
            disbursement_date: None,
            rejection_reason: None,
            remarks: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn officer() -> Actor {
        Actor::new("officer-1", Role::SchemeOfficer)
    }

    fn registrar() -> Actor {
        Actor::new("field-1", Role::FieldOfficer)
    }

    const MILESTONES: [Milestone; 3] = [
        Milestone::Review,
        Milestone::Approval,
        Milestone::Disbursement,
    ];

    fn stamps(b: &Beneficiary) -> Vec<(Option<String>, Option<DateTime<Utc>>)> {
        MILESTONES
            .iter()
            .map(|m| {
                let (who, when) = b.milestone_stamp(*m);
                (who.map(str::to_string), when)
            })
            .collect()
    }

    #[test]
    fn transition_table_is_strict() {
        use ApplicationStatus::*;
        let allowed = [
            (Draft, Submitted),
            (Submitted, UnderReview),
            (Submitted, Rejected),
            (UnderReview, Approved),
            (UnderReview, Rejected),
            (Rejected, Submitted),
            (Approved, Disbursed),
        ];
        for from in ApplicationStatus::ALL {
            for to in ApplicationStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn each_transition_stamps_exactly_its_milestone() {
        let mut b = sample("field-1");
        let mut now = Utc::now();

        let steps = [
            (ApplicationStatus::Submitted, registrar(), None),
            (ApplicationStatus::UnderReview, officer(), None),
            (ApplicationStatus::Approved, officer(), Some("eligible".to_string())),
        ];

        for (to, actor, remarks) in steps {
            now += Duration::minutes(5);
            let before = stamps(&b);
            b.apply_status(to, &actor, remarks, now).unwrap();
            let after = stamps(&b);

            for (i, milestone) in MILESTONES.iter().enumerate() {
                if to.milestone() == Some(*milestone) {
                    assert_eq!(after[i], (Some(actor.id.clone()), Some(now)));
                } else {
                    assert_eq!(after[i], before[i], "{to} touched {milestone:?}");
                }
            }
        }

        now += Duration::minutes(5);
        let before = stamps(&b);
        b.mark_disbursed(&officer(), now).unwrap();
        let after = stamps(&b);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[1]);
        assert_eq!(after[2], (Some("officer-1".to_string()), Some(now)));
        assert_eq!(b.status_history.len(), 4);
    }

    #[test]
    fn rejection_requires_reason_and_allows_resubmission() {
        let mut b = sample("field-1");
        let now = Utc::now();
        b.apply_status(ApplicationStatus::Submitted, &registrar(), None, now)
            .unwrap();

        let err = b
            .apply_status(ApplicationStatus::Rejected, &officer(), Some("  ".into()), now)
            .unwrap_err();
        assert_eq!(err, TransitionError::RejectionReasonRequired);
        assert_eq!(b.application_status, ApplicationStatus::Submitted);

        b.apply_status(
            ApplicationStatus::Rejected,
            &officer(),
            Some("bank proof missing".into()),
            now,
        )
        .unwrap();
        assert_eq!(b.rejection_reason.as_deref(), Some("bank proof missing"));
        assert_eq!(b.reviewed_by.as_deref(), Some("officer-1"));
        assert!(b.ensure_editable().is_ok());

        b.apply_status(ApplicationStatus::Submitted, &registrar(), None, now)
            .unwrap();
        assert!(b.rejection_reason.is_none());
    }

    #[test]
    fn disbursed_only_via_fund_completion() {
        let mut b = sample("field-1");
        b.application_status = ApplicationStatus::Approved;
        let err = b
            .apply_status(ApplicationStatus::Disbursed, &officer(), None, Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::DisbursementViaFundOnly);

        let mut draft = sample("field-1");
        let err = draft.mark_disbursed(&officer(), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidApplicationTransition { .. }));
    }

    #[test]
    fn actor_checks() {
        let mut b = sample("field-1");
        let stranger = Actor::new("someone-else", Role::FieldOfficer);
        assert_eq!(
            b.apply_status(ApplicationStatus::Submitted, &stranger, None, Utc::now()),
            Err(TransitionError::NotOwner)
        );

        b.apply_status(ApplicationStatus::Submitted, &registrar(), None, Utc::now())
            .unwrap();
        assert_eq!(
            b.apply_status(ApplicationStatus::UnderReview, &registrar(), None, Utc::now()),
            Err(TransitionError::ReviewerRequired)
        );
    }

    #[test]
    fn skipping_review_is_rejected() {
        let mut b = sample("field-1");
        b.application_status = ApplicationStatus::Submitted;
        let err = b
            .apply_status(ApplicationStatus::Approved, &officer(), None, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidApplicationTransition {
                from: ApplicationStatus::Submitted,
                to: ApplicationStatus::Approved
            }
        );
        assert!(b.ensure_editable().is_err());
    }

    #[test]
    fn verify_document_updates_entry() {
        let mut b = sample("field-1");
        b.documents.push(Document {
            id: "doc-1".to_string(),
            document_type: DocumentType::FirCopy,
            file_name: "fir.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 10,
            sha256: "00".to_string(),
            storage_key: "ben-1/doc-1.pdf".to_string(),
            uploaded_by: "field-1".to_string(),
            uploaded_at: Utc::now(),
            verified: false,
            verified_by: None,
            verified_at: None,
            verification_remarks: None,
        });

        let doc = b
            .verify_document("doc-1", &officer(), true, None, Utc::now())
            .unwrap();
        assert!(doc.verified);
        assert_eq!(doc.verified_by.as_deref(), Some("officer-1"));
        assert!(b
            .verify_document("missing", &officer(), true, None, Utc::now())
            .is_none());
    }
}
