// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Beneficiary application endpoints.
//!
//! Field officers (and self-registered beneficiaries) create applications,
//! edit them while in draft or rejected, and submit them; reviewers move them
//! through review to approval or rejection.
//!
//! Aadhaar and bank details are encrypted before they reach storage. They
//! are decrypted in full only for the registrar and reviewers; every other
//! reader gets masked values.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use super::auth::validate_aadhaar;
use crate::audit_log;
use crate::auth::{
    Auth, AuthenticatedUser, OfficerRoles, Registrars, RequireRoles, ReviewerRoles, StaffRoles,
};
use crate::crypto::{mask_aadhaar, purpose, sha256_hex, FieldCipher};
use crate::domain::{
    Actor, Address, ApplicationStatus, BankDetails, Beneficiary, CaseDetails, Category, Document,
    DocumentType, FamilyMember, Gender, StatusChange,
};
use crate::error::ApiError;
use crate::response::{ApiResponse, PageQuery, PaginatedResponse};
use crate::state::AppState;
use crate::storage::{
    AuditEvent, AuditEventType, OwnershipCheck, OwnershipEnforcer, StoreError,
};

fn validate_mobile(mobile: &str) -> Result<(), ValidationError> {
    if mobile.len() == 10 && mobile.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("mobile").with_message("mobile number must be 10 digits".into()))
    }
}

fn validate_account_number(account: &str) -> Result<(), ValidationError> {
    if (9..=18).contains(&account.len()) && account.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("account_number")
            .with_message("account number must be 9 to 18 digits".into()))
    }
}

/// `AAAA0XXXXXX`: bank code, a zero, branch code.
fn validate_ifsc(ifsc: &str) -> Result<(), ValidationError> {
    let b = ifsc.as_bytes();
    let ok = b.len() == 11
        && b[..4].iter().all(u8::is_ascii_uppercase)
        && b[4] == b'0'
        && b[5..].iter().all(u8::is_ascii_alphanumeric);
    if ok {
        Ok(())
    } else {
        Err(ValidationError::new("ifsc").with_message("IFSC must look like ABCD0123456".into()))
    }
}

fn validate_date_of_birth(dob: &NaiveDate) -> Result<(), ValidationError> {
    if *dob < Utc::now().date_naive() {
        Ok(())
    } else {
        Err(ValidationError::new("date_of_birth")
            .with_message("date of birth must be in the past".into()))
    }
}

/// Bank account as submitted, before encryption.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct BankDetailsInput {
    #[validate(length(min = 2, max = 100, message = "account holder name is required"))]
    pub account_holder_name: String,
    #[validate(custom(function = "validate_account_number"))]
    pub account_number: String,
    #[validate(custom(function = "validate_ifsc"))]
    pub ifsc: String,
    #[validate(length(min = 2, max = 100, message = "bank name is required"))]
    pub bank_name: String,
    #[validate(length(max = 100))]
    pub branch_name: Option<String>,
}

impl BankDetailsInput {
    fn seal(self, cipher: &FieldCipher) -> Result<BankDetails, ApiError> {
        Ok(BankDetails {
            account_holder_name: self.account_holder_name.trim().to_string(),
            account_number: cipher.encrypt(purpose::BANK_ACCOUNT, &self.account_number)?,
            ifsc: cipher.encrypt(purpose::IFSC, &self.ifsc)?,
            bank_name: self.bank_name.trim().to_string(),
            branch_name: self.branch_name,
        })
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBeneficiaryRequest {
    #[validate(length(min = 2, max = 100, message = "full name must be 2 to 100 characters"))]
    pub full_name: String,
    #[validate(length(max = 100))]
    pub father_or_spouse_name: Option<String>,
    #[validate(custom(function = "validate_date_of_birth"))]
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub category: Category,
    #[validate(custom(function = "validate_mobile"))]
    pub mobile: String,
    #[validate(email(message = "email is invalid"))]
    pub email: Option<String>,
    #[validate(custom(function = "validate_aadhaar"))]
    pub aadhaar_number: String,
    #[validate(nested)]
    pub address: Address,
    #[validate(nested)]
    pub case_details: Option<CaseDetails>,
    #[validate(nested)]
    pub bank_details: Option<BankDetailsInput>,
    #[serde(default)]
    pub family_members: Vec<FamilyMember>,
    #[validate(length(max = 1000))]
    pub remarks: Option<String>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBeneficiaryRequest {
    #[validate(length(min = 2, max = 100, message = "full name must be 2 to 100 characters"))]
    pub full_name: Option<String>,
    #[validate(length(max = 100))]
    pub father_or_spouse_name: Option<String>,
    #[validate(custom(function = "validate_date_of_birth"))]
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub category: Option<Category>,
    #[validate(custom(function = "validate_mobile"))]
    pub mobile: Option<String>,
    #[validate(email(message = "email is invalid"))]
    pub email: Option<String>,
    #[validate(custom(function = "validate_aadhaar"))]
    pub aadhaar_number: Option<String>,
    #[validate(nested)]
    pub address: Option<Address>,
    #[validate(nested)]
    pub case_details: Option<CaseDetails>,
    #[validate(nested)]
    pub bank_details: Option<BankDetailsInput>,
    pub family_members: Option<Vec<FamilyMember>>,
    #[validate(length(max = 1000))]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub status: ApplicationStatus,
    /// Required when rejecting.
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UploadDocumentRequest {
    pub document_type: DocumentType,
    #[validate(length(min = 1, max = 255, message = "file name is required"))]
    pub file_name: String,
    #[validate(length(min = 1, max = 100, message = "MIME type is required"))]
    pub mime_type: String,
    /// File content, standard base64.
    #[validate(length(min = 1, message = "content is required"))]
    pub content_base64: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyDocumentRequest {
    pub verified: bool,
    pub remarks: Option<String>,
}

/// Filters for `GET /api/beneficiaries`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BeneficiaryFilter {
    pub status: Option<ApplicationStatus>,
    pub category: Option<Category>,
    pub district: Option<String>,
    /// Case-insensitive match on name or registration number.
    pub search: Option<String>,
}

impl BeneficiaryFilter {
    fn matches(&self, b: &Beneficiary) -> bool {
        let search = self.search.as_ref().map(|s| s.trim().to_lowercase());
        self.status.is_none_or(|s| s == b.application_status)
            && self.category.is_none_or(|c| c == b.category)
            && self
                .district
                .as_ref()
                .is_none_or(|d| d.eq_ignore_ascii_case(&b.address.district))
            && search.is_none_or(|s| {
                b.full_name.to_lowercase().contains(&s)
                    || b.registration_number.to_lowercase().contains(&s)
            })
    }
}

/// Bank account as shown to a reader.
#[derive(Debug, Serialize, ToSchema)]
pub struct BankDetailsView {
    pub account_holder_name: String,
    pub account_number: String,
    pub ifsc: String,
    pub bank_name: String,
    pub branch_name: Option<String>,
}

/// An application as returned by the API.
#[derive(Debug, Serialize, ToSchema)]
pub struct BeneficiaryResponse {
    pub id: String,
    pub registration_number: String,
    pub full_name: String,
    pub father_or_spouse_name: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub category: Category,
    pub mobile: String,
    pub email: Option<String>,
    /// Full number, or `XXXX-XXXX-1234` when `masked`.
    pub aadhaar_number: String,
    pub masked: bool,
    pub address: Address,
    pub case_details: Option<CaseDetails>,
    pub bank_details: Option<BankDetailsView>,
    pub documents: Vec<Document>,
    pub family_members: Vec<FamilyMember>,
    pub application_status: ApplicationStatus,
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

fn mask_tail(value: &str) -> String {
    let keep = value.chars().count().saturating_sub(4);
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < keep { 'X' } else { c })
        .collect()
}

impl BeneficiaryResponse {
    /// Decrypt the sensitive fields, masking them unless `full` is set.
    ///
    /// # Errors
    /// A ciphertext that fails to open is returned as an error, never skipped.
    pub fn build(b: Beneficiary, cipher: &FieldCipher, full: bool) -> Result<Self, ApiError> {
        let aadhaar = cipher.decrypt(purpose::AADHAAR, &b.aadhaar)?;
        let bank_details = match b.bank_details {
            Some(bank) => {
                let account = cipher.decrypt(purpose::BANK_ACCOUNT, &bank.account_number)?;
                let ifsc = cipher.decrypt(purpose::IFSC, &bank.ifsc)?;
                Some(BankDetailsView {
                    account_holder_name: bank.account_holder_name,
                    account_number: if full { account } else { mask_tail(&account) },
                    ifsc,
                    bank_name: bank.bank_name,
                    branch_name: bank.branch_name,
                })
            }
            None => None,
        };

        Ok(Self {
            aadhaar_number: if full { aadhaar } else { mask_aadhaar(&aadhaar) },
            masked: !full,
            bank_details,
            id: b.id,
            registration_number: b.registration_number,
            full_name: b.full_name,
            father_or_spouse_name: b.father_or_spouse_name,
            date_of_birth: b.date_of_birth,
            gender: b.gender,
            category: b.category,
            mobile: b.mobile,
            email: b.email,
            address: b.address,
            case_details: b.case_details,
            documents: b.documents,
            family_members: b.family_members,
            application_status: b.application_status,
            status_history: b.status_history,
            submitted_at: b.submitted_at,
            reviewed_by: b.reviewed_by,
            review_date: b.review_date,
            approved_by: b.approved_by,
            approval_date: b.approval_date,
            disbursed_by: b.disbursed_by,
            disbursement_date: b.disbursement_date,
            rejection_reason: b.rejection_reason,
            remarks: b.remarks,
            created_by: b.created_by,
            created_at: b.created_at,
            updated_at: b.updated_at,
        })
    }
}

/// List entry without sensitive fields.
#[derive(Debug, Serialize, ToSchema)]
pub struct BeneficiarySummary {
    pub id: String,
    pub registration_number: String,
    pub full_name: String,
    pub category: Category,
    pub district: String,
    pub application_status: ApplicationStatus,
    pub document_count: usize,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<Beneficiary> for BeneficiarySummary {
    fn from(b: Beneficiary) -> Self {
        Self {
            document_count: b.documents.len(),
            id: b.id,
            registration_number: b.registration_number,
            full_name: b.full_name,
            category: b.category,
            district: b.address.district,
            application_status: b.application_status,
            created_by: b.created_by,
            created_at: b.created_at,
        }
    }
}

/// Whether `user` sees decrypted identifiers on this record.
fn sees_full_details(b: &Beneficiary, user: &AuthenticatedUser) -> bool {
    b.created_by == user.user_id || user.role.is_in::<ReviewerRoles>()
}

fn respond(
    state: &AppState,
    b: Beneficiary,
    user: &AuthenticatedUser,
) -> Result<BeneficiaryResponse, ApiError> {
    let full = sees_full_details(&b, user);
    BeneficiaryResponse::build(b, &state.cipher, full)
}

/// Load a record the caller may read.
fn load_visible(state: &AppState, id: &str, user: &AuthenticatedUser) -> Result<Beneficiary, ApiError> {
    Ok(state.beneficiaries().get(id).accessible_by::<StaffRoles>(user)?)
}

/// Keep only the final path component and a conservative character set.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Create a draft application.
#[utoipa::path(
    post,
    path = "/api/beneficiaries",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    request_body = CreateBeneficiaryRequest,
    responses(
        (status = 201, description = "Application created", body = ApiResponse<BeneficiaryResponse>),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Role cannot register beneficiaries"),
        (status = 409, description = "Aadhaar or mobile already registered")
    )
)]
pub async fn create_beneficiary(
    RequireRoles(user, _): RequireRoles<Registrars>,
    State(state): State<AppState>,
    Json(request): Json<CreateBeneficiaryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BeneficiaryResponse>>), ApiError> {
    request.validate()?;
    let now = Utc::now();
    let cipher = &state.cipher;

    let beneficiary = Beneficiary {
        id: uuid::Uuid::new_v4().to_string(),
        registration_number: String::new(),
        full_name: request.full_name.trim().to_string(),
        father_or_spouse_name: request.father_or_spouse_name,
        date_of_birth: request.date_of_birth,
        gender: request.gender,
        category: request.category,
        mobile: request.mobile,
        email: request.email.map(|e| e.trim().to_lowercase()),
        aadhaar: cipher.encrypt(purpose::AADHAAR, &request.aadhaar_number)?,
        aadhaar_digest: cipher.hash(&request.aadhaar_number),
        address: request.address,
        case_details: request.case_details,
        bank_details: request.bank_details.map(|b| b.seal(cipher)).transpose()?,
        documents: Vec::new(),
        family_members: request.family_members,
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
        remarks: request.remarks,
        created_by: user.user_id.clone(),
        created_at: now,
        updated_at: now,
    };

    let created = state.beneficiaries().create(beneficiary)?;

    tracing::info!(
        beneficiary_id = %created.id,
        registration_number = %created.registration_number,
        user_id = %user.user_id,
        "Beneficiary created"
    );
    audit_log!(&state.files, AuditEventType::BeneficiaryCreated, user, "beneficiary", &created.id);

    Ok(ApiResponse::created("Beneficiary created", respond(&state, created, &user)?))
}

/// List applications visible to the caller, newest first.
///
/// Staff see every application; other users see the ones they registered.
#[utoipa::path(
    get,
    path = "/api/beneficiaries",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(BeneficiaryFilter, PageQuery),
    responses(
        (status = 200, description = "Applications", body = PaginatedResponse<BeneficiarySummary>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_beneficiaries(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(filter): Query<BeneficiaryFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PaginatedResponse<BeneficiarySummary>>, ApiError> {
    let items: Vec<BeneficiarySummary> = state
        .beneficiaries()
        .list()?
        .into_iter()
        .filter(|b| b.visible_to(&user.user_id, user.role))
        .filter(|b| filter.matches(b))
        .map(BeneficiarySummary::from)
        .collect();

    Ok(PaginatedResponse::from_items("Beneficiaries retrieved", items, &page))
}

/// Get one application.
#[utoipa::path(
    get,
    path = "/api/beneficiaries/{beneficiary_id}",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(("beneficiary_id" = String, Path, description = "Beneficiary ID")),
    responses(
        (status = 200, description = "Application", body = ApiResponse<BeneficiaryResponse>),
        (status = 403, description = "Not your application"),
        (status = 404, description = "Beneficiary not found")
    )
)]
pub async fn get_beneficiary(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
) -> Result<Json<ApiResponse<BeneficiaryResponse>>, ApiError> {
    let beneficiary = load_visible(&state, &beneficiary_id, &user)?;

    if sees_full_details(&beneficiary, &user) {
        audit_log!(
            &state.files,
            AuditEventType::SensitiveDataAccessed,
            user,
            "beneficiary",
            &beneficiary_id
        );
    }

    Ok(ApiResponse::ok("Beneficiary retrieved", respond(&state, beneficiary, &user)?))
}

/// Edit an application while it is a draft or rejected.
#[utoipa::path(
    put,
    path = "/api/beneficiaries/{beneficiary_id}",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(("beneficiary_id" = String, Path, description = "Beneficiary ID")),
    request_body = UpdateBeneficiaryRequest,
    responses(
        (status = 200, description = "Application updated", body = ApiResponse<BeneficiaryResponse>),
        (status = 400, description = "Invalid input or not editable"),
        (status = 403, description = "Not your application"),
        (status = 404, description = "Beneficiary not found"),
        (status = 409, description = "Aadhaar or mobile already registered")
    )
)]
pub async fn update_beneficiary(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    Json(request): Json<UpdateBeneficiaryRequest>,
) -> Result<Json<ApiResponse<BeneficiaryResponse>>, ApiError> {
    request.validate()?;
    let cipher = &state.cipher;

    // Encrypt outside the write transaction
    let aadhaar = match &request.aadhaar_number {
        Some(number) => Some((cipher.encrypt(purpose::AADHAAR, number)?, cipher.hash(number))),
        None => None,
    };
    let bank_details = request.bank_details.map(|b| b.seal(cipher)).transpose()?;

    let (updated, ()) = state.beneficiaries().update(&beneficiary_id, |b| {
        if !user.is_admin() {
            b.verify_ownership(&user)?;
        }
        b.ensure_editable()?;

        if let Some(v) = request.full_name {
            b.full_name = v.trim().to_string();
        }
        if let Some(v) = request.father_or_spouse_name {
            b.father_or_spouse_name = Some(v);
        }
        if let Some(v) = request.date_of_birth {
            b.date_of_birth = v;
        }
        if let Some(v) = request.gender {
            b.gender = v;
        }
        if let Some(v) = request.category {
            b.category = v;
        }
        if let Some(v) = request.mobile {
            b.mobile = v;
        }
        if let Some(v) = request.email {
            b.email = Some(v.trim().to_lowercase());
        }
        if let Some((sealed, digest)) = aadhaar {
            b.aadhaar = sealed;
            b.aadhaar_digest = digest;
        }
        if let Some(v) = request.address {
            b.address = v;
        }
        if let Some(v) = request.case_details {
            b.case_details = Some(v);
        }
        if let Some(v) = bank_details {
            b.bank_details = Some(v);
        }
        if let Some(v) = request.family_members {
            b.family_members = v;
        }
        if let Some(v) = request.remarks {
            b.remarks = Some(v);
        }
        Ok(())
    })?;

    tracing::info!(beneficiary_id = %updated.id, user_id = %user.user_id, "Beneficiary updated");
    audit_log!(&state.files, AuditEventType::BeneficiaryUpdated, user, "beneficiary", &updated.id);

    Ok(ApiResponse::ok("Beneficiary updated", respond(&state, updated, &user)?))
}

/// Delete a draft application and its uploaded documents.
#[utoipa::path(
    delete,
    path = "/api/beneficiaries/{beneficiary_id}",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(("beneficiary_id" = String, Path, description = "Beneficiary ID")),
    responses(
        (status = 200, description = "Application deleted"),
        (status = 400, description = "Only drafts can be deleted"),
        (status = 403, description = "Not your application"),
        (status = 404, description = "Beneficiary not found")
    )
)]
pub async fn delete_beneficiary(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.beneficiaries().delete(&beneficiary_id, |b| {
        if !user.is_admin() {
            b.verify_ownership(&user)?;
        }
        if b.application_status != ApplicationStatus::Draft {
            return Err(StoreError::Conflict(format!(
                "Only draft applications can be deleted (currently {})",
                b.application_status
            )));
        }
        Ok(())
    })?;

    if let Err(e) = state
        .files
        .delete_dir(state.files.paths().beneficiary_uploads(&beneficiary_id))
    {
        tracing::warn!(beneficiary_id = %beneficiary_id, error = %e, "Failed to remove uploaded documents");
    }

    tracing::info!(beneficiary_id = %beneficiary_id, user_id = %user.user_id, "Beneficiary deleted");
    audit_log!(&state.files, AuditEventType::BeneficiaryDeleted, user, "beneficiary", &beneficiary_id);

    Ok(ApiResponse::ok("Beneficiary deleted", ()))
}

/// Move an application to a new status.
///
/// The registrar submits; reviewers move it to review, approval or
/// rejection. `disbursed` is reached only through fund completion.
#[utoipa::path(
    put,
    path = "/api/beneficiaries/{beneficiary_id}/status",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(("beneficiary_id" = String, Path, description = "Beneficiary ID")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<BeneficiaryResponse>),
        (status = 400, description = "Transition not allowed"),
        (status = 403, description = "Role may not perform this transition"),
        (status = 404, description = "Beneficiary not found")
    )
)]
pub async fn update_status(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<ApiResponse<BeneficiaryResponse>>, ApiError> {
    let actor = Actor::from(&user);
    let now = Utc::now();

    let (updated, from) = state.beneficiaries().update(&beneficiary_id, |b| {
        b.verify_access::<StaffRoles>(&user)?;
        let from = b.application_status;
        b.apply_status(request.status, &actor, request.remarks, now)?;
        Ok(from)
    })?;

    tracing::info!(
        beneficiary_id = %updated.id,
        from = %from,
        to = %updated.application_status,
        user_id = %user.user_id,
        "Beneficiary status changed"
    );
    audit_log!(@write &state.files, AuditEvent::new(AuditEventType::BeneficiaryStatusChanged)
        .with_user(&user.user_id)
        .with_role(user.role)
        .with_resource("beneficiary", &updated.id)
        .with_details(serde_json::json!({
            "from": from,
            "to": updated.application_status,
        })));

    Ok(ApiResponse::ok("Status updated", respond(&state, updated, &user)?))
}

/// Attach a document to an editable application.
///
/// The body carries the file as base64; its MIME type must be on the
/// configured allow-list and its size within the configured cap.
#[utoipa::path(
    post,
    path = "/api/beneficiaries/{beneficiary_id}/documents",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(("beneficiary_id" = String, Path, description = "Beneficiary ID")),
    request_body = UploadDocumentRequest,
    responses(
        (status = 201, description = "Document stored", body = ApiResponse<Document>),
        (status = 400, description = "Invalid content or application not editable"),
        (status = 403, description = "Not your application"),
        (status = 413, description = "File too large"),
        (status = 415, description = "MIME type not allowed")
    )
)]
pub async fn upload_document(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
    Json(request): Json<UploadDocumentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Document>>), ApiError> {
    request.validate()?;

    let mime_type = request.mime_type.trim().to_ascii_lowercase();
    if !state.config.upload_allowed_mime.contains(&mime_type) {
        return Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            format!("{mime_type} uploads are not accepted"),
        ));
    }

    let content = Base64::decode_vec(request.content_base64.trim())
        .map_err(|_| ApiError::bad_request("content_base64 is not valid base64").with_code("invalid_content"))?;
    if content.is_empty() {
        return Err(ApiError::bad_request("Document is empty").with_code("invalid_content"));
    }
    if content.len() > state.config.upload_max_bytes {
        return Err(ApiError::payload_too_large(format!(
            "Document exceeds the {} byte limit",
            state.config.upload_max_bytes
        )));
    }

    // Check access before touching the disk
    let existing = state.beneficiaries().get(&beneficiary_id)?;
    if !user.is_admin() {
        existing.verify_ownership(&user)?;
    }
    existing.ensure_editable()?;

    let document_id = uuid::Uuid::new_v4().to_string();
    let file_name = sanitize_file_name(&request.file_name);
    let storage_key = format!("{document_id}-{file_name}");
    let path = state.files.paths().document(&beneficiary_id, &storage_key);
    state.files.write_raw(&path, &content)?;

    let document = Document {
        id: document_id,
        document_type: request.document_type,
        file_name,
        mime_type,
        size_bytes: content.len() as u64,
        sha256: sha256_hex(&content),
        storage_key,
        uploaded_by: user.user_id.clone(),
        uploaded_at: Utc::now(),
        verified: false,
        verified_by: None,
        verified_at: None,
        verification_remarks: None,
    };

    let stored = document.clone();
    let result = state.beneficiaries().update(&beneficiary_id, move |b| {
        b.ensure_editable()?;
        b.documents.push(stored);
        Ok(())
    });
    if let Err(e) = result {
        if let Err(cleanup) = state.files.delete(&path) {
            tracing::warn!(error = %cleanup, "Failed to remove orphaned upload");
        }
        return Err(e.into());
    }

    tracing::info!(
        beneficiary_id = %beneficiary_id,
        document_id = %document.id,
        size_bytes = document.size_bytes,
        "Document uploaded"
    );
    audit_log!(@write &state.files, AuditEvent::new(AuditEventType::DocumentUploaded)
        .with_user(&user.user_id)
        .with_role(user.role)
        .with_resource("beneficiary", &beneficiary_id)
        .with_details(serde_json::json!({
            "document_id": document.id,
            "document_type": document.document_type,
            "sha256": document.sha256,
        })));

    Ok(ApiResponse::created("Document uploaded", document))
}

/// Download a stored document.
#[utoipa::path(
    get,
    path = "/api/beneficiaries/{beneficiary_id}/documents/{document_id}",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(
        ("beneficiary_id" = String, Path, description = "Beneficiary ID"),
        ("document_id" = String, Path, description = "Document ID")
    ),
    responses(
        (status = 200, description = "Document content"),
        (status = 403, description = "Not your application"),
        (status = 404, description = "Document not found")
    )
)]
pub async fn download_document(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path((beneficiary_id, document_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let beneficiary = load_visible(&state, &beneficiary_id, &user)?;
    let document = beneficiary
        .document(&document_id)
        .ok_or_else(|| ApiError::not_found("Document not found"))?;

    let content = state
        .files
        .read_raw(state.files.paths().document(&beneficiary_id, &document.storage_key))?;
    if sha256_hex(&content) != document.sha256 {
        return Err(ApiError::internal(format!(
            "stored document {document_id} failed its checksum"
        )));
    }

    audit_log!(&state.files, AuditEventType::SensitiveDataAccessed, user, "document", &document_id);

    Ok((
        [
            (header::CONTENT_TYPE, document.mime_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.file_name),
            ),
        ],
        content,
    ))
}

/// Record a verification decision on a document.
#[utoipa::path(
    put,
    path = "/api/beneficiaries/{beneficiary_id}/documents/{document_id}/verify",
    tag = "Beneficiaries",
    security(("bearer_auth" = [])),
    params(
        ("beneficiary_id" = String, Path, description = "Beneficiary ID"),
        ("document_id" = String, Path, description = "Document ID")
    ),
    request_body = VerifyDocumentRequest,
    responses(
        (status = 200, description = "Verification recorded", body = ApiResponse<Document>),
        (status = 403, description = "Officer role required"),
        (status = 404, description = "Document not found")
    )
)]
pub async fn verify_document(
    RequireRoles(user, _): RequireRoles<OfficerRoles>,
    State(state): State<AppState>,
    Path((beneficiary_id, document_id)): Path<(String, String)>,
    Json(request): Json<VerifyDocumentRequest>,
) -> Result<Json<ApiResponse<Document>>, ApiError> {
    let actor = Actor::from(&user);
    let now = Utc::now();

    let (_, document) = state.beneficiaries().update(&beneficiary_id, |b| {
        b.verify_document(&document_id, &actor, request.verified, request.remarks, now)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("Document".to_string()))
    })?;

    tracing::info!(
        beneficiary_id = %beneficiary_id,
        document_id = %document_id,
        verified = document.verified,
        user_id = %user.user_id,
        "Document verification recorded"
    );
    audit_log!(@write &state.files, AuditEvent::new(AuditEventType::DocumentVerified)
        .with_user(&user.user_id)
        .with_role(user.role)
        .with_resource("beneficiary", &beneficiary_id)
        .with_details(serde_json::json!({
            "document_id": document_id,
            "verified": document.verified,
        })));

    Ok(ApiResponse::ok("Document verification recorded", document))
}
