// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fund sanction, approval and disbursement endpoints.
//!
//! Every action goes through [`FundRepository::apply`](crate::storage::FundRepository::apply),
//! which validates the transition and writes the fund and its side effects in
//! one transaction. Settlement itself happens in the background worker.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::audit_log;
use crate::auth::{Auth, AuthenticatedUser, FundViewers, RequireRoles, ReviewerRoles};
use crate::domain::{
    Actor, Amount, Approval, ApprovalStatus, Fund, FundEvent, Sanction, Transaction,
    TransactionStatus,
};
use crate::error::ApiError;
use crate::response::{ApiResponse, PageQuery, PaginatedResponse};
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType, StoreError};

fn validate_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount").with_message("amount must be greater than zero".into()))
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateFundRequest {
    #[validate(length(min = 1, message = "beneficiary_id is required"))]
    pub beneficiary_id: String,
    #[validate(length(min = 2, max = 50, message = "scheme code must be 2 to 50 characters"))]
    pub scheme_code: String,
    #[validate(length(min = 2, max = 200, message = "scheme name is required"))]
    pub scheme_name: String,
    #[schema(value_type = String, example = "82500.00")]
    #[validate(custom(function = "validate_positive"))]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 100, message = "sanction order number is required"))]
    pub sanction_order_number: String,
    pub sanction_order_date: NaiveDate,
    /// Defaults to now.
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: DateTime<Utc>,
    #[validate(length(max = 1000))]
    pub remarks: Option<String>,
}

/// Body for approve, reject and cancel.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct FundActionRequest {
    /// Approval remarks, or the reason for a rejection or cancellation.
    pub remarks: Option<String>,
}

/// Filters for `GET /api/funds`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FundFilter {
    pub beneficiary_id: Option<String>,
    pub scheme_code: Option<String>,
    pub approval_status: Option<ApprovalStatus>,
    pub transaction_status: Option<TransactionStatus>,
}

impl FundFilter {
    fn matches(&self, fund: &Fund) -> bool {
        self.beneficiary_id
            .as_ref()
            .is_none_or(|b| *b == fund.beneficiary_id)
            && self
                .scheme_code
                .as_ref()
                .is_none_or(|s| s.eq_ignore_ascii_case(&fund.scheme_code))
            && self.approval_status.is_none_or(|s| s == fund.approval.status)
            && self
                .transaction_status
                .is_none_or(|s| s == fund.transaction.status)
    }
}

/// Fund viewers see every fund; anyone else only funds of beneficiaries
/// they registered.
fn can_view(state: &AppState, fund: &Fund, user: &AuthenticatedUser) -> Result<bool, ApiError> {
    if user.role.is_in::<FundViewers>() {
        return Ok(true);
    }
    match state.beneficiaries().get(&fund.beneficiary_id) {
        Ok(b) => Ok(b.created_by == user.user_id),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Apply one event on behalf of `user` and audit the outcome.
fn transition(
    state: &AppState,
    user: &AuthenticatedUser,
    fund_id: &str,
    event: FundEvent,
    audit: AuditEventType,
) -> Result<Fund, ApiError> {
    let actor = Actor::from(user);
    let name = event.name();

    match state.funds().apply(fund_id, event, &actor, Utc::now()) {
        Ok(fund) => {
            tracing::info!(
                fund_id = %fund.id,
                event = name,
                approval = %fund.approval.status,
                transaction = %fund.transaction.status,
                version = fund.version,
                user_id = %user.user_id,
                "Fund transition applied"
            );
            audit_log!(@write &state.files, AuditEvent::new(audit)
                .with_user(&user.user_id)
                .with_role(user.role)
                .with_resource("fund", &fund.id)
                .with_details(serde_json::json!({
                    "event": name,
                    "approval_status": fund.approval.status,
                    "transaction_status": fund.transaction.status,
                    "retry_count": fund.transaction.retry_count,
                    "version": fund.version,
                })));
            Ok(fund)
        }
        Err(StoreError::Transition(e)) => {
            tracing::warn!(fund_id = %fund_id, event = name, error = %e, user_id = %user.user_id, "Fund transition rejected");
            audit_log!(@write &state.files, AuditEvent::new(audit)
                .with_user(&user.user_id)
                .with_role(user.role)
                .with_resource("fund", fund_id)
                .with_details(serde_json::json!({ "event": name }))
                .failed(e.code()));
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Sanction a fund for an approved beneficiary.
///
/// One fund per beneficiary and scheme.
#[utoipa::path(
    post,
    path = "/api/funds",
    tag = "Funds",
    security(("bearer_auth" = [])),
    request_body = CreateFundRequest,
    responses(
        (status = 201, description = "Fund sanctioned", body = ApiResponse<Fund>),
        (status = 400, description = "Invalid input or beneficiary not approved"),
        (status = 403, description = "Admin or scheme officer required"),
        (status = 404, description = "Beneficiary not found"),
        (status = 409, description = "Fund for this scheme already exists")
    )
)]
pub async fn create_fund(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Json(request): Json<CreateFundRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Fund>>), ApiError> {
    request.validate()?;
    let now = Utc::now();
    let valid_from = request.valid_from.unwrap_or(now);
    if request.valid_until <= valid_from {
        return Err(ApiError::bad_request("valid_until must be after valid_from")
            .with_code("invalid_sanction_window"));
    }
    if request.valid_until <= now {
        return Err(ApiError::bad_request("Sanction validity has already ended")
            .with_code("sanction_expired"));
    }

    let fund = Fund {
        id: uuid::Uuid::new_v4().to_string(),
        beneficiary_id: request.beneficiary_id,
        scheme_code: request.scheme_code.trim().to_ascii_uppercase(),
        scheme_name: request.scheme_name.trim().to_string(),
        amount: Amount::sanctioned(request.amount.round_dp(2)),
        sanction: Sanction {
            order_number: request.sanction_order_number,
            order_date: request.sanction_order_date,
            valid_from,
            valid_until: request.valid_until,
            sanctioned_by: user.user_id.clone(),
        },
        approval: Approval::default(),
        transaction: Transaction::default(),
        remarks: request.remarks,
        created_by: user.user_id.clone(),
        created_at: now,
        updated_at: now,
        version: 0,
    };

    let fund = state.funds().create(fund)?;

    tracing::info!(
        fund_id = %fund.id,
        beneficiary_id = %fund.beneficiary_id,
        scheme_code = %fund.scheme_code,
        amount = %fund.amount.sanctioned,
        user_id = %user.user_id,
        "Fund sanctioned"
    );
    audit_log!(@write &state.files, AuditEvent::new(AuditEventType::FundCreated)
        .with_user(&user.user_id)
        .with_role(user.role)
        .with_resource("fund", &fund.id)
        .with_details(serde_json::json!({
            "beneficiary_id": fund.beneficiary_id,
            "scheme_code": fund.scheme_code,
            "amount": fund.amount.sanctioned.to_string(),
        })));

    Ok(ApiResponse::created("Fund sanctioned", fund))
}

/// List funds visible to the caller, newest first.
#[utoipa::path(
    get,
    path = "/api/funds",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(FundFilter, PageQuery),
    responses(
        (status = 200, description = "Funds", body = PaginatedResponse<Fund>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_funds(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(filter): Query<FundFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PaginatedResponse<Fund>>, ApiError> {
    let funds = state.funds().list()?;
    let funds: Vec<Fund> = if user.role.is_in::<FundViewers>() {
        funds.into_iter().filter(|f| filter.matches(f)).collect()
    } else {
        let own: std::collections::HashSet<String> = state
            .beneficiaries()
            .list()?
            .into_iter()
            .filter(|b| b.created_by == user.user_id)
            .map(|b| b.id)
            .collect();
        funds
            .into_iter()
            .filter(|f| own.contains(&f.beneficiary_id) && filter.matches(f))
            .collect()
    };

    Ok(PaginatedResponse::from_items("Funds retrieved", funds, &page))
}

/// Get one fund.
#[utoipa::path(
    get,
    path = "/api/funds/{fund_id}",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(("fund_id" = String, Path, description = "Fund ID")),
    responses(
        (status = 200, description = "Fund", body = ApiResponse<Fund>),
        (status = 403, description = "Not allowed to view this fund"),
        (status = 404, description = "Fund not found")
    )
)]
pub async fn get_fund(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(fund_id): Path<String>,
) -> Result<Json<ApiResponse<Fund>>, ApiError> {
    let fund = state.funds().get(&fund_id)?;
    if !can_view(&state, &fund, &user)? {
        tracing::warn!(user_id = %user.user_id, role = %user.role, fund_id = %fund_id, "Fund read denied");
        return Err(ApiError::forbidden("You do not have access to this fund")
            .with_code("permission_denied"));
    }
    Ok(ApiResponse::ok("Fund retrieved", fund))
}

/// Funds sanctioned for one beneficiary.
#[utoipa::path(
    get,
    path = "/api/funds/beneficiary/{beneficiary_id}",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(("beneficiary_id" = String, Path, description = "Beneficiary ID")),
    responses(
        (status = 200, description = "Funds", body = ApiResponse<Vec<Fund>>),
        (status = 403, description = "Not allowed to view this beneficiary"),
        (status = 404, description = "Beneficiary not found")
    )
)]
pub async fn funds_by_beneficiary(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(beneficiary_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Fund>>>, ApiError> {
    let beneficiary = state.beneficiaries().get(&beneficiary_id)?;
    if !user.role.is_in::<FundViewers>() && beneficiary.created_by != user.user_id {
        return Err(ApiError::forbidden("You do not have access to this beneficiary")
            .with_code("permission_denied"));
    }

    let funds: Vec<Fund> = state
        .funds()
        .list()?
        .into_iter()
        .filter(|f| f.beneficiary_id == beneficiary_id)
        .collect();
    Ok(ApiResponse::ok("Funds retrieved", funds))
}

/// Approve a pending fund.
#[utoipa::path(
    put,
    path = "/api/funds/{fund_id}/approve",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(("fund_id" = String, Path, description = "Fund ID")),
    request_body = FundActionRequest,
    responses(
        (status = 200, description = "Fund approved", body = ApiResponse<Fund>),
        (status = 400, description = "Approval already decided"),
        (status = 403, description = "Admin or scheme officer required"),
        (status = 404, description = "Fund not found")
    )
)]
pub async fn approve_fund(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Path(fund_id): Path<String>,
    Json(request): Json<FundActionRequest>,
) -> Result<Json<ApiResponse<Fund>>, ApiError> {
    let event = FundEvent::Approve {
        remarks: request.remarks,
    };
    let fund = transition(&state, &user, &fund_id, event, AuditEventType::FundApproved)?;
    Ok(ApiResponse::ok("Fund approved", fund))
}

/// Reject a pending fund. A reason is required.
#[utoipa::path(
    put,
    path = "/api/funds/{fund_id}/reject",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(("fund_id" = String, Path, description = "Fund ID")),
    request_body = FundActionRequest,
    responses(
        (status = 200, description = "Fund rejected", body = ApiResponse<Fund>),
        (status = 400, description = "Reason missing or approval already decided"),
        (status = 403, description = "Admin or scheme officer required"),
        (status = 404, description = "Fund not found")
    )
)]
pub async fn reject_fund(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Path(fund_id): Path<String>,
    Json(request): Json<FundActionRequest>,
) -> Result<Json<ApiResponse<Fund>>, ApiError> {
    let reason = request
        .remarks
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request("A rejection reason is required")
                .with_code("rejection_reason_required")
        })?;

    let event = FundEvent::Reject {
        reason: Some(reason),
    };
    let fund = transition(&state, &user, &fund_id, event, AuditEventType::FundRejected)?;
    Ok(ApiResponse::ok("Fund rejected", fund))
}

/// Initiate disbursement of an approved fund.
///
/// Requires an approved fund, a pending transaction and a sanction still in
/// its validity window. Settlement follows asynchronously.
#[utoipa::path(
    put,
    path = "/api/funds/{fund_id}/disburse",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(("fund_id" = String, Path, description = "Fund ID")),
    responses(
        (status = 202, description = "Disbursement initiated", body = ApiResponse<Fund>),
        (status = 400, description = "Fund not approved, not pending, or sanction expired"),
        (status = 403, description = "Admin or scheme officer required"),
        (status = 404, description = "Fund not found")
    )
)]
pub async fn disburse_fund(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Path(fund_id): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<Fund>>), ApiError> {
    let fund = transition(
        &state,
        &user,
        &fund_id,
        FundEvent::InitiateDisbursement,
        AuditEventType::DisbursementInitiated,
    )?;
    state.disbursements.notify_one();
    Ok((StatusCode::ACCEPTED, ApiResponse::ok("Disbursement initiated", fund)))
}

/// Retry a failed disbursement while retries remain.
#[utoipa::path(
    put,
    path = "/api/funds/{fund_id}/retry",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(("fund_id" = String, Path, description = "Fund ID")),
    responses(
        (status = 202, description = "Disbursement re-initiated", body = ApiResponse<Fund>),
        (status = 400, description = "Not failed, retries exhausted, or sanction expired"),
        (status = 403, description = "Admin or scheme officer required"),
        (status = 404, description = "Fund not found")
    )
)]
pub async fn retry_fund(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Path(fund_id): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<Fund>>), ApiError> {
    let fund = transition(
        &state,
        &user,
        &fund_id,
        FundEvent::Retry,
        AuditEventType::DisbursementRetried,
    )?;
    state.disbursements.notify_one();
    Ok((StatusCode::ACCEPTED, ApiResponse::ok("Disbursement retried", fund)))
}

/// Cancel a transaction that has not reached the bank.
#[utoipa::path(
    put,
    path = "/api/funds/{fund_id}/cancel",
    tag = "Funds",
    security(("bearer_auth" = [])),
    params(("fund_id" = String, Path, description = "Fund ID")),
    request_body = FundActionRequest,
    responses(
        (status = 200, description = "Transaction cancelled", body = ApiResponse<Fund>),
        (status = 400, description = "Transaction is processing or settled"),
        (status = 403, description = "Admin or scheme officer required"),
        (status = 404, description = "Fund not found")
    )
)]
pub async fn cancel_fund(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Path(fund_id): Path<String>,
    Json(request): Json<FundActionRequest>,
) -> Result<Json<ApiResponse<Fund>>, ApiError> {
    let event = FundEvent::Cancel {
        reason: request.remarks,
    };
    let fund = transition(&state, &user, &fund_id, event, AuditEventType::DisbursementCancelled)?;
    Ok(ApiResponse::ok("Transaction cancelled", fund))
}
