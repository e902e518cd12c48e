// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Grievance ticket endpoints.
//!
//! Any signed-in user can file a ticket. Staff assign, escalate, resolve and
//! reject; the complainant closes the ticket and leaves feedback. Ticket
//! status can also be tracked by number without signing in.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::audit_log;
use crate::auth::{
    Auth, AuthenticatedUser, OfficerRoles, OptionalAuth, RequireRoles, ReviewerRoles,
};
use crate::domain::{
    Actor, Communication, Grievance, GrievanceCategory, GrievanceStatus, Priority, SlaStatus,
};
use crate::error::ApiError;
use crate::response::{ApiResponse, PageQuery, PaginatedResponse};
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType, OwnedResource, StoreError, StoreResult};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateGrievanceRequest {
    /// Application the complaint concerns, if any.
    pub beneficiary_id: Option<String>,
    #[validate(length(min = 5, max = 200, message = "subject must be 5 to 200 characters"))]
    pub subject: String,
    #[validate(length(min = 10, max = 5000, message = "description must be 10 to 5000 characters"))]
    pub description: String,
    pub category: GrievanceCategory,
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AssignRequest {
    #[validate(length(min = 1, message = "assigned_to is required"))]
    pub assigned_to: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResolveRequest {
    #[validate(length(min = 5, max = 2000, message = "resolution summary must be 5 to 2000 characters"))]
    pub summary: String,
    #[validate(length(max = 2000))]
    pub action_taken: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EscalateRequest {
    #[validate(length(min = 1, message = "escalate_to is required"))]
    pub escalate_to: String,
    #[validate(length(min = 5, max = 1000, message = "escalation reason must be 5 to 1000 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RejectGrievanceRequest {
    #[validate(length(min = 5, max = 1000, message = "rejection reason must be 5 to 1000 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CommentRequest {
    #[validate(length(min = 1, max = 2000, message = "message must be 1 to 2000 characters"))]
    pub message: String,
    /// Staff-only note. Ignored for non-staff authors.
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct FeedbackRequest {
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: u8,
    #[validate(length(max = 1000))]
    pub comment: Option<String>,
}

/// Filters for `GET /api/grievances`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GrievanceFilter {
    pub status: Option<GrievanceStatus>,
    pub category: Option<GrievanceCategory>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<String>,
    /// Only tickets past their SLA target.
    pub overdue: Option<bool>,
}

impl GrievanceFilter {
    fn matches(&self, g: &Grievance) -> bool {
        self.status.is_none_or(|s| s == g.status)
            && self.category.is_none_or(|c| c == g.category)
            && self.priority.is_none_or(|p| p == g.priority)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|a| g.assigned_to() == Some(a))
            && self.overdue.is_none_or(|o| o == g.is_overdue)
    }
}

/// Status view returned by ticket tracking.
///
/// Anonymous callers get status, SLA and timestamps only. Ticket details and
/// the conversation are added for callers allowed to see the ticket.
#[derive(Debug, Serialize, ToSchema)]
pub struct GrievanceTracking {
    pub ticket_number: String,
    pub status: GrievanceStatus,
    pub sla_status: SlaStatus,
    pub is_overdue: bool,
    pub escalation_level: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<GrievanceCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communications: Option<Vec<Communication>>,
}

impl GrievanceTracking {
    fn build(g: Grievance, viewer: Option<&AuthenticatedUser>) -> Self {
        let viewer = viewer.filter(|u| g.visible_to(&Actor::from(*u)));
        let mut tracking = Self {
            ticket_number: g.ticket_number.clone(),
            status: g.status,
            sla_status: g.sla_status,
            is_overdue: g.is_overdue,
            escalation_level: g.escalation_level,
            created_at: g.created_at,
            updated_at: g.updated_at,
            resolved_at: g.resolution.as_ref().map(|r| r.resolved_at),
            subject: None,
            category: None,
            priority: None,
            communications: None,
        };
        if let Some(user) = viewer {
            let g = g.redact_for(user.role);
            tracking.subject = Some(g.subject);
            tracking.category = Some(g.category);
            tracking.priority = Some(g.priority);
            tracking.communications = Some(g.communications);
        }
        tracking
    }
}

fn ensure_visible(g: &Grievance, user: &AuthenticatedUser) -> StoreResult<()> {
    if g.visible_to(&Actor::from(user)) {
        return Ok(());
    }
    tracing::warn!(
        user_id = %user.user_id,
        role = %user.role,
        grievance_id = %g.id,
        "Grievance access denied"
    );
    Err(StoreError::PermissionDenied {
        user_id: user.user_id.clone(),
        resource: Grievance::RESOURCE.to_string(),
    })
}

/// Tickets can only be handed to active officers.
fn check_assignee(state: &AppState, user_id: &str) -> Result<(), ApiError> {
    let assignee = state.users().get(user_id)?;
    if assignee.is_active && assignee.is_approved && assignee.role.is_in::<OfficerRoles>() {
        Ok(())
    } else {
        Err(ApiError::bad_request("Grievances can only be assigned to active officers")
            .with_code("invalid_assignee"))
    }
}

/// Mutate a visible ticket, then audit and log the change.
fn mutate(
    state: &AppState,
    user: &AuthenticatedUser,
    id: &str,
    audit: AuditEventType,
    details: serde_json::Value,
    f: impl FnOnce(&mut Grievance, &Actor, DateTime<Utc>) -> StoreResult<()>,
) -> Result<Grievance, ApiError> {
    let actor = Actor::from(user);
    let now = Utc::now();
    let result = state.grievances().update(id, now, |g| {
        ensure_visible(g, user)?;
        f(g, &actor, now)
    });

    match result {
        Ok((grievance, ())) => {
            tracing::info!(
                grievance_id = %grievance.id,
                ticket_number = %grievance.ticket_number,
                status = %grievance.status,
                event = ?audit,
                user_id = %user.user_id,
                "Grievance updated"
            );
            audit_log!(&state.files, audit, user, "grievance", &grievance.id, details);
            Ok(grievance.redact_for(user.role))
        }
        Err(StoreError::Transition(e)) => {
            tracing::warn!(grievance_id = %id, event = ?audit, error = %e, user_id = %user.user_id, "Grievance transition rejected");
            audit_log!(@write &state.files, AuditEvent::new(audit)
                .with_user(&user.user_id)
                .with_role(user.role)
                .with_resource("grievance", id)
                .failed(e.code()));
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// File a new grievance.
#[utoipa::path(
    post,
    path = "/api/grievances",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    request_body = CreateGrievanceRequest,
    responses(
        (status = 201, description = "Grievance filed", body = ApiResponse<Grievance>),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Beneficiary not found")
    )
)]
pub async fn create_grievance(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateGrievanceRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Grievance>>), ApiError> {
    request.validate()?;
    if let Some(beneficiary_id) = &request.beneficiary_id {
        state.beneficiaries().get(beneficiary_id)?;
    }

    let now = Utc::now();
    let grievance = Grievance {
        id: uuid::Uuid::new_v4().to_string(),
        ticket_number: String::new(),
        beneficiary_id: request.beneficiary_id,
        subject: request.subject.trim().to_string(),
        description: request.description.trim().to_string(),
        category: request.category,
        priority: request.priority.unwrap_or(Priority::Medium),
        status: GrievanceStatus::Open,
        complainant_id: user.user_id.clone(),
        assignment: None,
        resolution: None,
        escalation_level: 0,
        escalations: Vec::new(),
        communications: Vec::new(),
        feedback: None,
        target_resolution_hours: state.config.grievance_sla_hours,
        sla_status: SlaStatus::Normal,
        is_overdue: false,
        closed_by: None,
        closed_at: None,
        rejection_reason: None,
        created_at: now,
        updated_at: now,
    };
    let grievance = state.grievances().create(grievance)?;

    tracing::info!(
        grievance_id = %grievance.id,
        ticket_number = %grievance.ticket_number,
        category = ?grievance.category,
        user_id = %user.user_id,
        "Grievance filed"
    );
    audit_log!(
        &state.files,
        AuditEventType::GrievanceCreated,
        user,
        "grievance",
        &grievance.id,
        serde_json::json!({ "ticket_number": grievance.ticket_number })
    );

    Ok(ApiResponse::created("Grievance filed", grievance))
}

/// List tickets visible to the caller, newest first.
///
/// Staff see every ticket; others see the ones they filed or are assigned.
#[utoipa::path(
    get,
    path = "/api/grievances",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(GrievanceFilter, PageQuery),
    responses(
        (status = 200, description = "Grievances", body = PaginatedResponse<Grievance>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_grievances(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(filter): Query<GrievanceFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PaginatedResponse<Grievance>>, ApiError> {
    let actor = Actor::from(&user);
    let grievances: Vec<Grievance> = state
        .grievances()
        .list(Utc::now())?
        .into_iter()
        .filter(|g| g.visible_to(&actor) && filter.matches(g))
        .map(|g| g.redact_for(user.role))
        .collect();

    Ok(PaginatedResponse::from_items("Grievances retrieved", grievances, &page))
}

/// Get one ticket.
#[utoipa::path(
    get,
    path = "/api/grievances/{grievance_id}",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    responses(
        (status = 200, description = "Grievance", body = ApiResponse<Grievance>),
        (status = 403, description = "Not allowed to view this grievance"),
        (status = 404, description = "Grievance not found")
    )
)]
pub async fn get_grievance(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
) -> Result<Json<ApiResponse<Grievance>>, ApiError> {
    let grievance = state.grievances().get(&grievance_id, Utc::now())?;
    ensure_visible(&grievance, &user)?;
    Ok(ApiResponse::ok("Grievance retrieved", grievance.redact_for(user.role)))
}

/// Track a ticket by its public number. Sign-in is optional; signed-in
/// complainants and staff also get the conversation.
#[utoipa::path(
    get,
    path = "/api/grievances/track/{ticket_number}",
    tag = "Grievances",
    params(("ticket_number" = String, Path, description = "Ticket number, e.g. GRV-20260101-0001")),
    responses(
        (status = 200, description = "Ticket status", body = ApiResponse<GrievanceTracking>),
        (status = 404, description = "Ticket not found")
    )
)]
pub async fn track_grievance(
    OptionalAuth(user): OptionalAuth,
    State(state): State<AppState>,
    Path(ticket_number): Path<String>,
) -> Result<Json<ApiResponse<GrievanceTracking>>, ApiError> {
    let grievance = state.grievances().find_by_ticket(&ticket_number, Utc::now())?;
    tracing::debug!(
        ticket_number = %grievance.ticket_number,
        user_id = user.as_ref().map(|u| u.user_id.as_str()).unwrap_or("anonymous"),
        "Grievance tracked"
    );
    Ok(ApiResponse::ok(
        "Grievance status retrieved",
        GrievanceTracking::build(grievance, user.as_ref()),
    ))
}

/// Assign a ticket to an officer. Moves it to `in_progress`.
#[utoipa::path(
    put,
    path = "/api/grievances/{grievance_id}/assign",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    request_body = AssignRequest,
    responses(
        (status = 200, description = "Grievance assigned", body = ApiResponse<Grievance>),
        (status = 400, description = "Ticket already settled or assignee is not an officer"),
        (status = 403, description = "Admin or scheme officer required"),
        (status = 404, description = "Grievance or assignee not found")
    )
)]
pub async fn assign_grievance(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<ApiResponse<Grievance>>, ApiError> {
    request.validate()?;
    check_assignee(&state, &request.assigned_to)?;

    let details = serde_json::json!({ "assigned_to": request.assigned_to });
    let grievance = mutate(&state, &user, &grievance_id, AuditEventType::GrievanceAssigned, details, |g, actor, now| {
        g.assign(&request.assigned_to, actor, now)?;
        Ok(())
    })?;
    Ok(ApiResponse::ok("Grievance assigned", grievance))
}

/// Resolve a ticket. Only the assignee or an admin may resolve.
#[utoipa::path(
    put,
    path = "/api/grievances/{grievance_id}/resolve",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Grievance resolved", body = ApiResponse<Grievance>),
        (status = 400, description = "Ticket already resolved or closed"),
        (status = 403, description = "Caller is not the assignee")
    )
)]
pub async fn resolve_grievance(
    RequireRoles(user, _): RequireRoles<OfficerRoles>,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ApiResponse<Grievance>>, ApiError> {
    request.validate()?;
    let grievance = mutate(
        &state,
        &user,
        &grievance_id,
        AuditEventType::GrievanceResolved,
        serde_json::json!({ "summary": request.summary }),
        |g, actor, now| {
            g.resolve(request.summary, request.action_taken, actor, now)?;
            Ok(())
        },
    )?;
    Ok(ApiResponse::ok("Grievance resolved", grievance))
}

/// Escalate a ticket one level and reassign it.
#[utoipa::path(
    put,
    path = "/api/grievances/{grievance_id}/escalate",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    request_body = EscalateRequest,
    responses(
        (status = 200, description = "Grievance escalated", body = ApiResponse<Grievance>),
        (status = 400, description = "Ticket settled or maximum level reached"),
        (status = 403, description = "Officer role required")
    )
)]
pub async fn escalate_grievance(
    RequireRoles(user, _): RequireRoles<OfficerRoles>,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
    Json(request): Json<EscalateRequest>,
) -> Result<Json<ApiResponse<Grievance>>, ApiError> {
    request.validate()?;
    check_assignee(&state, &request.escalate_to)?;

    let details = serde_json::json!({
        "escalate_to": request.escalate_to,
        "reason": request.reason,
    });
    let grievance = mutate(&state, &user, &grievance_id, AuditEventType::GrievanceEscalated, details, |g, actor, now| {
        g.escalate(&request.escalate_to, request.reason, actor, now)?;
        Ok(())
    })?;
    Ok(ApiResponse::ok("Grievance escalated", grievance))
}

/// Close a resolved ticket.
#[utoipa::path(
    put,
    path = "/api/grievances/{grievance_id}/close",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    responses(
        (status = 200, description = "Grievance closed", body = ApiResponse<Grievance>),
        (status = 400, description = "Ticket is not resolved"),
        (status = 403, description = "Only the complainant or staff can close")
    )
)]
pub async fn close_grievance(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
) -> Result<Json<ApiResponse<Grievance>>, ApiError> {
    let grievance = mutate(
        &state,
        &user,
        &grievance_id,
        AuditEventType::GrievanceClosed,
        serde_json::Value::Null,
        |g, actor, now| {
            g.close(actor, now)?;
            Ok(())
        },
    )?;
    Ok(ApiResponse::ok("Grievance closed", grievance))
}

/// Reject an open ticket as invalid.
#[utoipa::path(
    put,
    path = "/api/grievances/{grievance_id}/reject",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    request_body = RejectGrievanceRequest,
    responses(
        (status = 200, description = "Grievance rejected", body = ApiResponse<Grievance>),
        (status = 400, description = "Ticket already settled"),
        (status = 403, description = "Admin or scheme officer required")
    )
)]
pub async fn reject_grievance(
    RequireRoles(user, _): RequireRoles<ReviewerRoles>,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
    Json(request): Json<RejectGrievanceRequest>,
) -> Result<Json<ApiResponse<Grievance>>, ApiError> {
    request.validate()?;
    let details = serde_json::json!({ "reason": request.reason });
    let grievance = mutate(&state, &user, &grievance_id, AuditEventType::GrievanceRejected, details, |g, actor, now| {
        g.reject(request.reason, actor, now)?;
        Ok(())
    })?;
    Ok(ApiResponse::ok("Grievance rejected", grievance))
}

/// Add a message to the ticket's conversation.
#[utoipa::path(
    post,
    path = "/api/grievances/{grievance_id}/comments",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Message added", body = ApiResponse<Grievance>),
        (status = 400, description = "Ticket is closed"),
        (status = 403, description = "Not allowed to view this grievance")
    )
)]
pub async fn add_comment(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Grievance>>), ApiError> {
    request.validate()?;
    let comment_id = uuid::Uuid::new_v4().to_string();
    let details = serde_json::json!({ "comment_id": comment_id, "internal": request.internal });
    let grievance = mutate(&state, &user, &grievance_id, AuditEventType::GrievanceCommented, details, |g, actor, now| {
        g.add_communication(comment_id, request.message, request.internal, actor, now)?;
        Ok(())
    })?;
    Ok(ApiResponse::created("Message added", grievance))
}

/// Rate the resolution. Complainant only, once, after resolution.
#[utoipa::path(
    post,
    path = "/api/grievances/{grievance_id}/feedback",
    tag = "Grievances",
    security(("bearer_auth" = [])),
    params(("grievance_id" = String, Path, description = "Grievance ID")),
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "Feedback recorded", body = ApiResponse<Grievance>),
        (status = 400, description = "Ticket not resolved or feedback already given"),
        (status = 403, description = "Caller is not the complainant")
    )
)]
pub async fn submit_feedback(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(grievance_id): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<ApiResponse<Grievance>>, ApiError> {
    request.validate()?;
    let details = serde_json::json!({ "rating": request.rating });
    let grievance = mutate(&state, &user, &grievance_id, AuditEventType::FeedbackSubmitted, details, |g, actor, now| {
        g.submit_feedback(request.rating, request.comment, actor, now)?;
        Ok(())
    })?;
    Ok(ApiResponse::ok("Feedback recorded", grievance))
}
