// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail query and export for admins and auditors.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::audit_log;
use crate::auth::{AuditRoles, AuthenticatedUser, RequireRoles};
use crate::error::ApiError;
use crate::response::{ApiResponse, PageQuery, PaginatedResponse};
use crate::state::AppState;
use crate::storage::{events_to_csv, AuditEvent, AuditEventType, AuditFilter, AuditRepository};

/// Exports are capped at this many events, newest first.
const MAX_EXPORT_EVENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// `json` (default) or `csv`.
    pub format: Option<ExportFormat>,
}

fn load(state: &AppState, filter: &AuditFilter) -> Result<Vec<AuditEvent>, ApiError> {
    let (from, to) = filter
        .date_range(Utc::now().date_naive())
        .map_err(|msg| ApiError::bad_request(msg).with_code("invalid_date_range"))?;
    Ok(AuditRepository::new(&state.files).query(filter, from, to)?)
}

/// Query the audit trail, newest first.
///
/// Defaults to the last seven days; ranges are limited to 92 days.
#[utoipa::path(
    get,
    path = "/api/audit/logs",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(AuditFilter, PageQuery),
    responses(
        (status = 200, description = "Audit events", body = PaginatedResponse<AuditEvent>),
        (status = 400, description = "Invalid date range"),
        (status = 403, description = "Admin or auditor required")
    )
)]
pub async fn audit_logs(
    RequireRoles(user, _): RequireRoles<AuditRoles>,
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PaginatedResponse<AuditEvent>>, ApiError> {
    let events = load(&state, &filter)?;
    tracing::debug!(user_id = %user.user_id, count = events.len(), "Audit log queried");
    Ok(PaginatedResponse::from_items("Audit logs retrieved", events, &page))
}

/// Download the filtered audit trail as JSON or CSV.
#[utoipa::path(
    get,
    path = "/api/audit/export",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(AuditFilter, ExportQuery),
    responses(
        (status = 200, description = "Audit export", content(
            (ApiResponse<Vec<AuditEvent>> = "application/json"),
            (String = "text/csv")
        )),
        (status = 400, description = "Invalid date range"),
        (status = 403, description = "Admin or auditor required")
    )
)]
pub async fn export_audit(
    RequireRoles(user, _): RequireRoles<AuditRoles>,
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
    Query(export): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let mut events = load(&state, &filter)?;
    if events.len() > MAX_EXPORT_EVENTS {
        tracing::warn!(total = events.len(), cap = MAX_EXPORT_EVENTS, "Audit export truncated");
        events.truncate(MAX_EXPORT_EVENTS);
    }

    let format = export.format.unwrap_or_default();
    record_export(&state, &user, format, events.len());

    let response = match format {
        ExportFormat::Json => ApiResponse::ok("Audit logs exported", events).into_response(),
        ExportFormat::Csv => {
            let file_name = format!("audit-{}.csv", Utc::now().format("%Y%m%d%H%M%S"));
            (
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{file_name}\""),
                    ),
                ],
                events_to_csv(&events),
            )
                .into_response()
        }
    };
    Ok(response)
}

fn record_export(state: &AppState, user: &AuthenticatedUser, format: ExportFormat, count: usize) {
    tracing::info!(user_id = %user.user_id, format = ?format, count, "Audit log exported");
    audit_log!(@write &state.files, AuditEvent::new(AuditEventType::AuditExported)
        .with_user(&user.user_id)
        .with_role(user.role)
        .with_details(serde_json::json!({ "format": format!("{format:?}").to_lowercase(), "count": count })));
}
