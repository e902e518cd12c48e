// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP surface: the `/api` routes, health probes and the OpenAPI docs.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{rate_limit::rate_limit, state::AppState};

pub mod audit;
pub mod auth;
pub mod beneficiaries;
pub mod funds;
pub mod grievances;
pub mod health;
pub mod reports;
pub mod users;

/// Headroom over the upload cap for base64 expansion and the JSON envelope.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.upload_max_bytes / 3 * 4 + BODY_LIMIT_SLACK;

    let api_routes = Router::new()
        // Accounts
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh-token", post(auth::refresh_token))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/update-password", put(auth::update_password))
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/approve", put(users::approve_user))
        .route("/users/{user_id}/deactivate", put(users::deactivate_user))
        // Beneficiaries
        .route(
            "/beneficiaries",
            get(beneficiaries::list_beneficiaries).post(beneficiaries::create_beneficiary),
        )
        .route(
            "/beneficiaries/{beneficiary_id}",
            get(beneficiaries::get_beneficiary)
                .put(beneficiaries::update_beneficiary)
                .delete(beneficiaries::delete_beneficiary),
        )
        .route(
            "/beneficiaries/{beneficiary_id}/status",
            put(beneficiaries::update_status),
        )
        .route(
            "/beneficiaries/{beneficiary_id}/documents",
            post(beneficiaries::upload_document),
        )
        .route(
            "/beneficiaries/{beneficiary_id}/documents/{document_id}",
            get(beneficiaries::download_document),
        )
        .route(
            "/beneficiaries/{beneficiary_id}/documents/{document_id}/verify",
            put(beneficiaries::verify_document),
        )
        // Funds
        .route("/funds", get(funds::list_funds).post(funds::create_fund))
        .route(
            "/funds/beneficiary/{beneficiary_id}",
            get(funds::funds_by_beneficiary),
        )
        .route("/funds/{fund_id}", get(funds::get_fund))
        .route("/funds/{fund_id}/approve", put(funds::approve_fund))
        .route("/funds/{fund_id}/reject", put(funds::reject_fund))
        .route("/funds/{fund_id}/disburse", put(funds::disburse_fund))
        .route("/funds/{fund_id}/retry", put(funds::retry_fund))
        .route("/funds/{fund_id}/cancel", put(funds::cancel_fund))
        // Grievances
        .route(
            "/grievances",
            get(grievances::list_grievances).post(grievances::create_grievance),
        )
        .route(
            "/grievances/track/{ticket_number}",
            get(grievances::track_grievance),
        )
        .route("/grievances/{grievance_id}", get(grievances::get_grievance))
        .route(
            "/grievances/{grievance_id}/assign",
            put(grievances::assign_grievance),
        )
        .route(
            "/grievances/{grievance_id}/resolve",
            put(grievances::resolve_grievance),
        )
        .route(
            "/grievances/{grievance_id}/escalate",
            put(grievances::escalate_grievance),
        )
        .route(
            "/grievances/{grievance_id}/close",
            put(grievances::close_grievance),
        )
        .route(
            "/grievances/{grievance_id}/reject",
            put(grievances::reject_grievance),
        )
        .route(
            "/grievances/{grievance_id}/comments",
            post(grievances::add_comment),
        )
        .route(
            "/grievances/{grievance_id}/feedback",
            post(grievances::submit_feedback),
        )
        // Audit and reports
        .route("/audit/logs", get(audit::audit_logs))
        .route("/audit/export", get(audit::export_audit))
        .route("/reports/summary", get(reports::summary))
        .route("/reports/funds-by-scheme", get(reports::funds_by_scheme))
        .route("/reports/grievance-sla", get(reports::grievance_sla))
        .route(
            "/reports/beneficiaries-by-district",
            get(reports::beneficiaries_by_district),
        )
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(DefaultBodyLimit::max(body_limit));

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DBT Portal API",
        description = "Beneficiary registration, fund sanction and disbursement, grievances and audit."
    ),
    paths(
        auth::register,
        auth::login,
        auth::refresh_token,
        auth::logout,
        auth::update_password,
        auth::me,
        users::list_users,
        users::get_user,
        users::approve_user,
        users::deactivate_user,
        beneficiaries::create_beneficiary,
        beneficiaries::list_beneficiaries,
        beneficiaries::get_beneficiary,
        beneficiaries::update_beneficiary,
        beneficiaries::delete_beneficiary,
        beneficiaries::update_status,
        beneficiaries::upload_document,
        beneficiaries::download_document,
        beneficiaries::verify_document,
        funds::create_fund,
        funds::list_funds,
        funds::get_fund,
        funds::funds_by_beneficiary,
        funds::approve_fund,
        funds::reject_fund,
        funds::disburse_fund,
        funds::retry_fund,
        funds::cancel_fund,
        grievances::create_grievance,
        grievances::list_grievances,
        grievances::get_grievance,
        grievances::track_grievance,
        grievances::assign_grievance,
        grievances::resolve_grievance,
        grievances::escalate_grievance,
        grievances::close_grievance,
        grievances::reject_grievance,
        grievances::add_comment,
        grievances::submit_feedback,
        audit::audit_logs,
        audit::export_audit,
        reports::summary,
        reports::funds_by_scheme,
        reports::grievance_sla,
        reports::beneficiaries_by_district,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::FieldError,
            crate::response::Pagination,
            crate::auth::Role,
            crate::domain::FundState,
            audit::ExportFormat
        )
    ),
    tags(
        (name = "Auth", description = "Registration, login and sessions"),
        (name = "Users", description = "Account administration"),
        (name = "Beneficiaries", description = "Applications, review and documents"),
        (name = "Funds", description = "Sanction, approval and disbursement"),
        (name = "Grievances", description = "Complaint tickets and SLA tracking"),
        (name = "Audit", description = "Audit trail query and export"),
        (name = "Reports", description = "Aggregate reports"),
        (name = "Health", description = "Liveness and readiness probes")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}
