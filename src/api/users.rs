// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User management for administrators.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::audit_log;
use crate::auth::{AdminOnly, Auth, RequireRoles, Role};
use crate::error::ApiError;
use crate::response::{ApiResponse, PageQuery, PaginatedResponse};
use crate::state::AppState;
use crate::storage::{AuditEventType, UserResponse};

/// Filters for `GET /api/users`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserFilter {
    pub role: Option<Role>,
    /// Only accounts awaiting (false) or holding (true) approval.
    pub approved: Option<bool>,
    pub active: Option<bool>,
}

/// List accounts, newest first.
#[utoipa::path(
    get,
    path = "/api/users",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(UserFilter, PageQuery),
    responses(
        (status = 200, description = "Accounts", body = PaginatedResponse<UserResponse>),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_users(
    RequireRoles(admin, _): AdminOnly,
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PaginatedResponse<UserResponse>>, ApiError> {
    let users: Vec<UserResponse> = state
        .users()
        .list()?
        .into_iter()
        .filter(|u| filter.role.is_none_or(|r| r == u.role))
        .filter(|u| filter.approved.is_none_or(|a| a == u.is_approved))
        .filter(|u| filter.active.is_none_or(|a| a == u.is_active))
        .map(UserResponse::from)
        .collect();

    tracing::debug!(user_id = %admin.user_id, count = users.len(), "Listed users");
    Ok(PaginatedResponse::from_items("Users retrieved", users, &page))
}

/// Get one account. Users may read their own; admins may read any.
#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Account", body = ApiResponse<UserResponse>),
        (status = 403, description = "Not your account"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    if user.user_id != user_id && !user.is_admin() {
        tracing::warn!(user_id = %user.user_id, role = %user.role, target = %user_id, "User read denied");
        return Err(ApiError::forbidden("You can only view your own account"));
    }
    let stored = state.users().get(&user_id)?;
    Ok(ApiResponse::ok("User retrieved", stored.into()))
}

/// Approve a pending staff account.
#[utoipa::path(
    put,
    path = "/api/users/{user_id}/approve",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Account approved", body = ApiResponse<UserResponse>),
        (status = 400, description = "Already approved"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found")
    )
)]
pub async fn approve_user(
    RequireRoles(admin, _): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let now = Utc::now();
    let (stored, was_approved) = state.users().update(&user_id, |u| {
        let was = u.is_approved;
        if !was {
            u.is_approved = true;
            u.approved_by = Some(admin.user_id.clone());
            u.approved_at = Some(now);
        }
        Ok(was)
    })?;
    if was_approved {
        return Err(ApiError::bad_request("Account is already approved").with_code("already_approved"));
    }

    tracing::info!(user_id = %stored.id, approved_by = %admin.user_id, "User approved");
    audit_log!(&state.files, AuditEventType::UserApproved, admin, "user", &stored.id);
    Ok(ApiResponse::ok("User approved", stored.into()))
}

/// Deactivate an account. Its tokens stop working immediately.
#[utoipa::path(
    put,
    path = "/api/users/{user_id}/deactivate",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Account deactivated", body = ApiResponse<UserResponse>),
        (status = 400, description = "Cannot deactivate yourself"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found")
    )
)]
pub async fn deactivate_user(
    RequireRoles(admin, _): AdminOnly,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    if admin.user_id == user_id {
        return Err(ApiError::bad_request("You cannot deactivate your own account")
            .with_code("self_deactivation"));
    }

    let (stored, ()) = state.users().update(&user_id, |u| {
        u.is_active = false;
        u.revoke_refresh_tokens();
        Ok(())
    })?;

    tracing::info!(user_id = %stored.id, deactivated_by = %admin.user_id, "User deactivated");
    audit_log!(&state.files, AuditEventType::UserDeactivated, admin, "user", &stored.id);
    Ok(ApiResponse::ok("User deactivated", stored.into()))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::auth::Role;
    use crate::storage::UserRepository;
    use crate::test_support::{bearer, body_json, json_request, seed_user, test_state};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn admin_approves_pending_staff() {
        let (state, _dir) = test_state();
        let admin = seed_user(&state, "admin-1", "admin@example.gov.in", Role::Admin);
        let mut pending = crate::storage::repository::users::tests::sample_user(
            "fo-1",
            "fo@example.gov.in",
            Role::FieldOfficer,
        );
        pending.is_approved = false;
        state.users().create(&pending).unwrap();
        let auth = bearer(&state, &admin);
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(json_request("GET", "/api/users?approved=false", Some(&auth), None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["id"], "fo-1");

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/users/fo-1/approve", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = UserRepository::new(&state.db).get("fo-1").unwrap();
        assert!(stored.is_approved);
        assert_eq!(stored.approved_by.as_deref(), Some("admin-1"));

        let response = app
            .oneshot(json_request("PUT", "/api/users/fo-1/approve", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deactivated_user_loses_access() {
        let (state, _dir) = test_state();
        let admin = seed_user(&state, "admin-1", "admin@example.gov.in", Role::Admin);
        let officer = seed_user(&state, "so-1", "so@example.gov.in", Role::SchemeOfficer);
        let admin_auth = bearer(&state, &admin);
        let officer_auth = bearer(&state, &officer);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/users/so-1/deactivate", Some(&admin_auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request("GET", "/api/auth/me", Some(&officer_auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(json_request("PUT", "/api/users/admin-1/deactivate", Some(&admin_auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn users_read_only_their_own_account() {
        let (state, _dir) = test_state();
        let a = seed_user(&state, "ben-a", "a@example.in", Role::Beneficiary);
        seed_user(&state, "ben-b", "b@example.in", Role::Beneficiary);
        let auth = bearer(&state, &a);
        let app = router(state);

        let own = app
            .clone()
            .oneshot(json_request("GET", "/api/users/ben-a", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(own.status(), StatusCode::OK);

        let other = app
            .clone()
            .oneshot(json_request("GET", "/api/users/ben-b", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::FORBIDDEN);

        let list = app
            .oneshot(json_request("GET", "/api/users", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::FORBIDDEN);
    }
}
