// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication, and
//! `RequireRoles<P>` to additionally restrict a route to a permission set:
//!
//! ```rust,ignore
//! async fn approve_fund(
//!     RequireRoles(user, _): RequireRoles<ReviewerRoles>,
//!     State(state): State<AppState>,
//! ) -> Result<Json<ApiResponse<Fund>>, ApiError> {
//!     // user.role is admin or scheme_officer
//! }
//! ```
//!
//! Every request re-verifies its token and reloads the account; there is no
//! session store.

use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;

use super::claims::TokenKind;
use super::{AdminRoles, AuthError, AuthenticatedUser, PermissionSet};
use crate::rate_limit::client_ip;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType, StoreError, UserRepository};

/// Cookie carrying the access token for browser clients.
pub const ACCESS_COOKIE: &str = "access_token";

/// Cookie carrying the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Extractor for authenticated users.
///
/// Accepts `Authorization: Bearer <jwt>` or the `access_token` cookie.
/// Rejects with 401 when the token is missing, invalid, expired, issued
/// before the last password change, or the account is inactive.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Set by an earlier extractor on the same request
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let token = extract_token(parts)?;
        match authenticate(&token, state) {
            Ok(user) => {
                parts.extensions.insert(user.clone());
                Ok(Auth(user))
            }
            Err(err) => {
                tracing::warn!(
                    error_code = err.error_code(),
                    path = %parts.uri.path(),
                    "Authentication failed"
                );
                crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::AuthFailure)
                    .with_ip(client_ip(parts, state.config.trust_forwarded_for))
                    .with_details(serde_json::json!({ "path": parts.uri.path() }))
                    .failed(err.error_code()));
                Err(err)
            }
        }
    }
}

/// Bearer header first, then the access cookie.
fn extract_token(parts: &Parts) -> Result<String, AuthError> {
    if let Some(header) = parts.headers.get(AUTHORIZATION) {
        let value = header.to_str().map_err(|_| AuthError::InvalidToken)?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidToken)?
            .trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        return Ok(token.to_string());
    }

    CookieJar::from_headers(&parts.headers)
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Verify an access token and load the account it names.
fn authenticate(token: &str, state: &AppState) -> Result<AuthenticatedUser, AuthError> {
    let claims = state.tokens.verify(token, TokenKind::Access)?;

    let user = match UserRepository::new(&state.db).get(&claims.sub) {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => return Err(AuthError::UserInactive),
        Err(e) => return Err(AuthError::Internal(e.to_string())),
    };

    if !user.is_active {
        return Err(AuthError::UserInactive);
    }
    if !user.is_approved {
        return Err(AuthError::PendingApproval);
    }
    if user.token_predates_password_change(claims.iat_ms) {
        return Err(AuthError::TokenRevoked);
    }

    Ok(AuthenticatedUser::from_parts(claims, &user))
}

/// Extractor that requires a role from permission set `P`.
///
/// 401 without a valid token, 403 when the role is not in `P`. Denials are
/// logged and written to the audit trail.
pub struct RequireRoles<P: PermissionSet>(pub AuthenticatedUser, pub PhantomData<P>);

impl<P: PermissionSet> FromRequestParts<AppState> for RequireRoles<P> {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.role.is_in::<P>() {
            tracing::warn!(
                user_id = %user.user_id,
                role = %user.role,
                required = P::NAME,
                path = %parts.uri.path(),
                "Permission denied"
            );
            crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::PermissionDenied)
                .with_user(&user.user_id)
                .with_role(user.role)
                .with_ip(client_ip(parts, state.config.trust_forwarded_for))
                .with_details(serde_json::json!({
                    "path": parts.uri.path(),
                    "required": P::NAME,
                }))
                .failed("insufficient_permissions"));
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(RequireRoles(user, PhantomData))
    }
}

/// Extractor that requires admin role.
pub type AdminOnly = RequireRoles<AdminRoles>;

/// Optional authentication extractor.
///
/// Returns `None` if no valid authentication is present, instead of rejecting.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if extract_token(parts).is_err() {
            return Ok(OptionalAuth(None));
        }
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(user)) => Ok(OptionalAuth(Some(user))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}
