// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

/// Authentication and authorization failures.
///
/// Rendered through the common error envelope with a stable `error_code`.
#[derive(Debug)]
pub enum AuthError {
    /// No bearer header and no access cookie
    MissingToken,
    /// Malformed token or bad signature/issuer
    InvalidToken,
    /// Token has expired
    TokenExpired,
    /// A refresh token was presented as an access token, or the reverse
    InvalidTokenType,
    /// The referenced account is deactivated or gone
    UserInactive,
    /// Issued before the last password change, or a refresh token already used
    TokenRevoked,
    /// Authenticated, but the role is not allowed here
    InsufficientPermissions,
    /// Wrong email or password
    InvalidCredentials,
    /// Too many failed logins
    AccountLocked,
    /// Staff account not yet approved by an admin
    PendingApproval,
    /// Internal error
    Internal(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidTokenType => "invalid_token_type",
            AuthError::UserInactive => "user_inactive",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::InsufficientPermissions => "insufficient_permissions",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked => "account_locked",
            AuthError::PendingApproval => "pending_approval",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::InvalidTokenType
            | AuthError::UserInactive
            | AuthError::TokenRevoked
            | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions | AuthError::PendingApproval => StatusCode::FORBIDDEN,
            AuthError::AccountLocked => StatusCode::LOCKED,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Authentication required"),
            AuthError::InvalidToken => write!(f, "Token is invalid"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::InvalidTokenType => write!(f, "Wrong token type for this operation"),
            AuthError::UserInactive => write!(f, "Account is inactive"),
            AuthError::TokenRevoked => write!(f, "Token has been revoked, please log in again"),
            AuthError::InsufficientPermissions => {
                write!(f, "Insufficient permissions for this operation")
            }
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::AccountLocked => {
                write!(f, "Account is temporarily locked after repeated failed logins")
            }
            AuthError::PendingApproval => write!(f, "Account is awaiting administrator approval"),
            AuthError::Internal(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn missing_token_returns_401() {
        let response = AuthError::MissingToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "missing_token");
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn insufficient_permissions_returns_403() {
        let response = AuthError::InsufficientPermissions.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn locked_account_is_423() {
        assert_eq!(AuthError::AccountLocked.status_code(), StatusCode::LOCKED);
    }
}
