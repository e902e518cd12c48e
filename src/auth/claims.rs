// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::Role;
use crate::storage::StoredUser;

/// Which of the two token kinds a JWT is.
///
/// Refresh tokens are never accepted as access tokens and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by portal-issued JWTs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Role at issue time. The stored user's role wins on every request.
    pub role: Role,

    /// Issuer
    pub iss: String,

    /// Issued at (unix seconds)
    pub iat: i64,

    /// Issued at (unix milliseconds), compared against password changes.
    #[serde(default)]
    pub iat_ms: i64,

    /// Expiration (unix seconds)
    pub exp: i64,

    /// Unique token id
    pub jti: String,

    pub typ: TokenKind,
}

/// Authenticated user information.
///
/// Built from verified claims and the stored account; this is the type
/// handlers receive from the [`Auth`](super::Auth) extractor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub user_id: String,

    pub role: Role,

    pub email: String,

    pub name: String,

    /// `jti` of the presented token
    #[serde(skip)]
    pub token_id: String,

    #[serde(skip)]
    pub issued_at: i64,

    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    /// Combine verified claims with the current stored account.
    pub fn from_parts(claims: Claims, user: &StoredUser) -> Self {
        Self {
            user_id: claims.sub,
            role: user.role,
            email: user.email.clone(),
            name: user.name.clone(),
            token_id: claims.jti,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
