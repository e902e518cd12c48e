// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Portal-issued JWT authentication and role-based access control.
//!
//! ## Auth Flow
//!
//! 1. `POST /api/auth/login` verifies the bcrypt password and issues an
//!    access token (1 h) and a refresh token (7 d), both HS256. They are
//!    returned in the body and as httpOnly cookies.
//! 2. Clients send `Authorization: Bearer <jwt>` or the `access_token` cookie.
//! 3. On every request the server:
//!    - verifies signature, expiry (60 s leeway), issuer and token kind
//!    - reloads the account and rejects inactive, unapproved or
//!      password-changed-since-issue users
//!    - checks the role against the route's permission set
//!
//! ## Roles
//!
//! Route guards take a named [`PermissionSet`] (`ReviewerRoles`,
//! `FundViewers`, ...) rather than inline role lists.

pub mod claims;
pub mod error;
pub mod extractor;
pub mod password;
pub mod roles;
pub mod tokens;

pub use claims::{AuthenticatedUser, Claims, TokenKind};
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, OptionalAuth, RequireRoles, ACCESS_COOKIE, REFRESH_COOKIE};
pub use password::{hash_password, validate_password_strength, verify_password};
pub use roles::{
    AdminRoles, AuditRoles, FundViewers, OfficerRoles, PermissionSet, Registrars, ReportRoles,
    ReviewerRoles, Role, StaffRoles,
};
pub use tokens::{IssuedToken, TokenPair, TokenService};
