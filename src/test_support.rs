// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for unit and router tests.

use axum::{body::Body, http::Request, response::Response};
use chrono::Utc;
use tempfile::TempDir;

use crate::auth::{AuthenticatedUser, Role, TokenKind};
use crate::config::Config;
use crate::domain::beneficiary::tests::sample;
use crate::domain::{Actor, ApplicationStatus};
use crate::state::AppState;
use crate::storage::repository::users::tests::sample_user;
use crate::storage::{BeneficiaryRepository, PortalDatabase, StoredUser};

/// State over a fresh temporary data directory.
pub(crate) fn test_state() -> (AppState, TempDir) {
    test_state_with(|_| {})
}

/// Like [`test_state`], with configuration overrides.
pub(crate) fn test_state_with(configure: impl FnOnce(&mut Config)) -> (AppState, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::development(temp_dir.path());
    config.disbursement_delay = std::time::Duration::ZERO;
    configure(&mut config);
    let state = AppState::new(config).expect("Failed to build state");
    (state, temp_dir)
}

/// An already-authenticated user, for inserting into request extensions.
pub(crate) fn user(id: &str, role: Role) -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: id.to_string(),
        role,
        email: format!("{id}@example.gov.in"),
        name: "Test User".to_string(),
        token_id: "test-jti".to_string(),
        issued_at: Utc::now().timestamp(),
        expires_at: Utc::now().timestamp() + 3600,
    }
}

/// Store an active, approved account.
pub(crate) fn seed_user(state: &AppState, id: &str, email: &str, role: Role) -> StoredUser {
    let stored = sample_user(id, email, role);
    state.users().create(&stored).expect("Failed to seed user");
    stored
}

/// `Bearer <access token>` header value for `user`.
pub(crate) fn bearer(state: &AppState, user: &StoredUser) -> String {
    let issued = state
        .tokens
        .issue(&user.id, user.role, TokenKind::Access, Utc::now())
        .expect("Failed to issue token");
    format!("Bearer {}", issued.token)
}

/// JSON request with an optional bearer header.
pub(crate) fn json_request(
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    builder.body(body).expect("Failed to build request")
}

/// Decode a response body as JSON.
pub(crate) async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

/// Store the sample beneficiary and walk it to `approved`; returns its id.
pub(crate) fn seed_approved_beneficiary(db: &PortalDatabase) -> String {
    let repo = BeneficiaryRepository::new(db);
    let created = repo.create(sample("fo-1")).expect("Failed to seed beneficiary");
    let registrar = Actor::new("fo-1", Role::FieldOfficer);
    let reviewer = Actor::new("so-1", Role::SchemeOfficer);
    let now = Utc::now();
    repo.update(&created.id, |b| {
        b.apply_status(ApplicationStatus::Submitted, &registrar, None, now)?;
        b.apply_status(ApplicationStatus::UnderReview, &reviewer, None, now)?;
        b.apply_status(ApplicationStatus::Approved, &reviewer, None, now)?;
        Ok(())
    })
    .expect("Failed to approve beneficiary");
    created.id
}
