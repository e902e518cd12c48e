// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account endpoints: registration, login, token refresh, logout and
//! password change.
//!
//! Login and refresh return the tokens in the body and also set them as
//! httpOnly cookies, so browser clients never handle them directly.

use axum::{
    body::Bytes,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::{
    hash_password, validate_password_strength, verify_password, Auth, AuthError, Role,
    TokenKind, TokenPair, ACCESS_COOKIE, REFRESH_COOKIE,
};
use crate::crypto::purpose;
use crate::error::ApiError;
use crate::rate_limit::client_ip;
use crate::response::ApiResponse;
use crate::state::AppState;
use crate::storage::{
    normalize_email, AuditEvent, AuditEventType, StoreError, StoredUser, UserResponse,
};

/// Client address, for audit entries on unauthenticated routes.
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(parts, state.config.trust_forwarded_for)))
    }
}

fn validate_mobile(mobile: &str) -> Result<(), validator::ValidationError> {
    if mobile.len() == 10 && mobile.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("mobile")
            .with_message("mobile number must be 10 digits".into()))
    }
}

pub(crate) fn validate_aadhaar(aadhaar: &str) -> Result<(), validator::ValidationError> {
    if aadhaar.len() == 12 && aadhaar.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("aadhaar")
            .with_message("Aadhaar number must be 12 digits".into()))
    }
}

/// Request body for `POST /api/auth/register`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 100, message = "name must be 2 to 100 characters"))]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
    #[validate(custom(function = "validate_mobile"))]
    pub mobile: Option<String>,
    /// Defaults to `beneficiary`. Staff roles wait for admin approval.
    #[serde(default = "default_role")]
    pub role: Role,
    #[validate(length(max = 50))]
    pub employee_id: Option<String>,
    #[validate(length(max = 100))]
    pub department: Option<String>,
    #[validate(length(max = 100))]
    pub designation: Option<String>,
    #[validate(length(max = 100))]
    pub district: Option<String>,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(custom(function = "validate_aadhaar"))]
    pub aadhaar_number: Option<String>,
}

fn default_role() -> Role {
    Role::Beneficiary
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

/// Optional body for refresh and logout; the refresh cookie is used otherwise.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePasswordRequest {
    #[validate(length(min = 1, message = "current password is required"))]
    pub current_password: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub new_password: String,
}

/// Tokens and account returned by login, refresh and password change.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

impl SessionResponse {
    fn new(user: StoredUser, pair: TokenPair, state: &AppState) -> Self {
        Self {
            user: user.into(),
            access_token: pair.access.token,
            refresh_token: pair.refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: state.tokens.access_ttl().as_secs(),
        }
    }
}

fn session_cookie(name: &'static str, value: String, state: &AppState) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

fn set_session_cookies(jar: CookieJar, pair: &TokenPair, state: &AppState) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, pair.access.token.clone(), state))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh.token.clone(), state))
}

fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

/// Refresh token from the JSON body, falling back to the cookie.
fn presented_refresh_token(jar: &CookieJar, body: &Bytes) -> Result<Option<String>, ApiError> {
    let request: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };
    Ok(request
        .refresh_token
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .filter(|t| !t.is_empty()))
}

/// Build a new account record from registration input.
async fn new_account(
    state: &AppState,
    request: RegisterRequest,
    approved: bool,
) -> Result<StoredUser, ApiError> {
    let now = Utc::now();
    let password_hash = hash_password(request.password, state.config.bcrypt_cost).await?;

    let (aadhaar, aadhaar_digest) = match request.aadhaar_number.as_deref() {
        Some(number) => (
            Some(state.cipher.encrypt(purpose::AADHAAR, number)?),
            Some(state.cipher.hash(number)),
        ),
        None => (None, None),
    };

    Ok(StoredUser {
        id: uuid::Uuid::new_v4().to_string(),
        email: normalize_email(&request.email),
        name: request.name.trim().to_string(),
        mobile: request.mobile,
        role: request.role,
        employee_id: request.employee_id,
        department: request.department,
        designation: request.designation,
        district: request.district,
        state: request.state,
        aadhaar,
        aadhaar_digest,
        password_hash,
        is_active: true,
        is_approved: approved,
        approved_by: None,
        approved_at: approved.then_some(now),
        failed_login_attempts: 0,
        locked_until: None,
        last_login: None,
        password_changed_at: None,
        refresh_tokens: Vec::new(),
        created_at: now,
        updated_at: now,
    })
}

/// Issue a token pair and remember the refresh digest on the account.
fn start_session(state: &AppState, user_id: &str, role: Role) -> Result<(StoredUser, TokenPair), ApiError> {
    let now = Utc::now();
    let pair = state.tokens.issue_pair(user_id, role, now)?;
    let digest = state.cipher.hash(&pair.refresh.token);
    let (user, ()) = state.users().update(user_id, |u| {
        u.record_login(now);
        u.remember_refresh_token(digest);
        Ok(())
    })?;
    Ok((user, pair))
}

/// Register a new account.
///
/// Beneficiaries are active immediately; staff accounts wait for an admin to
/// approve them. Admin accounts cannot be self-registered.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<UserResponse>),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Role cannot self-register"),
        (status = 409, description = "Email, mobile, employee id or Aadhaar already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>), ApiError> {
    request.validate()?;
    if request.role == Role::Admin {
        return Err(ApiError::forbidden("Admin accounts cannot be self-registered")
            .with_code("role_not_allowed"));
    }

    let approved = request.role.auto_approved();
    let user = new_account(&state, request, approved).await?;
    state.users().create(&user)?;

    tracing::info!(user_id = %user.id, role = %user.role, approved, "User registered");
    crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::UserRegistered)
        .with_user(&user.id)
        .with_role(user.role)
        .with_resource("user", &user.id)
        .with_ip(ip));

    let message = if approved {
        "Registration successful"
    } else {
        "Registration successful, pending admin approval"
    };
    Ok(ApiResponse::created(message, user.into()))
}

/// Log in with email and password.
///
/// Five consecutive failures lock the account for 30 minutes.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = ApiResponse<SessionResponse>),
        (status = 401, description = "Invalid credentials or inactive account"),
        (status = 403, description = "Account pending approval"),
        (status = 423, description = "Account locked")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<SessionResponse>>), ApiError> {
    request.validate()?;
    let now = Utc::now();

    let deny = |user: Option<&StoredUser>, err: AuthError| {
        tracing::warn!(
            user_id = user.map(|u| u.id.as_str()).unwrap_or("-"),
            ip = %ip,
            error_code = err.error_code(),
            "Login failed"
        );
        let mut event = AuditEvent::new(AuditEventType::UserLogin)
            .with_ip(ip.clone())
            .failed(err.error_code());
        if let Some(user) = user {
            event = event.with_user(&user.id).with_role(user.role);
        }
        crate::audit_log!(@write &state.files, event);
        ApiError::from(err)
    };

    let Some(user) = state.users().find_by_email(&request.email)? else {
        return Err(deny(None, AuthError::InvalidCredentials));
    };

    if user.is_locked(now) {
        return Err(deny(Some(&user), AuthError::AccountLocked));
    }

    if !verify_password(request.password, user.password_hash.clone()).await? {
        let (user, locked) = state
            .users()
            .update(&user.id, |u| Ok(u.record_failed_login(now)))?;
        let err = if locked {
            AuthError::AccountLocked
        } else {
            AuthError::InvalidCredentials
        };
        return Err(deny(Some(&user), err));
    }

    if !user.is_active {
        return Err(deny(Some(&user), AuthError::UserInactive));
    }
    if !user.is_approved {
        return Err(deny(Some(&user), AuthError::PendingApproval));
    }

    let (user, pair) = start_session(&state, &user.id, user.role)?;

    tracing::info!(user_id = %user.id, role = %user.role, "User logged in");
    crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::UserLogin)
        .with_user(&user.id)
        .with_role(user.role)
        .with_ip(ip));

    let jar = set_session_cookies(jar, &pair, &state);
    Ok((jar, ApiResponse::ok("Login successful", SessionResponse::new(user, pair, &state))))
}

/// Exchange a refresh token for a new token pair.
///
/// Each refresh token is single use. Presenting one that was already used
/// revokes every refresh token of the account.
#[utoipa::path(
    post,
    path = "/api/auth/refresh-token",
    tag = "Auth",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is set"),
    responses(
        (status = 200, description = "Tokens rotated", body = ApiResponse<SessionResponse>),
        (status = 401, description = "Refresh token missing, invalid or revoked")
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<ApiResponse<SessionResponse>>), ApiError> {
    let token = presented_refresh_token(&jar, &body)?.ok_or(AuthError::MissingToken)?;
    let claims = state.tokens.verify(&token, TokenKind::Refresh)?;

    let user = match state.users().get(&claims.sub) {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => return Err(AuthError::UserInactive.into()),
        Err(e) => return Err(e.into()),
    };
    if !user.is_active {
        return Err(AuthError::UserInactive.into());
    }
    if user.token_predates_password_change(claims.iat) {
        return Err(AuthError::TokenRevoked.into());
    }

    let now = Utc::now();
    let pair = state.tokens.issue_pair(&user.id, user.role, now)?;
    let presented = state.cipher.hash(&token);
    let replacement = state.cipher.hash(&pair.refresh.token);

    let (user, live) = state.users().update(&user.id, |u| {
        if u.consume_refresh_token(&presented) {
            u.remember_refresh_token(replacement);
            Ok(true)
        } else {
            u.revoke_refresh_tokens();
            Ok(false)
        }
    })?;

    if !live {
        tracing::warn!(user_id = %user.id, ip = %ip, "Refresh token reuse detected, sessions revoked");
        crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::TokenRefreshed)
            .with_user(&user.id)
            .with_role(user.role)
            .with_ip(ip)
            .failed("token_reused"));
        return Err(AuthError::TokenRevoked.into());
    }

    crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::TokenRefreshed)
        .with_user(&user.id)
        .with_role(user.role)
        .with_ip(ip));

    let jar = set_session_cookies(jar, &pair, &state);
    Ok((jar, ApiResponse::ok("Token refreshed", SessionResponse::new(user, pair, &state))))
}

/// Log out: revoke the presented refresh token (or all of them) and clear cookies.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Auth",
    security(("bearer_auth" = [])),
    request_body(content = RefreshRequest, description = "Optional; without a token every session is revoked"),
    responses(
        (status = 200, description = "Logged out"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(
    Auth(user): Auth,
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<ApiResponse<()>>), ApiError> {
    let digest = presented_refresh_token(&jar, &body)?.map(|t| state.cipher.hash(&t));

    state.users().update(&user.user_id, |u| {
        match &digest {
            Some(digest) => {
                u.consume_refresh_token(digest);
            }
            None => u.revoke_refresh_tokens(),
        }
        Ok(())
    })?;

    tracing::info!(user_id = %user.user_id, "User logged out");
    crate::audit_log!(&state.files, AuditEventType::UserLogout, user);

    Ok((clear_session_cookies(jar), ApiResponse::ok("Logged out", ())))
}

/// Change the caller's password.
///
/// Tokens issued before the change stop working; a fresh pair is returned.
#[utoipa::path(
    put,
    path = "/api/auth/update-password",
    tag = "Auth",
    security(("bearer_auth" = [])),
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = ApiResponse<SessionResponse>),
        (status = 400, description = "New password too weak or unchanged"),
        (status = 401, description = "Current password is wrong")
    )
)]
pub async fn update_password(
    Auth(user): Auth,
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<UpdatePasswordRequest>,
) -> Result<(CookieJar, Json<ApiResponse<SessionResponse>>), ApiError> {
    request.validate()?;
    if request.current_password == request.new_password {
        return Err(ApiError::bad_request("New password must differ from the current one")
            .with_code("password_unchanged"));
    }

    let stored = state.users().get(&user.user_id)?;
    if !verify_password(request.current_password, stored.password_hash).await? {
        tracing::warn!(user_id = %user.user_id, "Password change with wrong current password");
        crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::PasswordChanged)
            .with_user(&user.user_id)
            .with_role(user.role)
            .failed("invalid_credentials"));
        return Err(AuthError::InvalidCredentials.into());
    }

    let password_hash = hash_password(request.new_password, state.config.bcrypt_cost).await?;
    let now = Utc::now();
    state.users().update(&user.user_id, |u| {
        u.password_hash = password_hash;
        u.password_changed_at = Some(now);
        u.revoke_refresh_tokens();
        Ok(())
    })?;

    let (stored, pair) = start_session(&state, &user.user_id, user.role)?;

    tracing::info!(user_id = %user.user_id, "Password changed");
    crate::audit_log!(&state.files, AuditEventType::PasswordChanged, user, "user", &user.user_id);

    let jar = set_session_cookies(jar, &pair, &state);
    Ok((jar, ApiResponse::ok("Password updated", SessionResponse::new(stored, pair, &state))))
}

/// The caller's own account.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = ApiResponse<UserResponse>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let stored = state.users().get(&user.user_id)?;
    Ok(ApiResponse::ok("Current user", stored.into()))
}

/// Create the configured admin account if no account uses that email yet.
///
/// Returns whether an account was created.
pub async fn ensure_bootstrap_admin(state: &AppState) -> Result<bool, ApiError> {
    let Some(admin) = state.config.bootstrap_admin.clone() else {
        return Ok(false);
    };
    if state.users().find_by_email(&admin.email)?.is_some() {
        return Ok(false);
    }

    let request = RegisterRequest {
        name: "Administrator".to_string(),
        email: admin.email,
        password: admin.password,
        mobile: None,
        role: Role::Admin,
        employee_id: None,
        department: None,
        designation: None,
        district: None,
        state: None,
        aadhaar_number: None,
    };
    request.validate()?;

    let user = new_account(state, request, true).await?;
    state.users().create(&user)?;
    tracing::info!(user_id = %user.id, email = %user.email, "Bootstrap admin created");
    crate::audit_log!(@write &state.files, AuditEvent::new(AuditEventType::UserRegistered)
        .with_user(&user.id)
        .with_role(Role::Admin)
        .with_resource("user", &user.id)
        .with_details(serde_json::json!({ "bootstrap": true })));
    Ok(true)
}
