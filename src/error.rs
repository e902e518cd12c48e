// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthError;
use crate::crypto::CryptoError;
use crate::domain::TransitionError;
use crate::storage::{FileError, StoreError};

/// Whether raw internal error detail is attached to 5xx bodies.
static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(true);

/// Toggle internal error detail in responses. Disabled in production.
pub fn expose_internal_details(enabled: bool) {
    EXPOSE_DETAILS.store(enabled, Ordering::Relaxed);
}

/// One failed input field.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
    pub errors: Vec<FieldError>,
    pub detail: Option<String>,
}

/// Error envelope returned for every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            errors: Vec::new(),
            detail: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
    }

    /// Internal failure. The cause is logged and only exposed outside production.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        let detail = detail.to_string();
        tracing::error!(error = %detail, "Internal server error");
        Self {
            detail: Some(detail),
            ..Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An unexpected error occurred",
            )
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self {
            errors,
            ..Self::new(
                StatusCode::BAD_REQUEST,
                "validation_failed",
                "One or more fields are invalid",
            )
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = if EXPOSE_DETAILS.load(Ordering::Relaxed) {
            self.detail
        } else {
            None
        };
        let body = Json(ErrorBody {
            success: false,
            message: self.message,
            error_code: self.code.to_string(),
            errors: self.errors,
            detail,
            timestamp: Utc::now(),
        });
        (self.status, body).into_response()
    }
}

/// Flatten nested and list errors into dotted paths such as
/// `address.pincode` or `family_members[0].name`.
fn collect_field_errors(errors: &validator::ValidationErrors, prefix: &str, out: &mut Vec<FieldError>) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                out.extend(field_errors.iter().map(|e| FieldError {
                    field: path.clone(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{path} is invalid ({})", e.code)),
                }));
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(inner, &format!("{path}[{index}]"), out);
                }
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = Vec::new();
        collect_field_errors(&errors, "", &mut fields);
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::validation(fields)
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        let status = if e.is_actor_violation() {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::BAD_REQUEST
        };
        ApiError::new(status, e.code(), e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            StoreError::AlreadyExists(what) => {
                ApiError::conflict(format!("{what} already exists")).with_code("duplicate")
            }
            StoreError::Conflict(msg) => ApiError::conflict(msg),
            StoreError::PermissionDenied { resource, .. } => {
                ApiError::forbidden(format!("You do not have access to this {resource}"))
                    .with_code("permission_denied")
            }
            StoreError::Transition(t) => t.into(),
            other => ApiError::internal(other),
        }
    }
}

impl From<FileError> for ApiError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            other => ApiError::internal(other),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(e: CryptoError) -> Self {
        ApiError::internal(&e).with_code(e.code())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Internal(detail) => ApiError::internal(detail),
            other => ApiError::new(other.status_code(), other.error_code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.code, "bad_request");

        let denied = ApiError::forbidden("no");
        assert_eq!(denied.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn into_response_returns_envelope() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "bad data");
        assert_eq!(body["error_code"], "bad_request");
        assert!(body["timestamp"].is_string());
        assert!(body.get("errors").is_none());
    }

    #[tokio::test]
    async fn validation_errors_are_listed() {
        let response = ApiError::validation(vec![FieldError {
            field: "email".into(),
            message: "invalid email".into(),
        }])
        .into_response();

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["errors"][0]["field"], "email");
        assert_eq!(body["error_code"], "validation_failed");
    }

    #[test]
    fn nested_and_list_errors_keep_their_path() {
        use validator::Validate;

        #[derive(Validate)]
        struct Member {
            #[validate(length(min = 2, message = "name is too short"))]
            name: String,
        }

        #[derive(Validate)]
        struct Address {
            #[validate(length(equal = 6, message = "pincode must be 6 digits"))]
            pincode: String,
        }

        #[derive(Validate)]
        struct Application {
            #[validate(nested)]
            address: Address,
            #[validate(nested)]
            members: Vec<Member>,
        }

        let application = Application {
            address: Address {
                pincode: "12".into(),
            },
            members: vec![
                Member { name: "Asha".into() },
                Member { name: "R".into() },
            ],
        };
        let err: ApiError = application.validate().unwrap_err().into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            err.errors,
            vec![
                FieldError {
                    field: "address.pincode".into(),
                    message: "pincode must be 6 digits".into(),
                },
                FieldError {
                    field: "members[1].name".into(),
                    message: "name is too short".into(),
                },
            ]
        );
    }

    #[test]
    fn transition_errors_map_to_status() {
        let err: ApiError = TransitionError::NotComplainant.into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err: ApiError = TransitionError::FeedbackAlreadySubmitted.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "feedback_already_submitted");
    }
}
