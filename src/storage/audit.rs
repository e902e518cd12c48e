// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Every state change, sensitive read and access denial is appended to a
//! daily JSONL file under `audit/{date}/events.jsonl`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{FileError, FileResult, FileStorage};
use crate::auth::Role;

/// Longest range a single audit query may span.
pub const MAX_QUERY_DAYS: i64 = 92;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Account events
    UserRegistered,
    UserLogin,
    UserLogout,
    TokenRefreshed,
    PasswordChanged,
    UserApproved,
    UserDeactivated,

    // Access events
    AuthFailure,
    PermissionDenied,
    SensitiveDataAccessed,

    // Beneficiary events
    BeneficiaryCreated,
    BeneficiaryUpdated,
    BeneficiaryDeleted,
    BeneficiaryStatusChanged,
    DocumentUploaded,
    DocumentVerified,

    // Fund events
    FundCreated,
    FundApproved,
    FundRejected,
    DisbursementInitiated,
    DisbursementProcessing,
    DisbursementCompleted,
    DisbursementFailed,
    DisbursementRetried,
    DisbursementCancelled,

    // Grievance events
    GrievanceCreated,
    GrievanceAssigned,
    GrievanceResolved,
    GrievanceEscalated,
    GrievanceClosed,
    GrievanceRejected,
    GrievanceCommented,
    FeedbackSubmitted,

    // Oversight events
    AuditExported,
    ReportGenerated,
}

impl AuditEventType {
    /// The snake_case wire name.
    pub fn name(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Role of that user at the time.
    pub user_role: Option<Role>,
    /// Resource affected (beneficiary id, fund id, etc.).
    pub resource_id: Option<String>,
    /// Resource type (beneficiary, fund, grievance, user).
    pub resource_type: Option<String>,
    /// IP address of the request (if available).
    pub ip_address: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            user_role: None,
            resource_id: None,
            resource_type: None,
            ip_address: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.user_role = Some(role);
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Filters for `GET /api/audit/logs` and `/api/audit/export`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditFilter {
    /// First day (inclusive, `YYYY-MM-DD`). Defaults to 7 days before `to`.
    pub from: Option<NaiveDate>,
    /// Last day (inclusive). Defaults to today.
    pub to: Option<NaiveDate>,
    pub user_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub success: Option<bool>,
}

impl AuditFilter {
    /// Resolved inclusive date range, or an error message if it is invalid.
    pub fn date_range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), String> {
        let to = self.to.unwrap_or(today);
        let from = self.from.unwrap_or(to - Duration::days(6));
        if from > to {
            return Err("`from` must not be after `to`".to_string());
        }
        if (to - from).num_days() >= MAX_QUERY_DAYS {
            return Err(format!("date range may span at most {MAX_QUERY_DAYS} days"));
        }
        Ok((from, to))
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            filter.as_ref().is_none_or(|f| value.as_deref() == Some(f.as_str()))
        }

        eq(&self.user_id, &event.user_id)
            && eq(&self.resource_type, &event.resource_type)
            && eq(&self.resource_id, &event.resource_id)
            && self.event_type.is_none_or(|t| t == event.event_type)
            && self.success.is_none_or(|s| s == event.success)
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    files: &'a FileStorage,
}

impl<'a> AuditRepository<'a> {
    pub fn new(files: &'a FileStorage) -> Self {
        Self { files }
    }

    /// Append an event to its day's JSONL file.
    pub fn log(&self, event: &AuditEvent) -> FileResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = self.files.paths().audit_events_file(&date);
        let line = serde_json::to_string(event)
            .map_err(|e| FileError::Io(std::io::Error::other(e)))?;
        self.files.append_line(path, &line)
    }

    /// Read audit events for a specific date. A day without events is empty.
    pub fn read_events(&self, date: NaiveDate) -> FileResult<Vec<AuditEvent>> {
        let path = self
            .files
            .paths()
            .audit_events_file(&date.format("%Y-%m-%d").to_string());
        let content = match self.files.read_raw(&path) {
            Ok(content) => content,
            Err(FileError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut events = Vec::new();
        for line in String::from_utf8_lossy(&content).lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(date = %date, error = %e, "Skipping malformed audit line");
                }
            }
        }
        Ok(events)
    }

    /// Read events for an inclusive date range, oldest first.
    pub fn read_events_range(&self, start: NaiveDate, end: NaiveDate) -> FileResult<Vec<AuditEvent>> {
        let mut all_events = Vec::new();
        let mut current = start;
        while current <= end {
            all_events.extend(self.read_events(current)?);
            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(all_events)
    }

    /// Events in `[from, to]` matching `filter`, newest first.
    pub fn query(&self, filter: &AuditFilter, from: NaiveDate, to: NaiveDate) -> FileResult<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .read_events_range(from, to)?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }
}

/// Render events as CSV with a header row.
pub fn events_to_csv(events: &[AuditEvent]) -> String {
    fn field(value: &str) -> String {
        if value.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }

    let mut out = String::from(
        "event_id,timestamp,event_type,user_id,user_role,resource_type,resource_id,ip_address,success,error,details\n",
    );
    for e in events {
        let details = e
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        let row = [
            e.event_id.clone(),
            e.timestamp.to_rfc3339(),
            e.event_type.name(),
            e.user_id.clone().unwrap_or_default(),
            e.user_role.map(|r| r.as_str().to_string()).unwrap_or_default(),
            e.resource_type.clone().unwrap_or_default(),
            e.resource_id.clone().unwrap_or_default(),
            e.ip_address.clone().unwrap_or_default(),
            e.success.to_string(),
            e.error.clone().unwrap_or_default(),
            details,
        ];
        let line: Vec<String> = row.iter().map(|v| field(v)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// Helper macro for logging audit events.
///
/// `$user` is anything with `user_id` and `role` fields. Write failures are
/// logged and never fail the request.
#[macro_export]
macro_rules! audit_log {
    (@write $files:expr, $event:expr) => {{
        let event: $crate::storage::AuditEvent = $event;
        let repo = $crate::storage::AuditRepository::new($files);
        if let Err(e) = repo.log(&event) {
            tracing::warn!(error = %e, event_type = ?event.event_type, "Failed to write audit event");
        }
    }};
    ($files:expr, $event_type:expr, $user:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type)
            .with_user(&$user.user_id)
            .with_role($user.role);
        $crate::audit_log!(@write $files, event);
    }};
    ($files:expr, $event_type:expr, $user:expr, $resource_type:expr, $resource_id:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type)
            .with_user(&$user.user_id)
            .with_role($user.role)
            .with_resource($resource_type, $resource_id);
        $crate::audit_log!(@write $files, event);
    }};
    ($files:expr, $event_type:expr, $user:expr, $resource_type:expr, $resource_id:expr, $details:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type)
            .with_user(&$user.user_id)
            .with_role($user.role)
            .with_resource($resource_type, $resource_id)
            .with_details($details);
        $crate::audit_log!(@write $files, event);
    }};
}
