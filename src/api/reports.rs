// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Aggregate reports for administrators, scheme officers and auditors.
//!
//! Reports are computed on request from the stored records. An optional
//! `from`/`to` range restricts them to records created on those days.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::audit_log;
use crate::auth::{AuthenticatedUser, ReportRoles, RequireRoles};
use crate::domain::{ApplicationStatus, ApprovalStatus, TransactionStatus};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;
use crate::storage::AuditEventType;

/// Creation-date window shared by every report.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportRange {
    /// First day (inclusive, `YYYY-MM-DD`).
    pub from: Option<NaiveDate>,
    /// Last day (inclusive).
    pub to: Option<NaiveDate>,
}

impl ReportRange {
    fn validate(&self) -> Result<(), ApiError> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => Err(ApiError::bad_request(
                "`from` must not be after `to`",
            )
            .with_code("invalid_date_range")),
            _ => Ok(()),
        }
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.from.is_none_or(|from| day >= from) && self.to.is_none_or(|to| day <= to)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BeneficiaryStats {
    pub total: usize,
    /// Count per application status.
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FundStats {
    pub total: usize,
    pub awaiting_approval: usize,
    #[schema(value_type = String)]
    pub sanctioned: Decimal,
    #[schema(value_type = String)]
    pub disbursed: Decimal,
    #[schema(value_type = String)]
    pub pending: Decimal,
    /// Count per transaction status.
    pub by_transaction_status: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrievanceStats {
    pub total: usize,
    /// Open or in progress.
    pub active: usize,
    pub overdue: usize,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryReport {
    pub beneficiaries: BeneficiaryStats,
    pub funds: FundStats,
    pub grievances: GrievanceStats,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SchemeTotals {
    pub scheme_code: String,
    pub scheme_name: String,
    pub fund_count: usize,
    #[schema(value_type = String)]
    pub sanctioned: Decimal,
    #[schema(value_type = String)]
    pub disbursed: Decimal,
    #[schema(value_type = String)]
    pub pending: Decimal,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrievanceSlaReport {
    pub total: usize,
    /// Count per SLA status (`normal`, `warning`, `overdue`, `completed`).
    pub by_sla_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub overdue: usize,
    pub resolved: usize,
    pub resolved_within_target: usize,
    /// Mean hours from filing to resolution, over resolved tickets.
    pub average_resolution_hours: Option<f64>,
    /// Share of resolved tickets resolved within target, in percent.
    pub compliance_percent: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DistrictCount {
    pub state: String,
    pub district: String,
    pub total: usize,
    /// Submitted or under review.
    pub in_review: usize,
    pub approved: usize,
    pub disbursed: usize,
    pub rejected: usize,
}

fn record(state: &AppState, user: &AuthenticatedUser, report: &str) {
    tracing::info!(user_id = %user.user_id, report, "Report generated");
    audit_log!(
        &state.files,
        AuditEventType::ReportGenerated,
        user,
        "report",
        report,
        serde_json::json!({ "report": report })
    );
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Portal-wide counts and fund totals.
#[utoipa::path(
    get,
    path = "/api/reports/summary",
    tag = "Reports",
    security(("bearer_auth" = [])),
    params(ReportRange),
    responses(
        (status = 200, description = "Summary", body = ApiResponse<SummaryReport>),
        (status = 403, description = "Admin, scheme officer or auditor required")
    )
)]
pub async fn summary(
    RequireRoles(user, _): RequireRoles<ReportRoles>,
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> Result<Json<ApiResponse<SummaryReport>>, ApiError> {
    range.validate()?;
    let now = Utc::now();

    let mut beneficiaries = BeneficiaryStats {
        total: 0,
        by_status: BTreeMap::new(),
    };
    for b in state.beneficiaries().list()? {
        if range.contains(b.created_at) {
            beneficiaries.total += 1;
            *beneficiaries
                .by_status
                .entry(b.application_status.as_str().to_string())
                .or_default() += 1;
        }
    }

    let mut funds = FundStats {
        total: 0,
        awaiting_approval: 0,
        sanctioned: Decimal::ZERO,
        disbursed: Decimal::ZERO,
        pending: Decimal::ZERO,
        by_transaction_status: BTreeMap::new(),
    };
    for f in state.funds().list()? {
        if !range.contains(f.created_at) {
            continue;
        }
        funds.total += 1;
        if f.approval.status == ApprovalStatus::Pending {
            funds.awaiting_approval += 1;
        }
        funds.sanctioned += f.amount.sanctioned;
        funds.disbursed += f.amount.disbursed;
        funds.pending += f.amount.pending;
        *funds
            .by_transaction_status
            .entry(f.transaction.status.as_str().to_string())
            .or_default() += 1;
    }

    let mut grievances = GrievanceStats {
        total: 0,
        active: 0,
        overdue: 0,
        by_status: BTreeMap::new(),
    };
    for g in state.grievances().list(now)? {
        if !range.contains(g.created_at) {
            continue;
        }
        grievances.total += 1;
        grievances.active += usize::from(g.status.is_active());
        grievances.overdue += usize::from(g.is_overdue);
        *grievances
            .by_status
            .entry(g.status.as_str().to_string())
            .or_default() += 1;
    }

    record(&state, &user, "summary");
    Ok(ApiResponse::ok(
        "Summary report generated",
        SummaryReport {
            beneficiaries,
            funds,
            grievances,
            generated_at: now,
        },
    ))
}

/// Fund totals per scheme.
#[utoipa::path(
    get,
    path = "/api/reports/funds-by-scheme",
    tag = "Reports",
    security(("bearer_auth" = [])),
    params(ReportRange),
    responses(
        (status = 200, description = "Totals per scheme", body = ApiResponse<Vec<SchemeTotals>>),
        (status = 403, description = "Admin, scheme officer or auditor required")
    )
)]
pub async fn funds_by_scheme(
    RequireRoles(user, _): RequireRoles<ReportRoles>,
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> Result<Json<ApiResponse<Vec<SchemeTotals>>>, ApiError> {
    range.validate()?;

    let mut schemes: BTreeMap<String, SchemeTotals> = BTreeMap::new();
    for f in state.funds().list()? {
        if !range.contains(f.created_at) {
            continue;
        }
        let entry = schemes.entry(f.scheme_code.clone()).or_insert_with(|| SchemeTotals {
            scheme_code: f.scheme_code.clone(),
            scheme_name: f.scheme_name.clone(),
            fund_count: 0,
            sanctioned: Decimal::ZERO,
            disbursed: Decimal::ZERO,
            pending: Decimal::ZERO,
            successful: 0,
            failed: 0,
        });
        entry.fund_count += 1;
        entry.sanctioned += f.amount.sanctioned;
        entry.disbursed += f.amount.disbursed;
        entry.pending += f.amount.pending;
        match f.transaction.status {
            TransactionStatus::Successful => entry.successful += 1,
            TransactionStatus::Failed => entry.failed += 1,
            _ => {}
        }
    }

    record(&state, &user, "funds_by_scheme");
    Ok(ApiResponse::ok(
        "Scheme report generated",
        schemes.into_values().collect(),
    ))
}

/// Grievance SLA compliance.
#[utoipa::path(
    get,
    path = "/api/reports/grievance-sla",
    tag = "Reports",
    security(("bearer_auth" = [])),
    params(ReportRange),
    responses(
        (status = 200, description = "SLA statistics", body = ApiResponse<GrievanceSlaReport>),
        (status = 403, description = "Admin, scheme officer or auditor required")
    )
)]
pub async fn grievance_sla(
    RequireRoles(user, _): RequireRoles<ReportRoles>,
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> Result<Json<ApiResponse<GrievanceSlaReport>>, ApiError> {
    range.validate()?;

    let mut report = GrievanceSlaReport {
        total: 0,
        by_sla_status: BTreeMap::new(),
        by_category: BTreeMap::new(),
        overdue: 0,
        resolved: 0,
        resolved_within_target: 0,
        average_resolution_hours: None,
        compliance_percent: None,
    };
    let mut resolution_hours = 0.0;

    for g in state.grievances().list(Utc::now())? {
        if !range.contains(g.created_at) {
            continue;
        }
        report.total += 1;
        report.overdue += usize::from(g.is_overdue);
        *report
            .by_sla_status
            .entry(g.sla_status.as_str().to_string())
            .or_default() += 1;
        let category = serde_json::to_value(g.category)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        *report.by_category.entry(category).or_default() += 1;

        if let Some(resolution) = &g.resolution {
            report.resolved += 1;
            resolution_hours += resolution.resolution_hours;
            if resolution.resolution_hours <= f64::from(g.target_resolution_hours) {
                report.resolved_within_target += 1;
            }
        }
    }

    if report.resolved > 0 {
        let resolved = report.resolved as f64;
        report.average_resolution_hours = Some(round2(resolution_hours / resolved));
        report.compliance_percent =
            Some(round2(report.resolved_within_target as f64 * 100.0 / resolved));
    }

    record(&state, &user, "grievance_sla");
    Ok(ApiResponse::ok("Grievance SLA report generated", report))
}

/// Application counts per district.
#[utoipa::path(
    get,
    path = "/api/reports/beneficiaries-by-district",
    tag = "Reports",
    security(("bearer_auth" = [])),
    params(ReportRange),
    responses(
        (status = 200, description = "Counts per district", body = ApiResponse<Vec<DistrictCount>>),
        (status = 403, description = "Admin, scheme officer or auditor required")
    )
)]
pub async fn beneficiaries_by_district(
    RequireRoles(user, _): RequireRoles<ReportRoles>,
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> Result<Json<ApiResponse<Vec<DistrictCount>>>, ApiError> {
    range.validate()?;

    let mut districts: BTreeMap<(String, String), DistrictCount> = BTreeMap::new();
    for b in state.beneficiaries().list()? {
        if !range.contains(b.created_at) {
            continue;
        }
        let key = (b.address.state.clone(), b.address.district.clone());
        let entry = districts.entry(key).or_insert_with(|| DistrictCount {
            state: b.address.state.clone(),
            district: b.address.district.clone(),
            total: 0,
            in_review: 0,
            approved: 0,
            disbursed: 0,
            rejected: 0,
        });
        entry.total += 1;
        match b.application_status {
            ApplicationStatus::Submitted | ApplicationStatus::UnderReview => entry.in_review += 1,
            ApplicationStatus::Approved => entry.approved += 1,
            ApplicationStatus::Disbursed => entry.disbursed += 1,
            ApplicationStatus::Rejected => entry.rejected += 1,
            ApplicationStatus::Draft => {}
        }
    }

    record(&state, &user, "beneficiaries_by_district");
    Ok(ApiResponse::ok(
        "District report generated",
        districts.into_values().collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::auth::Role;
    use crate::domain::beneficiary::tests::sample;
    use crate::domain::fund::tests::sample_fund;
    use crate::domain::grievance::tests::sample_grievance;
    use crate::domain::Actor;
    use crate::test_support::{
        bearer, body_json, json_request, seed_approved_beneficiary, seed_user, test_state,
    };
    use axum::http::StatusCode;
    use chrono::Duration;
    use serde_json::Value;
    use tower::ServiceExt;

    struct Fixture {
        app: axum::Router,
        auth: String,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (state, dir) = test_state();
        let auditor = seed_user(&state, "au-1", "audit@example.gov.in", Role::Auditor);

        let approved = seed_approved_beneficiary(&state.db);
        for (i, district) in ["Sitapur", "Kheri"].into_iter().enumerate() {
            let mut b = sample("fo-1");
            b.id = format!("ben-extra-{i}");
            b.aadhaar_digest = format!("digest-{i}");
            b.mobile = format!("900000000{i}");
            b.address.district = district.to_string();
            state.beneficiaries().create(b).unwrap();
        }

        let funds = state.funds();
        let mut fund = sample_fund(&approved, Duration::days(30));
        fund.amount = crate::domain::Amount::sanctioned(Decimal::new(5_000_000, 2));
        funds.create(fund).unwrap();

        let now = Utc::now();
        let grievances = state.grievances();
        let mut late = sample_grievance("ben-user", now - Duration::hours(80));
        late.id = "grv-late".to_string();
        grievances.create(late).unwrap();

        let mut quick = sample_grievance("ben-user", now - Duration::hours(10));
        quick.id = "grv-quick".to_string();
        let quick = grievances.create(quick).unwrap();
        let officer = Actor::new("fo-1", Role::FieldOfficer);
        grievances
            .update(&quick.id, now, |g| {
                g.assign("fo-1", &Actor::new("admin-1", Role::Admin), now)?;
                g.resolve("Paid".to_string(), None, &officer, now)?;
                Ok(())
            })
            .unwrap();

        Fixture {
            auth: bearer(&state, &auditor),
            app: router(state),
            _dir: dir,
        }
    }

    async fn get(f: &Fixture, uri: &str) -> Value {
        let response = f
            .app
            .clone()
            .oneshot(json_request("GET", uri, Some(&f.auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn summary_counts_every_record() {
        let f = fixture();
        let body = get(&f, "/api/reports/summary").await;
        let data = &body["data"];

        assert_eq!(data["beneficiaries"]["total"], 3);
        assert_eq!(data["beneficiaries"]["by_status"]["approved"], 1);
        assert_eq!(data["beneficiaries"]["by_status"]["draft"], 2);
        assert_eq!(data["funds"]["total"], 1);
        assert_eq!(data["funds"]["awaiting_approval"], 1);
        assert_eq!(data["funds"]["sanctioned"], "50000.00");
        assert_eq!(data["funds"]["by_transaction_status"]["pending"], 1);
        assert_eq!(data["grievances"]["total"], 2);
        assert_eq!(data["grievances"]["overdue"], 1);
        assert_eq!(data["grievances"]["by_status"]["resolved"], 1);
    }

    #[tokio::test]
    async fn sla_report_measures_compliance() {
        let f = fixture();
        let body = get(&f, "/api/reports/grievance-sla").await;
        let data = &body["data"];

        assert_eq!(data["total"], 2);
        assert_eq!(data["by_sla_status"]["overdue"], 1);
        assert_eq!(data["by_sla_status"]["completed"], 1);
        assert_eq!(data["by_category"]["payment_delay"], 2);
        assert_eq!(data["resolved"], 1);
        assert_eq!(data["resolved_within_target"], 1);
        assert_eq!(data["average_resolution_hours"], 10.0);
        assert_eq!(data["compliance_percent"], 100.0);
    }

    #[tokio::test]
    async fn district_and_scheme_breakdowns() {
        let f = fixture();
        let body = get(&f, "/api/reports/beneficiaries-by-district").await;
        let districts = body["data"].as_array().unwrap();
        assert_eq!(districts.len(), 2);
        assert_eq!(districts[0]["district"], "Kheri");
        assert_eq!(districts[0]["total"], 1);
        assert_eq!(districts[1]["district"], "Sitapur");
        assert_eq!(districts[1]["total"], 2);
        assert_eq!(districts[1]["approved"], 1);

        let body = get(&f, "/api/reports/funds-by-scheme").await;
        assert_eq!(body["data"][0]["scheme_code"], "POA-RELIEF");
        assert_eq!(body["data"][0]["fund_count"], 1);
        assert_eq!(body["data"][0]["pending"], "50000.00");
    }

    #[tokio::test]
    async fn range_excludes_older_records() {
        let f = fixture();
        let tomorrow = (Utc::now() + Duration::days(1)).date_naive();
        let body = get(&f, &format!("/api/reports/summary?from={tomorrow}")).await;
        assert_eq!(body["data"]["beneficiaries"]["total"], 0);
        assert_eq!(body["data"]["funds"]["total"], 0);
    }

    #[tokio::test]
    async fn beneficiaries_cannot_read_reports() {
        let (state, _dir) = test_state();
        let ben = seed_user(&state, "ben-1", "ben@example.in", Role::Beneficiary);
        let auth = bearer(&state, &ben);
        let response = router(state)
            .oneshot(json_request("GET", "/api/reports/summary", Some(&auth), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
