// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Disbursement Settlement Worker
//!
//! Background task that settles initiated disbursements from the durable job
//! queue written by [`FundRepository::apply`](crate::storage::FundRepository::apply).
//!
//! ## Strategy
//!
//! Each sweep loads the jobs whose `due_at` has passed and, per fund:
//! 1. `initiated` → `processing` with a generated transaction id.
//! 2. `processing` → `successful` with a generated UTR. The beneficiary is
//!    marked disbursed in the same transaction.
//! 3. Jobs whose fund is no longer in flight are dropped.
//!
//! A guard failure (for example the beneficiary is no longer approved) fails
//! the transaction. A storage failure reschedules the job with backoff and,
//! after [`MAX_SETTLEMENT_ATTEMPTS`], fails the transaction.
//!
//! Jobs survive restarts; a fund left in `processing` by a crash is completed
//! on the next sweep.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown. The
//! worker also wakes early when [`AppState::disbursements`] is notified.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::Role;
use crate::domain::{Actor, Fund, FundEvent, TransactionStatus, SYSTEM_ACTOR_ID};
use crate::state::AppState;
use crate::storage::{
    AuditEvent, AuditEventType, DisbursementJob, DisbursementQueue, StoreError, StoreResult,
};

/// Storage failures tolerated per job before the transaction is failed.
pub const MAX_SETTLEMENT_ATTEMPTS: u32 = 5;

/// Upper bound on the retry backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// What a sweep did with one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed { utr_number: String },
    Failed { reason: String },
    Rescheduled { attempts: u32 },
    Dropped,
}

/// Background settlement worker.
pub struct DisbursementWorker {
    state: AppState,
    poll_interval: Duration,
}

impl DisbursementWorker {
    pub fn new(state: AppState) -> Self {
        let poll_interval = state.config.disbursement_poll_interval;
        Self {
            state,
            poll_interval,
        }
    }

    /// Run the worker loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(worker.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Disbursement worker starting"
        );
        let wake = self.state.disbursements.clone();

        loop {
            if shutdown.is_cancelled() {
                info!("Disbursement worker shutting down");
                return;
            }

            self.sweep(Utc::now());

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = wake.notified() => {},
                _ = shutdown.cancelled() => {
                    info!("Disbursement worker shutting down");
                    return;
                }
            }
        }
    }

    /// Settle every job due at `now`. Returns the outcome per fund.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<(String, Settlement)> {
        let queue = DisbursementQueue::new(&self.state.db);
        let jobs = match queue.due(now) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Disbursement worker: failed to load due jobs");
                return Vec::new();
            }
        };
        if jobs.is_empty() {
            return Vec::new();
        }

        info!(count = jobs.len(), "Disbursement worker: settling due jobs");
        jobs.into_iter()
            .map(|job| {
                let outcome = self.settle(&queue, &job, now);
                (job.fund_id, outcome)
            })
            .collect()
    }

    fn settle(&self, queue: &DisbursementQueue<'_>, job: &DisbursementJob, now: DateTime<Utc>) -> Settlement {
        match self.advance(&job.fund_id, now) {
            Ok(Some(fund)) => {
                let utr_number = fund.transaction.utr_number.clone().unwrap_or_default();
                info!(
                    fund_id = %fund.id,
                    beneficiary_id = %fund.beneficiary_id,
                    utr_number = %utr_number,
                    "Disbursement completed"
                );
                self.audit(AuditEventType::DisbursementCompleted, &fund.id, serde_json::json!({
                    "utr_number": utr_number,
                    "beneficiary_id": fund.beneficiary_id,
                    "amount": fund.amount.disbursed.to_string(),
                }), None);
                Settlement::Completed { utr_number }
            }
            Ok(None) => {
                drop_job(queue, &job.fund_id);
                Settlement::Dropped
            }
            Err(StoreError::Transition(e)) => self.fail(queue, &job.fund_id, e.to_string(), now),
            Err(StoreError::NotFound(_)) => {
                drop_job(queue, &job.fund_id);
                Settlement::Dropped
            }
            Err(e) => {
                let attempts = job.attempts + 1;
                warn!(fund_id = %job.fund_id, attempts, error = %e, "Disbursement settlement failed");
                if attempts >= MAX_SETTLEMENT_ATTEMPTS {
                    return self.fail(
                        queue,
                        &job.fund_id,
                        format!("settlement failed after {attempts} attempts: {e}"),
                        now,
                    );
                }
                let retry_at = now + backoff(self.poll_interval, attempts);
                match queue.record_attempt(&job.fund_id, &e.to_string(), retry_at) {
                    Ok(Some(attempts)) => Settlement::Rescheduled { attempts },
                    Ok(None) => Settlement::Dropped,
                    Err(e) => {
                        warn!(fund_id = %job.fund_id, error = %e, "Failed to reschedule disbursement job");
                        Settlement::Rescheduled { attempts }
                    }
                }
            }
        }
    }

    /// Drive the fund to `successful`. `None` when it is not in flight.
    fn advance(&self, fund_id: &str, now: DateTime<Utc>) -> StoreResult<Option<Fund>> {
        let funds = self.state.funds();
        let mut fund = funds.get(fund_id)?;
        let system = system_actor();

        if fund.transaction.status == TransactionStatus::Initiated {
            let transaction_id = generate_reference("TXN", 12);
            fund = funds.apply(fund_id, FundEvent::Process { transaction_id }, &system, now)?;
            self.audit(AuditEventType::DisbursementProcessing, fund_id, serde_json::json!({
                "transaction_id": fund.transaction.transaction_id,
            }), None);
        }
        if fund.transaction.status != TransactionStatus::Processing {
            return Ok(None);
        }

        // the beneficiary records the officer who initiated the payment
        let initiator = fund
            .transaction
            .initiated_by
            .clone()
            .map(|id| Actor::new(id, Role::SchemeOfficer))
            .unwrap_or(system);
        let utr_number = generate_reference("UTR", 16);
        funds
            .apply(fund_id, FundEvent::Complete { utr_number }, &initiator, now)
            .map(Some)
    }

    fn fail(&self, queue: &DisbursementQueue<'_>, fund_id: &str, reason: String, now: DateTime<Utc>) -> Settlement {
        warn!(fund_id = %fund_id, reason = %reason, "Disbursement failed");
        let event = FundEvent::Fail {
            reason: reason.clone(),
        };
        if let Err(e) = self.state.funds().apply(fund_id, event, &system_actor(), now) {
            warn!(fund_id = %fund_id, error = %e, "Could not mark disbursement failed");
            drop_job(queue, fund_id);
        }
        self.audit(
            AuditEventType::DisbursementFailed,
            fund_id,
            serde_json::json!({ "reason": reason }),
            Some(&reason),
        );
        Settlement::Failed { reason }
    }

    fn audit(&self, event_type: AuditEventType, fund_id: &str, details: serde_json::Value, error: Option<&str>) {
        let mut event = AuditEvent::new(event_type)
            .with_user(SYSTEM_ACTOR_ID)
            .with_resource("fund", fund_id)
            .with_details(details);
        if let Some(error) = error {
            event = event.failed(error);
        }
        crate::audit_log!(@write &self.state.files, event);
    }
}

fn system_actor() -> Actor {
    Actor::new(SYSTEM_ACTOR_ID, Role::Admin)
}

fn drop_job(queue: &DisbursementQueue<'_>, fund_id: &str) {
    if let Err(e) = queue.remove(fund_id) {
        warn!(fund_id = %fund_id, error = %e, "Failed to drop disbursement job");
    }
}

/// Exponential backoff from the poll interval, capped at one minute.
fn backoff(poll_interval: Duration, attempts: u32) -> chrono::Duration {
    let factor = 2u32.saturating_pow(attempts.min(16));
    let delay = poll_interval.max(Duration::from_secs(1)).saturating_mul(factor).min(MAX_BACKOFF);
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

/// `prefix` followed by `len` uppercase hex characters.
fn generate_reference(prefix: &str, len: usize) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{prefix}{}", &hex[..len.min(hex.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fund::tests::sample_fund;
    use crate::domain::ApplicationStatus;
    use crate::test_support::{seed_approved_beneficiary, test_state};
    use chrono::Duration as ChronoDuration;

    fn officer() -> Actor {
        Actor::new("so-1", Role::SchemeOfficer)
    }

    /// An approved fund with a settlement job queued.
    fn initiated_fund(state: &AppState) -> Fund {
        let ben = seed_approved_beneficiary(&state.db);
        let funds = state.funds();
        let fund = funds.create(sample_fund(&ben, ChronoDuration::days(30))).unwrap();
        let now = Utc::now();
        funds
            .apply(&fund.id, FundEvent::Approve { remarks: None }, &officer(), now)
            .unwrap();
        funds
            .apply(&fund.id, FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap()
    }

    #[test]
    fn sweep_completes_initiated_fund() {
        let (state, _dir) = test_state();
        let fund = initiated_fund(&state);
        let worker = DisbursementWorker::new(state.clone());

        let outcomes = worker.sweep(Utc::now());
        assert_eq!(outcomes.len(), 1);
        let Settlement::Completed { utr_number } = &outcomes[0].1 else {
            panic!("unexpected outcome {:?}", outcomes[0].1);
        };
        assert!(utr_number.starts_with("UTR"));
        assert_eq!(utr_number.len(), 19);

        let settled = state.funds().get(&fund.id).unwrap();
        assert_eq!(settled.transaction.status, TransactionStatus::Successful);
        assert!(settled.transaction.transaction_id.unwrap().starts_with("TXN"));

        let beneficiary = state.beneficiaries().get(&fund.beneficiary_id).unwrap();
        assert_eq!(beneficiary.application_status, ApplicationStatus::Disbursed);
        assert_eq!(beneficiary.disbursed_by.as_deref(), Some("so-1"));

        assert!(DisbursementQueue::new(&state.db).all().unwrap().is_empty());
        assert!(worker.sweep(Utc::now()).is_empty());
    }

    #[test]
    fn jobs_wait_until_due() {
        let (state, _dir) = test_state();
        initiated_fund(&state);
        let worker = DisbursementWorker::new(state.clone());

        let earlier = Utc::now() - ChronoDuration::seconds(30);
        assert!(worker.sweep(earlier).is_empty());
    }

    #[test]
    fn guard_failure_fails_the_transaction() {
        let (state, _dir) = test_state();
        let fund = initiated_fund(&state);
        state
            .beneficiaries()
            .update(&fund.beneficiary_id, |b| {
                b.application_status = ApplicationStatus::Rejected;
                Ok(())
            })
            .unwrap();

        let outcomes = DisbursementWorker::new(state.clone()).sweep(Utc::now());
        assert!(matches!(outcomes[0].1, Settlement::Failed { .. }));

        let failed = state.funds().get(&fund.id).unwrap();
        assert_eq!(failed.transaction.status, TransactionStatus::Failed);
        assert_eq!(failed.transaction.retry_count, 1);
        assert!(DisbursementQueue::new(&state.db).all().unwrap().is_empty());
    }

    #[test]
    fn stale_job_is_dropped() {
        let (state, _dir) = test_state();
        let fund = initiated_fund(&state);
        state
            .db
            .write(|txn| {
                let mut jobs = txn.open_table(crate::storage::database::DISBURSEMENT_JOBS)?;
                crate::storage::repository::disbursements::enqueue(
                    &mut jobs,
                    &DisbursementJob::new("missing-fund", Utc::now(), ChronoDuration::zero()),
                )
            })
            .unwrap();

        let outcomes = DisbursementWorker::new(state.clone()).sweep(Utc::now());
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .any(|(id, o)| id == "missing-fund" && *o == Settlement::Dropped));
        assert!(outcomes
            .iter()
            .any(|(id, o)| id == &fund.id && matches!(o, Settlement::Completed { .. })));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let poll = Duration::from_secs(1);
        assert_eq!(backoff(poll, 1), chrono::Duration::seconds(2));
        assert_eq!(backoff(poll, 3), chrono::Duration::seconds(8));
        assert_eq!(backoff(poll, 10), chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (state, _dir) = test_state();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(DisbursementWorker::new(state).run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
