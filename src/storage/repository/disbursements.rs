// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable settlement queue.
//!
//! A job is written in the same transaction that initiates (or retries) a
//! disbursement and removed in the one that completes, fails or cancels it.
//! Jobs survive restarts, so settlement is delivered at least once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::database::{
    load, load_all, remove, store, PortalDatabase, RecordTable, DISBURSEMENT_JOBS,
};
use super::super::StoreResult;

/// A pending settlement for one fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DisbursementJob {
    pub fund_id: String,
    pub enqueued_at: DateTime<Utc>,
    /// Not processed before this instant.
    pub due_at: DateTime<Utc>,
    /// Failed processing attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl DisbursementJob {
    pub fn new(fund_id: &str, now: DateTime<Utc>, delay: Duration) -> Self {
        Self {
            fund_id: fund_id.to_string(),
            enqueued_at: now,
            due_at: now + delay,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Insert or replace the job for `job.fund_id` inside an open transaction.
pub(crate) fn enqueue(table: &mut RecordTable<'_>, job: &DisbursementJob) -> StoreResult<()> {
    store(table, &job.fund_id, job)
}

/// Repository view over the queue.
pub struct DisbursementQueue<'a> {
    db: &'a PortalDatabase,
}

impl<'a> DisbursementQueue<'a> {
    pub fn new(db: &'a PortalDatabase) -> Self {
        Self { db }
    }

    /// Jobs due at `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> StoreResult<Vec<DisbursementJob>> {
        let mut jobs: Vec<DisbursementJob> = self
            .all()?
            .into_iter()
            .filter(|job| job.due_at <= now)
            .collect();
        jobs.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        Ok(jobs)
    }

    pub fn all(&self) -> StoreResult<Vec<DisbursementJob>> {
        self.db
            .read(|txn| load_all(&txn.open_table(DISBURSEMENT_JOBS)?))
    }

    pub fn get(&self, fund_id: &str) -> StoreResult<Option<DisbursementJob>> {
        self.db
            .read(|txn| load(&txn.open_table(DISBURSEMENT_JOBS)?, fund_id))
    }

    /// Count a failed attempt and push the job back to `retry_at`.
    ///
    /// Returns the attempt count, or `None` if the job is gone.
    pub fn record_attempt(
        &self,
        fund_id: &str,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        self.db.write(|txn| {
            let mut table = txn.open_table(DISBURSEMENT_JOBS)?;
            let Some(mut job) = load::<DisbursementJob, _>(&table, fund_id)? else {
                return Ok(None);
            };
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            job.due_at = retry_at;
            store(&mut table, fund_id, &job)?;
            Ok(Some(job.attempts))
        })
    }

    pub fn remove(&self, fund_id: &str) -> StoreResult<bool> {
        self.db.write(|txn| {
            let mut table = txn.open_table(DISBURSEMENT_JOBS)?;
            remove(&mut table, fund_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::tests::temp_db;

    fn put(db: &PortalDatabase, job: &DisbursementJob) {
        db.write(|txn| {
            let mut table = txn.open_table(DISBURSEMENT_JOBS)?;
            enqueue(&mut table, job)
        })
        .unwrap();
    }

    #[test]
    fn due_returns_only_ripe_jobs_in_order() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        put(&db, &DisbursementJob::new("late", now - Duration::seconds(10), Duration::seconds(5)));
        put(&db, &DisbursementJob::new("early", now - Duration::seconds(20), Duration::seconds(5)));
        put(&db, &DisbursementJob::new("future", now, Duration::seconds(60)));

        let queue = DisbursementQueue::new(&db);
        let due: Vec<String> = queue.due(now).unwrap().into_iter().map(|j| j.fund_id).collect();
        assert_eq!(due, vec!["early".to_string(), "late".to_string()]);
    }

    #[test]
    fn record_attempt_reschedules() {
        let (db, _dir) = temp_db();
        let now = Utc::now();
        put(&db, &DisbursementJob::new("f1", now, Duration::zero()));

        let queue = DisbursementQueue::new(&db);
        let later = now + Duration::seconds(30);
        assert_eq!(queue.record_attempt("f1", "db busy", later).unwrap(), Some(1));
        assert!(queue.due(now).unwrap().is_empty());

        let job = queue.get("f1").unwrap().unwrap();
        assert_eq!(job.last_error.as_deref(), Some("db busy"));
        assert_eq!(job.due_at, later);

        assert!(queue.remove("f1").unwrap());
        assert_eq!(queue.record_attempt("f1", "x", later).unwrap(), None);
    }
}
