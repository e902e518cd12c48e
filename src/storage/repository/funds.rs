// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fund records and their state transitions.
//!
//! [`FundRepository::apply`] runs the fund state machine inside a single
//! write transaction together with its side effects:
//!
//! | Event                  | Side effect in the same transaction          |
//! |------------------------|----------------------------------------------|
//! | initiate, retry        | settlement job enqueued                      |
//! | complete               | beneficiary marked disbursed, job removed    |
//! | fail, cancel           | job removed                                  |

use chrono::{DateTime, Duration, Utc};

use super::super::database::{
    claim_unique, load_existing, remove, store, PortalDatabase, BENEFICIARIES, DISBURSEMENT_JOBS,
    FUNDS, FUND_INDEX,
};
use super::super::{OwnedResource, StoreResult};
use super::disbursements::{enqueue, DisbursementJob};
use crate::domain::{
    Actor, ApplicationStatus, Beneficiary, Fund, FundEvent, TransitionError,
};

/// Default delay between initiation and settlement.
pub const DEFAULT_SETTLEMENT_DELAY_SECS: i64 = 5;

impl OwnedResource for Fund {
    const RESOURCE: &'static str = "fund";

    fn created_by(&self) -> &str {
        &self.created_by
    }
}

fn scheme_key(fund: &Fund) -> String {
    format!("{}|{}", fund.beneficiary_id, fund.scheme_code)
}

/// Repository for fund records.
pub struct FundRepository<'a> {
    db: &'a PortalDatabase,
    settlement_delay: Duration,
}

impl<'a> FundRepository<'a> {
    pub fn new(db: &'a PortalDatabase) -> Self {
        Self {
            db,
            settlement_delay: Duration::seconds(DEFAULT_SETTLEMENT_DELAY_SECS),
        }
    }

    pub fn with_settlement_delay(mut self, delay: Duration) -> Self {
        self.settlement_delay = delay;
        self
    }

    /// Sanction a new fund for an approved beneficiary.
    ///
    /// One fund per (beneficiary, scheme) pair.
    pub fn create(&self, mut fund: Fund) -> StoreResult<Fund> {
        self.db.write(|txn| {
            {
                let beneficiaries = txn.open_table(BENEFICIARIES)?;
                let beneficiary: Beneficiary =
                    load_existing(&beneficiaries, &fund.beneficiary_id, "Beneficiary")?;
                if beneficiary.application_status != ApplicationStatus::Approved {
                    return Err(TransitionError::BeneficiaryNotApproved(
                        beneficiary.application_status,
                    )
                    .into());
                }
            }
            {
                let mut index = txn.open_table(FUND_INDEX)?;
                claim_unique(&mut index, &scheme_key(&fund), &fund.id, "Fund for this scheme")?;
            }

            fund.touch(fund.created_at);
            let mut funds = txn.open_table(FUNDS)?;
            store(&mut funds, &fund.id, &fund)?;
            Ok(fund)
        })
    }

    pub fn get(&self, id: &str) -> StoreResult<Fund> {
        self.db
            .read(|txn| load_existing(&txn.open_table(FUNDS)?, id, "Fund"))
    }

    /// All funds, newest first.
    pub fn list(&self) -> StoreResult<Vec<Fund>> {
        let mut all: Vec<Fund> = self.db.load_table(FUNDS)?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    /// Apply `event` and its side effects atomically.
    ///
    /// Nothing is written if the transition or any side effect fails.
    pub fn apply(
        &self,
        id: &str,
        event: FundEvent,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> StoreResult<Fund> {
        self.db.write(|txn| {
            let mut funds = txn.open_table(FUNDS)?;
            let mut fund: Fund = load_existing(&funds, id, "Fund")?;

            let side_effect = SideEffect::of(&event);
            fund.apply(event, actor, now)?;

            match side_effect {
                SideEffect::Enqueue => {
                    let mut jobs = txn.open_table(DISBURSEMENT_JOBS)?;
                    enqueue(&mut jobs, &DisbursementJob::new(id, now, self.settlement_delay))?;
                }
                SideEffect::Settle => {
                    let mut beneficiaries = txn.open_table(BENEFICIARIES)?;
                    let mut beneficiary: Beneficiary =
                        load_existing(&beneficiaries, &fund.beneficiary_id, "Beneficiary")?;
                    beneficiary.mark_disbursed(actor, now)?;
                    store(&mut beneficiaries, &beneficiary.id, &beneficiary)?;

                    let mut jobs = txn.open_table(DISBURSEMENT_JOBS)?;
                    remove(&mut jobs, id)?;
                }
                SideEffect::Dequeue => {
                    let mut jobs = txn.open_table(DISBURSEMENT_JOBS)?;
                    remove(&mut jobs, id)?;
                }
                SideEffect::None => {}
            }

            fund.touch(now);
            store(&mut funds, id, &fund)?;
            Ok(fund)
        })
    }
}

enum SideEffect {
    Enqueue,
    Settle,
    Dequeue,
    None,
}

impl SideEffect {
    fn of(event: &FundEvent) -> Self {
        match event {
            FundEvent::InitiateDisbursement | FundEvent::Retry => SideEffect::Enqueue,
            FundEvent::Complete { .. } => SideEffect::Settle,
            FundEvent::Fail { .. } | FundEvent::Cancel { .. } => SideEffect::Dequeue,
            FundEvent::Approve { .. } | FundEvent::Reject { .. } | FundEvent::Process { .. } => {
                SideEffect::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::domain::beneficiary::tests::sample;
    use crate::domain::fund::tests::sample_fund;
    use crate::domain::{ApprovalStatus, TransactionStatus};
    use crate::storage::database::tests::temp_db;
    use crate::storage::repository::{BeneficiaryRepository, DisbursementQueue};
    use crate::storage::StoreError;
    use crate::test_support::seed_approved_beneficiary;
    use rust_decimal::Decimal;

    fn officer() -> Actor {
        Actor::new("so-1", Role::SchemeOfficer)
    }

    #[test]
    fn create_requires_approved_beneficiary() {
        let (db, _dir) = temp_db();
        let draft = BeneficiaryRepository::new(&db).create(sample("fo-1")).unwrap();

        let err = FundRepository::new(&db)
            .create(sample_fund(&draft.id, Duration::days(30)))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::BeneficiaryNotApproved(ApplicationStatus::Draft))
        ));
    }

    #[test]
    fn one_fund_per_scheme() {
        let (db, _dir) = temp_db();
        let ben = seed_approved_beneficiary(&db);
        let repo = FundRepository::new(&db);

        let created = repo.create(sample_fund(&ben, Duration::days(30))).unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.amount.pending, created.amount.sanctioned);

        let mut dup = sample_fund(&ben, Duration::days(30));
        dup.id = "fund-2".into();
        assert!(matches!(repo.create(dup), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn full_disbursement_updates_beneficiary_atomically() {
        let (db, _dir) = temp_db();
        let ben = seed_approved_beneficiary(&db);
        let repo = FundRepository::new(&db).with_settlement_delay(Duration::zero());
        let fund = repo.create(sample_fund(&ben, Duration::days(30))).unwrap();
        let now = Utc::now();

        repo.apply(&fund.id, FundEvent::Approve { remarks: None }, &officer(), now)
            .unwrap();
        repo.apply(&fund.id, FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap();
        assert!(DisbursementQueue::new(&db).get(&fund.id).unwrap().is_some());

        repo.apply(
            &fund.id,
            FundEvent::Process {
                transaction_id: "TXN1".into(),
            },
            &officer(),
            now,
        )
        .unwrap();
        let done = repo
            .apply(
                &fund.id,
                FundEvent::Complete {
                    utr_number: "UTR1".into(),
                },
                &officer(),
                now,
            )
            .unwrap();

        assert_eq!(done.transaction.status, TransactionStatus::Successful);
        assert_eq!(done.amount.pending, Decimal::ZERO);
        assert_eq!(done.amount.disbursed, done.amount.sanctioned);
        assert_eq!(done.version, 5);
        assert!(DisbursementQueue::new(&db).get(&fund.id).unwrap().is_none());

        let beneficiary = BeneficiaryRepository::new(&db).get(&ben).unwrap();
        assert_eq!(beneficiary.application_status, ApplicationStatus::Disbursed);
        assert_eq!(beneficiary.disbursed_by.as_deref(), Some("so-1"));
    }

    #[test]
    fn failed_guard_writes_nothing() {
        let (db, _dir) = temp_db();
        let ben = seed_approved_beneficiary(&db);
        let repo = FundRepository::new(&db);
        let fund = repo.create(sample_fund(&ben, Duration::days(30))).unwrap();

        let err = repo
            .apply(&fund.id, FundEvent::InitiateDisbursement, &officer(), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::NotApproved(ApprovalStatus::Pending))
        ));

        let stored = repo.get(&fund.id).unwrap();
        assert_eq!(stored.version, 1);
        assert!(DisbursementQueue::new(&db).all().unwrap().is_empty());
    }

    #[test]
    fn cancel_removes_pending_job() {
        let (db, _dir) = temp_db();
        let ben = seed_approved_beneficiary(&db);
        let repo = FundRepository::new(&db);
        let fund = repo.create(sample_fund(&ben, Duration::days(30))).unwrap();
        let now = Utc::now();

        repo.apply(&fund.id, FundEvent::Approve { remarks: None }, &officer(), now)
            .unwrap();
        repo.apply(&fund.id, FundEvent::InitiateDisbursement, &officer(), now)
            .unwrap();
        repo.apply(&fund.id, FundEvent::Cancel { reason: None }, &officer(), now)
            .unwrap();

        assert!(DisbursementQueue::new(&db).all().unwrap().is_empty());
        assert_eq!(
            repo.get(&fund.id).unwrap().transaction.status,
            TransactionStatus::Cancelled
        );
    }
}
