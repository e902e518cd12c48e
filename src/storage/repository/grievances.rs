// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Grievance tickets.
//!
//! SLA fields are derived from wall-clock time, so every read and every save
//! refreshes them before the record leaves the repository.

use chrono::{DateTime, Utc};

use super::super::database::{
    claim_unique, load_existing, lookup_unique, next_sequence, store, PortalDatabase, GRIEVANCES,
    GRIEVANCE_INDEX,
};
use super::super::{OwnedResource, StoreError, StoreResult};
use crate::domain::Grievance;

impl OwnedResource for Grievance {
    const RESOURCE: &'static str = "grievance";

    fn created_by(&self) -> &str {
        &self.complainant_id
    }
}

fn ticket_key(ticket_number: &str) -> String {
    format!("ticket:{}", ticket_number.trim().to_ascii_uppercase())
}

/// Repository for grievance tickets.
pub struct GrievanceRepository<'a> {
    db: &'a PortalDatabase,
}

impl<'a> GrievanceRepository<'a> {
    pub fn new(db: &'a PortalDatabase) -> Self {
        Self { db }
    }

    /// File a ticket and assign its `GRV-<yyyymmdd>-<seq>` number.
    pub fn create(&self, mut grievance: Grievance) -> StoreResult<Grievance> {
        self.db.write(|txn| {
            let day = grievance.created_at.format("%Y%m%d").to_string();
            let seq = next_sequence(txn, &format!("grievance:{day}"))?;
            grievance.ticket_number = format!("GRV-{day}-{seq:04}");

            {
                let mut index = txn.open_table(GRIEVANCE_INDEX)?;
                claim_unique(
                    &mut index,
                    &ticket_key(&grievance.ticket_number),
                    &grievance.id,
                    "Ticket number",
                )?;
            }

            grievance.refresh_sla(grievance.created_at);
            let mut table = txn.open_table(GRIEVANCES)?;
            store(&mut table, &grievance.id, &grievance)?;
            Ok(grievance)
        })
    }

    pub fn get(&self, id: &str, now: DateTime<Utc>) -> StoreResult<Grievance> {
        let mut grievance: Grievance = self
            .db
            .read(|txn| load_existing(&txn.open_table(GRIEVANCES)?, id, "Grievance"))?;
        grievance.refresh_sla(now);
        Ok(grievance)
    }

    /// Look a ticket up by its public number (case-insensitive).
    pub fn find_by_ticket(&self, ticket_number: &str, now: DateTime<Utc>) -> StoreResult<Grievance> {
        let id = self
            .db
            .read(|txn| lookup_unique(&txn.open_table(GRIEVANCE_INDEX)?, &ticket_key(ticket_number)))?
            .ok_or_else(|| StoreError::NotFound("Grievance".to_string()))?;
        self.get(&id, now)
    }

    /// All tickets, newest first.
    pub fn list(&self, now: DateTime<Utc>) -> StoreResult<Vec<Grievance>> {
        let mut all: Vec<Grievance> = self.db.load_table(GRIEVANCES)?;
        for grievance in &mut all {
            grievance.refresh_sla(now);
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    /// Load, mutate and save a ticket in one transaction.
    pub fn update<T>(
        &self,
        id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Grievance) -> StoreResult<T>,
    ) -> StoreResult<(Grievance, T)> {
        self.db.write(|txn| {
            let mut table = txn.open_table(GRIEVANCES)?;
            let mut grievance: Grievance = load_existing(&table, id, "Grievance")?;

            let value = f(&mut grievance)?;
            grievance.updated_at = now;
            grievance.refresh_sla(now);

            store(&mut table, id, &grievance)?;
            Ok((grievance, value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::domain::grievance::tests::sample_grievance;
    use crate::domain::{Actor, GrievanceStatus, SlaStatus, TransitionError};
    use crate::storage::database::tests::temp_db;
    use chrono::{Duration, TimeZone};

    fn filed_on(id: &str, created_at: DateTime<Utc>) -> Grievance {
        let mut g = sample_grievance("ben-user", created_at);
        g.id = id.to_string();
        g
    }

    #[test]
    fn ticket_numbers_restart_each_day() {
        let (db, _dir) = temp_db();
        let repo = GrievanceRepository::new(&db);
        let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let day2 = day1 + Duration::days(1);

        let a = repo.create(filed_on("g1", day1)).unwrap();
        let b = repo.create(filed_on("g2", day1)).unwrap();
        let c = repo.create(filed_on("g3", day2)).unwrap();

        assert_eq!(a.ticket_number, "GRV-20260301-0001");
        assert_eq!(b.ticket_number, "GRV-20260301-0002");
        assert_eq!(c.ticket_number, "GRV-20260302-0001");
    }

    #[test]
    fn find_by_ticket_ignores_case() {
        let (db, _dir) = temp_db();
        let repo = GrievanceRepository::new(&db);
        let now = Utc::now();
        let created = repo.create(filed_on("g1", now)).unwrap();

        let found = repo
            .find_by_ticket(&created.ticket_number.to_lowercase(), now)
            .unwrap();
        assert_eq!(found.id, "g1");
        assert!(matches!(
            repo.find_by_ticket("GRV-19990101-0001", now),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn sla_is_refreshed_on_read() {
        let (db, _dir) = temp_db();
        let repo = GrievanceRepository::new(&db);
        let created_at = Utc::now() - Duration::hours(73);
        repo.create(filed_on("g1", created_at)).unwrap();

        let read = repo.get("g1", Utc::now()).unwrap();
        assert_eq!(read.sla_status, SlaStatus::Overdue);
        assert!(read.is_overdue);

        let listed = repo.list(created_at + Duration::minutes(3456)).unwrap();
        assert_eq!(listed[0].sla_status, SlaStatus::Warning);
    }

    #[test]
    fn failed_transition_is_not_saved() {
        let (db, _dir) = temp_db();
        let repo = GrievanceRepository::new(&db);
        let now = Utc::now();
        repo.create(filed_on("g1", now)).unwrap();

        let complainant = Actor::new("ben-user", Role::Beneficiary);
        let err = repo
            .update("g1", now, |g| {
                Ok(g.submit_feedback(5, None, &complainant, now)?)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::NotResolved)
        ));
        assert!(repo.get("g1", now).unwrap().feedback.is_none());

        let admin = Actor::new("admin-1", Role::Admin);
        let (assigned, _) = repo
            .update("g1", now, |g| Ok(g.assign("fo-1", &admin, now)?))
            .unwrap();
        assert_eq!(assigned.status, GrievanceStatus::InProgress);
    }
}
