// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Beneficiary applications.
//!
//! Aadhaar (by keyed digest) and mobile number are unique across
//! beneficiaries. Registration numbers are `DBT-<year>-<seq>` with a
//! per-year sequence.

use chrono::{Datelike, Utc};

use super::super::database::{
    claim_unique, load_existing, next_sequence, reindex, release_unique, remove, store,
    PortalDatabase, BENEFICIARIES, BENEFICIARY_INDEX,
};
use super::super::{OwnedResource, StoreResult};
use crate::domain::Beneficiary;

impl OwnedResource for Beneficiary {
    const RESOURCE: &'static str = "beneficiary";

    fn created_by(&self) -> &str {
        &self.created_by
    }
}

fn aadhaar_key(b: &Beneficiary) -> String {
    format!("aadhaar:{}", b.aadhaar_digest)
}

fn mobile_key(b: &Beneficiary) -> String {
    format!("mobile:{}", b.mobile)
}

/// Repository for beneficiary records.
pub struct BeneficiaryRepository<'a> {
    db: &'a PortalDatabase,
}

impl<'a> BeneficiaryRepository<'a> {
    pub fn new(db: &'a PortalDatabase) -> Self {
        Self { db }
    }

    /// Insert a new application and assign its registration number.
    pub fn create(&self, mut beneficiary: Beneficiary) -> StoreResult<Beneficiary> {
        self.db.write(|txn| {
            {
                let mut index = txn.open_table(BENEFICIARY_INDEX)?;
                claim_unique(&mut index, &aadhaar_key(&beneficiary), &beneficiary.id, "Aadhaar number")?;
                claim_unique(&mut index, &mobile_key(&beneficiary), &beneficiary.id, "Mobile number")?;
            }

            let year = beneficiary.created_at.year();
            let seq = next_sequence(txn, &format!("beneficiary:{year}"))?;
            beneficiary.registration_number = format!("DBT-{year}-{seq:06}");

            let mut table = txn.open_table(BENEFICIARIES)?;
            store(&mut table, &beneficiary.id, &beneficiary)?;
            Ok(beneficiary)
        })
    }

    pub fn get(&self, id: &str) -> StoreResult<Beneficiary> {
        self.db
            .read(|txn| load_existing(&txn.open_table(BENEFICIARIES)?, id, "Beneficiary"))
    }

    /// All applications, newest first.
    pub fn list(&self) -> StoreResult<Vec<Beneficiary>> {
        let mut all: Vec<Beneficiary> = self.db.load_table(BENEFICIARIES)?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    /// Load, mutate and save an application in one transaction.
    ///
    /// The closure's error (typically a `TransitionError`) aborts the write.
    pub fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Beneficiary) -> StoreResult<T>,
    ) -> StoreResult<(Beneficiary, T)> {
        self.db.write(|txn| {
            let mut table = txn.open_table(BENEFICIARIES)?;
            let mut beneficiary: Beneficiary = load_existing(&table, id, "Beneficiary")?;
            let (old_aadhaar, old_mobile) = (aadhaar_key(&beneficiary), mobile_key(&beneficiary));

            let value = f(&mut beneficiary)?;
            beneficiary.updated_at = Utc::now();

            let (new_aadhaar, new_mobile) = (aadhaar_key(&beneficiary), mobile_key(&beneficiary));
            if old_aadhaar != new_aadhaar || old_mobile != new_mobile {
                let mut index = txn.open_table(BENEFICIARY_INDEX)?;
                reindex(&mut index, Some(old_aadhaar.as_str()), Some(new_aadhaar.as_str()), id, "Aadhaar number")?;
                reindex(&mut index, Some(old_mobile.as_str()), Some(new_mobile.as_str()), id, "Mobile number")?;
            }

            store(&mut table, id, &beneficiary)?;
            Ok((beneficiary, value))
        })
    }

    /// Delete an application after `check` approves the stored record.
    pub fn delete(
        &self,
        id: &str,
        check: impl FnOnce(&Beneficiary) -> StoreResult<()>,
    ) -> StoreResult<Beneficiary> {
        self.db.write(|txn| {
            let mut table = txn.open_table(BENEFICIARIES)?;
            let beneficiary: Beneficiary = load_existing(&table, id, "Beneficiary")?;
            check(&beneficiary)?;

            let mut index = txn.open_table(BENEFICIARY_INDEX)?;
            release_unique(&mut index, &aadhaar_key(&beneficiary), id)?;
            release_unique(&mut index, &mobile_key(&beneficiary), id)?;
            remove(&mut table, id)?;
            Ok(beneficiary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::domain::beneficiary::tests::sample;
    use crate::domain::{Actor, ApplicationStatus, TransitionError};
    use crate::storage::database::tests::temp_db;
    use crate::storage::StoreError;

    fn second(created_by: &str) -> Beneficiary {
        let mut b = sample(created_by);
        b.id = "ben-2".into();
        b.mobile = "9000000002".into();
        b.aadhaar_digest = "digest-2".into();
        b
    }

    #[test]
    fn create_assigns_sequential_registration_numbers() {
        let (db, _dir) = temp_db();
        let repo = BeneficiaryRepository::new(&db);

        let first = repo.create(sample("fo-1")).unwrap();
        let second = repo.create(second("fo-1")).unwrap();

        let year = first.created_at.year();
        assert_eq!(first.registration_number, format!("DBT-{year}-000001"));
        assert_eq!(second.registration_number, format!("DBT-{year}-000002"));
        assert_eq!(repo.list().unwrap().len(), 2);
    }

    #[test]
    fn aadhaar_and_mobile_are_unique() {
        let (db, _dir) = temp_db();
        let repo = BeneficiaryRepository::new(&db);
        repo.create(sample("fo-1")).unwrap();

        let mut dup_aadhaar = second("fo-1");
        dup_aadhaar.aadhaar_digest = sample("x").aadhaar_digest;
        let err = repo.create(dup_aadhaar).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(ref w) if w == "Aadhaar number"));

        let mut dup_mobile = second("fo-1");
        dup_mobile.mobile = sample("x").mobile;
        let err = repo.create(dup_mobile).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(ref w) if w == "Mobile number"));
    }

    #[test]
    fn rejected_transition_leaves_record_untouched() {
        let (db, _dir) = temp_db();
        let repo = BeneficiaryRepository::new(&db);
        let created = repo.create(sample("fo-1")).unwrap();

        let officer = Actor::new("so-1", Role::SchemeOfficer);
        let err = repo
            .update(&created.id, |b| {
                Ok(b.apply_status(ApplicationStatus::Approved, &officer, None, Utc::now())?)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(TransitionError::InvalidApplicationTransition { .. })
        ));

        let stored = repo.get(&created.id).unwrap();
        assert_eq!(stored.application_status, ApplicationStatus::Draft);
        assert!(stored.status_history.is_empty());
    }

    #[test]
    fn update_moves_mobile_index() {
        let (db, _dir) = temp_db();
        let repo = BeneficiaryRepository::new(&db);
        let created = repo.create(sample("fo-1")).unwrap();
        let old_mobile = created.mobile.clone();

        repo.update(&created.id, |b| {
            b.mobile = "9111111111".into();
            Ok(())
        })
        .unwrap();

        // the old number is free again
        let mut other = second("fo-1");
        other.mobile = old_mobile;
        repo.create(other).unwrap();
    }

    #[test]
    fn delete_releases_unique_keys() {
        let (db, _dir) = temp_db();
        let repo = BeneficiaryRepository::new(&db);
        let created = repo.create(sample("fo-1")).unwrap();

        repo.delete(&created.id, |_| Ok(())).unwrap();
        assert!(matches!(repo.get(&created.id), Err(StoreError::NotFound(_))));
        repo.create(sample("fo-1")).unwrap();
    }
}
