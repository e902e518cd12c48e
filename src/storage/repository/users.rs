// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User accounts.
//!
//! Email, mobile, employee id and Aadhaar digest are unique across users and
//! are reserved in `user_index` inside the same transaction as the record.

use chrono::{DateTime, Duration, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;

use super::super::database::{
    claim_unique, load, load_existing, lookup_unique, reindex, store, PortalDatabase, USERS,
    USER_INDEX,
};
use super::super::{StoreError, StoreResult};
use crate::auth::Role;
use crate::crypto::SealedField;

/// Consecutive failed logins before the account locks.
pub const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// How long a locked account stays locked.
pub const LOCK_DURATION_MINUTES: i64 = 30;

/// Refresh tokens remembered per user; the oldest is dropped beyond this.
pub const MAX_REFRESH_TOKENS: usize = 5;

/// Canonical form of an email address: NFKC, trimmed, lowercase.
pub fn normalize_email(email: &str) -> String {
    email.nfkc().collect::<String>().trim().to_lowercase()
}

/// A stored user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: String,
    /// Normalized, see [`normalize_email`].
    pub email: String,
    pub name: String,
    pub mobile: Option<String>,
    pub role: Role,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
    pub aadhaar: Option<SealedField>,
    pub aadhaar_digest: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    /// Staff accounts need an admin's approval before they can log in.
    pub is_approved: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    /// Tokens issued before this instant are rejected.
    pub password_changed_at: Option<DateTime<Utc>>,
    /// Keyed digests of live refresh tokens, oldest first.
    #[serde(default)]
    pub refresh_tokens: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredUser {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Count a failed login. Returns `true` if this attempt locked the account.
    pub fn record_failed_login(&mut self, now: DateTime<Utc>) -> bool {
        self.failed_login_attempts += 1;
        if self.failed_login_attempts >= MAX_LOGIN_ATTEMPTS {
            self.failed_login_attempts = 0;
            self.locked_until = Some(now + Duration::minutes(LOCK_DURATION_MINUTES));
            return true;
        }
        false
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.failed_login_attempts = 0;
        self.locked_until = None;
        self.last_login = Some(now);
    }

    pub fn remember_refresh_token(&mut self, digest: String) {
        self.refresh_tokens.push(digest);
        if self.refresh_tokens.len() > MAX_REFRESH_TOKENS {
            let excess = self.refresh_tokens.len() - MAX_REFRESH_TOKENS;
            self.refresh_tokens.drain(..excess);
        }
    }

    /// Remove a refresh token digest. Returns whether it was live.
    pub fn consume_refresh_token(&mut self, digest: &str) -> bool {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|d| d != digest);
        self.refresh_tokens.len() != before
    }

    pub fn revoke_refresh_tokens(&mut self) {
        self.refresh_tokens.clear();
    }

    /// Whether a token issued at `issued_at_ms` (unix milliseconds) predates
    /// the latest password change.
    pub fn token_predates_password_change(&self, issued_at_ms: i64) -> bool {
        self.password_changed_at
            .is_some_and(|changed| issued_at_ms < changed.timestamp_millis())
    }

    fn index_keys(&self) -> Vec<(String, &'static str)> {
        let mut keys = vec![(format!("email:{}", self.email), "Email")];
        if let Some(mobile) = &self.mobile {
            keys.push((format!("mobile:{mobile}"), "Mobile number"));
        }
        if let Some(employee_id) = &self.employee_id {
            keys.push((format!("employee:{employee_id}"), "Employee id"));
        }
        if let Some(digest) = &self.aadhaar_digest {
            keys.push((format!("aadhaar:{digest}"), "Aadhaar number"));
        }
        keys
    }
}

/// Public view of a user account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub mobile: Option<String>,
    pub role: Role,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
    pub aadhaar_linked: bool,
    pub is_active: bool,
    pub is_approved: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredUser> for UserResponse {
    fn from(user: StoredUser) -> Self {
        Self {
            aadhaar_linked: user.aadhaar.is_some(),
            id: user.id,
            email: user.email,
            name: user.name,
            mobile: user.mobile,
            role: user.role,
            employee_id: user.employee_id,
            department: user.department,
            designation: user.designation,
            district: user.district,
            state: user.state,
            is_active: user.is_active,
            is_approved: user.is_approved,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

/// Repository for user accounts.
pub struct UserRepository<'a> {
    db: &'a PortalDatabase,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a PortalDatabase) -> Self {
        Self { db }
    }

    /// Insert a new user, reserving its unique keys.
    ///
    /// # Errors
    /// `StoreError::AlreadyExists` naming the first duplicated field.
    pub fn create(&self, user: &StoredUser) -> StoreResult<()> {
        self.db.write(|txn| {
            {
                let mut index = txn.open_table(USER_INDEX)?;
                for (key, what) in user.index_keys() {
                    claim_unique(&mut index, &key, &user.id, what)?;
                }
            }
            let mut users = txn.open_table(USERS)?;
            if users.get(user.id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists("User".to_string()));
            }
            store(&mut users, &user.id, user)
        })
    }

    pub fn get(&self, user_id: &str) -> StoreResult<StoredUser> {
        self.db
            .read(|txn| load_existing(&txn.open_table(USERS)?, user_id, "User"))
    }

    pub fn find_by_email(&self, email: &str) -> StoreResult<Option<StoredUser>> {
        let key = format!("email:{}", normalize_email(email));
        self.db.read(|txn| {
            let index = txn.open_table(USER_INDEX)?;
            match lookup_unique(&index, &key)? {
                Some(user_id) => load(&txn.open_table(USERS)?, &user_id),
                None => Ok(None),
            }
        })
    }

    pub fn list(&self) -> StoreResult<Vec<StoredUser>> {
        let mut users: Vec<StoredUser> = self.db.load_table(USERS)?;
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    /// Load, mutate and save a user in one transaction.
    ///
    /// The closure's error aborts the write. Changed unique keys are re-indexed.
    pub fn update<T>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut StoredUser) -> StoreResult<T>,
    ) -> StoreResult<(StoredUser, T)> {
        self.db.write(|txn| {
            let mut users = txn.open_table(USERS)?;
            let mut user: StoredUser = load_existing(&users, user_id, "User")?;
            let old_keys = user.index_keys();

            let value = f(&mut user)?;
            user.updated_at = Utc::now();

            let new_keys = user.index_keys();
            if old_keys != new_keys {
                let mut index = txn.open_table(USER_INDEX)?;
                for (key, what) in &new_keys {
                    let old = old_keys.iter().find(|(_, w)| w == what).map(|(k, _)| k.as_str());
                    reindex(&mut index, old, Some(key.as_str()), &user.id, what)?;
                }
                for (key, what) in &old_keys {
                    if !new_keys.iter().any(|(_, w)| w == what) {
                        reindex(&mut index, Some(key.as_str()), None, &user.id, what)?;
                    }
                }
            }

            store(&mut users, user_id, &user)?;
            Ok((user, value))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::database::tests::temp_db;

    pub(crate) fn sample_user(id: &str, email: &str, role: Role) -> StoredUser {
        let now = Utc::now();
        StoredUser {
            id: id.to_string(),
            email: normalize_email(email),
            name: "Test User".to_string(),
            mobile: None,
            role,
            employee_id: None,
            department: None,
            designation: None,
            district: None,
            state: None,
            aadhaar: None,
            aadhaar_digest: None,
            password_hash: "$2b$04$invalidinvalidinvalidinvalidinvalidinvalidinvalidinv".to_string(),
            is_active: true,
            is_approved: true,
            approved_by: None,
            approved_at: None,
            failed_login_attempts: 0,
            locked_until: None,
            last_login: None,
            password_changed_at: None,
            refresh_tokens: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn revocation_resolves_within_the_same_second() {
        let mut user = sample_user("u1", "a@example.in", Role::Beneficiary);
        assert!(!user.token_predates_password_change(0));

        let changed = DateTime::from_timestamp_millis(1_700_000_000_600).unwrap();
        user.password_changed_at = Some(changed);
        assert!(user.token_predates_password_change(1_700_000_000_200));
        assert!(!user.token_predates_password_change(1_700_000_000_600));
        assert!(!user.token_predates_password_change(1_700_000_000_900));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  Officer@Example.IN "), "officer@example.in");
        // fullwidth letters fold under NFKC
        assert_eq!(normalize_email("ＡＢ@x.in"), "ab@x.in");
    }

    #[test]
    fn create_and_find_by_email() {
        let (db, _dir) = temp_db();
        let repo = UserRepository::new(&db);
        repo.create(&sample_user("u1", "a@example.in", Role::Beneficiary))
            .unwrap();

        let found = repo.find_by_email("A@Example.in").unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(repo.find_by_email("b@example.in").unwrap().is_none());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let (db, _dir) = temp_db();
        let repo = UserRepository::new(&db);

        let mut first = sample_user("u1", "a@example.in", Role::FieldOfficer);
        first.mobile = Some("9876543210".into());
        repo.create(&first).unwrap();

        let err = repo
            .create(&sample_user("u2", "a@example.in", Role::FieldOfficer))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(ref w) if w == "Email"));

        let mut second = sample_user("u3", "c@example.in", Role::FieldOfficer);
        second.mobile = Some("9876543210".into());
        let err = repo.create(&second).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(ref w) if w == "Mobile number"));

        // the failed insert reserved nothing
        assert!(repo.find_by_email("c@example.in").unwrap().is_none());
    }

    #[test]
    fn update_reindexes_changed_email() {
        let (db, _dir) = temp_db();
        let repo = UserRepository::new(&db);
        repo.create(&sample_user("u1", "old@example.in", Role::Auditor))
            .unwrap();

        repo.update("u1", |u| {
            u.email = normalize_email("new@example.in");
            Ok(())
        })
        .unwrap();

        assert!(repo.find_by_email("old@example.in").unwrap().is_none());
        assert_eq!(repo.find_by_email("new@example.in").unwrap().unwrap().id, "u1");
    }

    #[test]
    fn lockout_after_five_failures() {
        let now = Utc::now();
        let mut user = sample_user("u1", "a@example.in", Role::Beneficiary);
        for _ in 0..4 {
            assert!(!user.record_failed_login(now));
        }
        assert!(user.record_failed_login(now));
        assert!(user.is_locked(now));
        assert!(!user.is_locked(now + Duration::minutes(31)));

        user.record_login(now);
        assert!(!user.is_locked(now));
        assert_eq!(user.failed_login_attempts, 0);
    }

    #[test]
    fn refresh_tokens_are_capped_and_consumed_once() {
        let mut user = sample_user("u1", "a@example.in", Role::Beneficiary);
        for i in 0..7 {
            user.remember_refresh_token(format!("d{i}"));
        }
        assert_eq!(user.refresh_tokens.len(), MAX_REFRESH_TOKENS);
        assert_eq!(user.refresh_tokens[0], "d2");

        assert!(user.consume_refresh_token("d4"));
        assert!(!user.consume_refresh_token("d4"));
        assert!(!user.consume_refresh_token("d0"));
    }
}
