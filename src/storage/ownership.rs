// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Row-level ownership enforcement.
//!
//! Every record carries the id of the user who created it. Reads and writes
//! by non-staff users must pass through these checks.

use crate::auth::{AuthenticatedUser, PermissionSet};

use super::{StoreError, StoreResult};

/// A record owned by the user who created it.
pub trait OwnedResource {
    /// Resource name used in denial messages and audit events.
    const RESOURCE: &'static str;

    fn created_by(&self) -> &str;
}

/// Ownership checks available on every [`OwnedResource`].
pub trait OwnershipEnforcer {
    /// The user created this record.
    ///
    /// # Errors
    /// Returns `StoreError::PermissionDenied` otherwise.
    fn verify_ownership(&self, user: &AuthenticatedUser) -> StoreResult<()>;

    /// The user created this record or holds a role in `P`.
    fn verify_access<P: PermissionSet>(&self, user: &AuthenticatedUser) -> StoreResult<()>;
}

impl<T: OwnedResource> OwnershipEnforcer for T {
    fn verify_ownership(&self, user: &AuthenticatedUser) -> StoreResult<()> {
        if self.created_by() == user.user_id {
            Ok(())
        } else {
            Err(denied::<T>(user))
        }
    }

    fn verify_access<P: PermissionSet>(&self, user: &AuthenticatedUser) -> StoreResult<()> {
        if user.role.is_in::<P>() {
            return Ok(());
        }
        self.verify_ownership(user)
    }
}

/// Ownership verification chained onto a lookup.
pub trait OwnershipCheck<T> {
    /// Return the record if `user` owns it or holds a role in `P`.
    fn accessible_by<P: PermissionSet>(self, user: &AuthenticatedUser) -> StoreResult<T>;
}

impl<T: OwnedResource> OwnershipCheck<T> for StoreResult<T> {
    fn accessible_by<P: PermissionSet>(self, user: &AuthenticatedUser) -> StoreResult<T> {
        let resource = self?;
        resource.verify_access::<P>(user)?;
        Ok(resource)
    }
}

fn denied<T: OwnedResource>(user: &AuthenticatedUser) -> StoreError {
    tracing::warn!(
        user_id = %user.user_id,
        role = %user.role,
        resource = T::RESOURCE,
        "Ownership check failed"
    );
    StoreError::PermissionDenied {
        user_id: user.user_id.clone(),
        resource: T::RESOURCE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Role, StaffRoles};
    use crate::test_support::user;

    struct TestResource {
        owner: String,
    }

    impl OwnedResource for TestResource {
        const RESOURCE: &'static str = "record";

        fn created_by(&self) -> &str {
            &self.owner
        }
    }

    fn resource(owner: &str) -> TestResource {
        TestResource {
            owner: owner.to_string(),
        }
    }

    #[test]
    fn ownership_verification_passes_for_owner() {
        let caller = user("user_123", Role::Beneficiary);
        assert!(resource("user_123").verify_ownership(&caller).is_ok());
    }

    #[test]
    fn ownership_verification_fails_for_non_owner() {
        let caller = user("user_456", Role::Beneficiary);
        let result = resource("user_123").verify_ownership(&caller);
        assert!(matches!(
            result,
            Err(StoreError::PermissionDenied { ref resource, .. }) if resource == "record"
        ));
    }

    #[test]
    fn staff_roles_bypass_ownership() {
        let auditor = user("auditor-1", Role::Auditor);
        assert!(resource("user_123").verify_access::<StaffRoles>(&auditor).is_ok());
        assert!(resource("user_123").verify_ownership(&auditor).is_err());
    }

    #[test]
    fn ownership_check_on_result() {
        let caller = user("user_123", Role::Beneficiary);
        let found: StoreResult<TestResource> = Ok(resource("user_123"));
        assert!(found.accessible_by::<StaffRoles>(&caller).is_ok());

        let other = user("user_9", Role::Beneficiary);
        let found: StoreResult<TestResource> = Ok(resource("user_123"));
        assert!(found.accessible_by::<StaffRoles>(&other).is_err());

        let missing: StoreResult<TestResource> = Err(StoreError::NotFound("Record".into()));
        assert!(matches!(
            missing.accessible_by::<StaffRoles>(&caller),
            Err(StoreError::NotFound(_))
        ));
    }
}
