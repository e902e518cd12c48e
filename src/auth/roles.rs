// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User roles and the named permission sets route guards are built from.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// User roles for authorization.
///
/// ## Role Summary
///
/// - `Admin` - Full access, approves staff accounts
/// - `SchemeOfficer` - Reviews applications, sanctions and disburses funds
/// - `FieldOfficer` - Registers beneficiaries and verifies documents
/// - `Beneficiary` - Self-registered applicant, sees own records only
/// - `Auditor` - Read-only access to funds, audit logs and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SchemeOfficer,
    FieldOfficer,
    Beneficiary,
    Auditor,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::SchemeOfficer,
        Role::FieldOfficer,
        Role::Beneficiary,
        Role::Auditor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::SchemeOfficer => "scheme_officer",
            Role::FieldOfficer => "field_officer",
            Role::Beneficiary => "beneficiary",
            Role::Auditor => "auditor",
        }
    }

    /// Parse role from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Role> {
        let s = s.trim().to_ascii_lowercase();
        Role::ALL.into_iter().find(|r| r.as_str() == s)
    }

    /// Staff roles are government users; only beneficiaries are not staff.
    pub fn is_staff(self) -> bool {
        self != Role::Beneficiary
    }

    /// Self-registered accounts of this role are usable without admin approval.
    pub fn auto_approved(self) -> bool {
        self == Role::Beneficiary
    }

    /// Whether this role is a member of permission set `P`.
    pub fn is_in<P: PermissionSet>(self) -> bool {
        P::ROLES.contains(&self)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named allow-list of roles, consumed by [`RequireRoles`](super::RequireRoles).
pub trait PermissionSet: Send + Sync + 'static {
    const NAME: &'static str;
    const ROLES: &'static [Role];
}

macro_rules! permission_set {
    ($(#[$doc:meta])* $name:ident => [$($role:ident),+ $(,)?]) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl PermissionSet for $name {
            const NAME: &'static str = stringify!($name);
            const ROLES: &'static [Role] = &[$(Role::$role),+];
        }
    };
}

permission_set!(
    /// User management.
    AdminRoles => [Admin]
);
permission_set!(
    /// Application review, fund sanction and disbursement, grievance triage.
    ReviewerRoles => [Admin, SchemeOfficer]
);
permission_set!(
    /// Officers who work grievances and verify documents.
    OfficerRoles => [Admin, SchemeOfficer, FieldOfficer]
);
permission_set!(
    /// Roles that may see every beneficiary and grievance.
    StaffRoles => [Admin, SchemeOfficer, FieldOfficer, Auditor]
);
permission_set!(
    /// Read access to the fund ledger.
    FundViewers => [Admin, SchemeOfficer, Auditor]
);
permission_set!(
    /// Audit trail access.
    AuditRoles => [Admin, Auditor]
);
permission_set!(
    /// Dashboard and report access.
    ReportRoles => [Admin, SchemeOfficer, Auditor]
);
permission_set!(
    /// Who may create beneficiary applications.
    Registrars => [Admin, FieldOfficer, Beneficiary]
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_parses_correctly() {
        assert_eq!(Role::from_str("admin"), Some(Role::Admin));
        assert_eq!(Role::from_str("SCHEME_OFFICER"), Some(Role::SchemeOfficer));
        assert_eq!(Role::from_str(" field_officer "), Some(Role::FieldOfficer));
        assert_eq!(Role::from_str("client"), None);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::SchemeOfficer).unwrap();
        assert_eq!(json, "\"scheme_officer\"");
        let role: Role = serde_json::from_str("\"field_officer\"").unwrap();
        assert_eq!(role, Role::FieldOfficer);
    }

    #[test]
    fn permission_sets_membership() {
        assert!(Role::SchemeOfficer.is_in::<ReviewerRoles>());
        assert!(!Role::Beneficiary.is_in::<ReviewerRoles>());
        assert!(!Role::Auditor.is_in::<OfficerRoles>());
        assert!(Role::Auditor.is_in::<AuditRoles>());
        assert!(Role::Beneficiary.is_in::<Registrars>());
        assert_eq!(ReviewerRoles::NAME, "ReviewerRoles");
    }

    #[test]
    fn only_beneficiaries_are_auto_approved() {
        assert!(Role::Beneficiary.auto_approved());
        assert!(!Role::FieldOfficer.auto_approved());
        assert!(!Role::Beneficiary.is_staff());
        assert!(Role::Auditor.is_staff());
    }
}
