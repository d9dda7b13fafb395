//! Caller identity, roles and permissions.
//!
//! # Design Decisions
//! - Roles are a closed, totally ordered enum; comparisons go through `level()`
//! - Permissions are typed `action:resource` pairs, rendered as strings only at the edges
//! - Identity is built once by the authenticator and never mutated afterwards

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Portal roles, ordered by seniority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Guest = 0,
    Member = 1,
    PensionOfficer = 2,
    Admin = 3,
    SuperAdmin = 4,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Guest,
        Role::Member,
        Role::PensionOfficer,
        Role::Admin,
        Role::SuperAdmin,
    ];

    /// Position in the hierarchy. Higher levels satisfy lower requirements.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// True if this role is at least as senior as `other`.
    pub fn satisfies(self, other: Role) -> bool {
        self.level() >= other.level()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Member => "member",
            Role::PensionOfficer => "pension-officer",
            Role::Admin => "admin",
            Role::SuperAdmin => "super-admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "guest" => Ok(Role::Guest),
            "member" => Ok(Role::Member),
            "pension-officer" => Ok(Role::PensionOfficer),
            "admin" => Ok(Role::Admin),
            "super-admin" | "superadmin" => Ok(Role::SuperAdmin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// Resource catalog known to the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Resource {
    Users,
    Members,
    Claims,
    Contributions,
    Medical,
    Voting,
    Payments,
    Analytics,
    Organizations,
    Reports,
    Audit,
    Settings,
}

impl Resource {
    pub const ALL: [Resource; 12] = [
        Resource::Users,
        Resource::Members,
        Resource::Claims,
        Resource::Contributions,
        Resource::Medical,
        Resource::Voting,
        Resource::Payments,
        Resource::Analytics,
        Resource::Organizations,
        Resource::Reports,
        Resource::Audit,
        Resource::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Members => "members",
            Resource::Claims => "claims",
            Resource::Contributions => "contributions",
            Resource::Medical => "medical",
            Resource::Voting => "voting",
            Resource::Payments => "payments",
            Resource::Analytics => "analytics",
            Resource::Organizations => "organizations",
            Resource::Reports => "reports",
            Resource::Audit => "audit",
            Resource::Settings => "settings",
        }
    }
}

/// An `action:resource` grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    pub action: Action,
    pub resource: Resource,
}

impl Permission {
    pub const fn new(action: Action, resource: Resource) -> Self {
        Self { action, resource }
    }

    /// Every permission in the catalog.
    pub fn all() -> impl Iterator<Item = Permission> {
        Resource::ALL
            .into_iter()
            .flat_map(|r| Action::ALL.into_iter().map(move |a| Permission::new(a, r)))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action.as_str(), self.resource.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid permission `{0}` (expected action:resource)")]
pub struct InvalidPermission(pub String);

impl FromStr for Permission {
    type Err = InvalidPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidPermission(s.to_string());
        let (action, resource) = s.trim().split_once(':').ok_or_else(err)?;
        let action = Action::ALL
            .into_iter()
            .find(|a| a.as_str() == action)
            .ok_or_else(err)?;
        let resource = Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == resource)
            .ok_or_else(err)?;
        Ok(Permission::new(action, resource))
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The authenticated caller, attached to the request by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub organization_id: Option<String>,
    pub permissions: BTreeSet<Permission>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
            organization_id: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization_id = Some(org.into());
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(perms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::SuperAdmin.satisfies(Role::Admin));
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(!Role::Member.satisfies(Role::PensionOfficer));
        for r1 in Role::ALL {
            for r2 in Role::ALL {
                assert_eq!(r1.satisfies(r2), r1.level() >= r2.level());
            }
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("pension-officer".parse::<Role>().unwrap(), Role::PensionOfficer);
        assert_eq!("SUPER_ADMIN".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert!("root".parse::<Role>().is_err());
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_permission_parsing() {
        let p: Permission = "read:claims".parse().unwrap();
        assert_eq!(p, Permission::new(Action::Read, Resource::Claims));
        assert_eq!(p.to_string(), "read:claims");
        assert!("read".parse::<Permission>().is_err());
        assert!("fly:claims".parse::<Permission>().is_err());
        assert!("read:spaceships".parse::<Permission>().is_err());
        assert_eq!(Permission::all().count(), 48);
    }
}
