/// Role Hierarchy
///
/// Roles form a total order `USER < MANAGER < ADMIN < SUPER_ADMIN`. The order
/// drives two checks used by privileged mutations:
/// - `can_act`: may an actor of one rank act on an account of another
/// - `transition`: is moving an account from one role to another a legal step

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Manager,
    Admin,
    SuperAdmin,
}

const USER_AUTHORITIES: &[&str] = &["profile:read", "profile:write", "item:read", "item:write"];

const MANAGER_AUTHORITIES: &[&str] = &[
    "profile:read",
    "profile:write",
    "item:read",
    "item:write",
    "user:read",
    "user:promote",
];

const ADMIN_AUTHORITIES: &[&str] = &[
    "profile:read",
    "profile:write",
    "item:read",
    "item:write",
    "user:read",
    "user:promote",
    "user:manage",
    "role:manage",
];

const SUPER_ADMIN_AUTHORITIES: &[&str] = &[
    "profile:read",
    "profile:write",
    "item:read",
    "item:write",
    "user:read",
    "user:promote",
    "user:manage",
    "role:manage",
    "system:manage",
];

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Manager, Role::Admin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Manager => "MANAGER",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
        }
    }

    /// Fixed authorities granted by this rank
    pub fn authorities(&self) -> &'static [&'static str] {
        match self {
            Role::User => USER_AUTHORITIES,
            Role::Manager => MANAGER_AUTHORITIES,
            Role::Admin => ADMIN_AUTHORITIES,
            Role::SuperAdmin => SUPER_ADMIN_AUTHORITIES,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "MANAGER" => Ok(Role::Manager),
            "ADMIN" => Ok(Role::Admin),
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            _ => Err(ValidationError::InvalidFormat(format!("role {}", s))),
        }
    }
}

/// Whether an actor holding `actor` may act on an account holding `target`
///
/// ADMIN and SUPER_ADMIN act on everyone, MANAGER on USER and MANAGER,
/// USER on no one (itself included).
pub fn can_act(actor: Role, target: Role) -> bool {
    match actor {
        Role::Admin | Role::SuperAdmin => true,
        Role::Manager => target <= Role::Manager,
        Role::User => false,
    }
}

/// The kind of step a legal role change represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTransition {
    /// USER -> MANAGER or MANAGER -> ADMIN
    Promotion,
    /// ADMIN -> MANAGER
    Downgrade,
    /// MANAGER -> USER
    Revocation,
}

/// Validate a role change as a directed edge on the rank order
///
/// Only single steps between USER, MANAGER and ADMIN exist. SUPER_ADMIN is
/// never granted or removed this way.
pub fn transition(current: Role, target: Role) -> Result<RoleTransition, AuthError> {
    if current == target {
        return Err(AuthError::RoleAlreadyAtTarget);
    }

    match (current, target) {
        (Role::User, Role::Manager) | (Role::Manager, Role::Admin) => Ok(RoleTransition::Promotion),
        (Role::Admin, Role::Manager) => Ok(RoleTransition::Downgrade),
        (Role::Manager, Role::User) => Ok(RoleTransition::Revocation),
        _ => Err(AuthError::InvalidRoleTransition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_totally_ordered() {
        assert!(Role::User < Role::Manager);
        assert!(Role::Manager < Role::Admin);
        assert!(Role::Admin < Role::SuperAdmin);
    }

    #[test]
    fn test_admin_and_super_admin_act_on_everyone() {
        for target in Role::ALL {
            assert!(can_act(Role::Admin, target), "ADMIN on {}", target);
            assert!(can_act(Role::SuperAdmin, target), "SUPER_ADMIN on {}", target);
        }
    }

    #[test]
    fn test_manager_limited_to_manager_and_below() {
        assert!(can_act(Role::Manager, Role::User));
        assert!(can_act(Role::Manager, Role::Manager));
        assert!(!can_act(Role::Manager, Role::Admin));
        assert!(!can_act(Role::Manager, Role::SuperAdmin));
    }

    #[test]
    fn test_user_acts_on_no_one() {
        for target in Role::ALL {
            assert!(!can_act(Role::User, target), "USER on {}", target);
        }
    }

    #[test]
    fn test_transition_to_same_role_fails() {
        for role in Role::ALL {
            assert_eq!(transition(role, role), Err(AuthError::RoleAlreadyAtTarget));
        }
    }

    #[test]
    fn test_transition_edges() {
        assert_eq!(transition(Role::User, Role::Manager), Ok(RoleTransition::Promotion));
        assert_eq!(transition(Role::Manager, Role::Admin), Ok(RoleTransition::Promotion));
        assert_eq!(transition(Role::Admin, Role::Manager), Ok(RoleTransition::Downgrade));
        assert_eq!(transition(Role::Manager, Role::User), Ok(RoleTransition::Revocation));
    }

    #[test]
    fn test_transition_rejects_skips_and_super_admin() {
        assert_eq!(transition(Role::User, Role::Admin), Err(AuthError::InvalidRoleTransition));
        assert_eq!(transition(Role::Admin, Role::User), Err(AuthError::InvalidRoleTransition));
        assert_eq!(
            transition(Role::Admin, Role::SuperAdmin),
            Err(AuthError::InvalidRoleTransition)
        );
        assert_eq!(
            transition(Role::SuperAdmin, Role::Admin),
            Err(AuthError::InvalidRoleTransition)
        );
    }

    #[test]
    fn test_authorities_grow_with_rank() {
        for pair in Role::ALL.windows(2) {
            let lower = pair[0].authorities();
            let higher = pair[1].authorities();
            assert!(lower.iter().all(|a| higher.contains(a)));
            assert!(higher.len() > lower.len());
        }
    }

    #[test]
    fn test_role_string_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert_eq!(
            "ROOT".parse::<Role>(),
            Err(ValidationError::InvalidFormat("role ROOT".to_string()))
        );
        assert_eq!(
            serde_json::to_string(&Role::SuperAdmin).unwrap(),
            "\"SUPER_ADMIN\""
        );
    }
}
