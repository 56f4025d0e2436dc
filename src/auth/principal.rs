use serde::Serialize;

use crate::auth::roles::Role;

/// An authenticated identity for the duration of one request
///
/// Rebuilt from verified access-token claims, or from the credential store on a
/// strong check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub login: String,
    pub role: Role,
    pub permissions: Vec<String>,
}

impl Principal {
    /// Principal with the authorities of `role`
    pub fn new(login: impl Into<String>, role: Role) -> Self {
        Self {
            login: login.into(),
            role,
            permissions: role.authorities().iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Replace role and permissions with the account's current role
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self.permissions = role.authorities().iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}
