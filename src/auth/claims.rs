/// JWT Claims structures
///
/// Access and refresh tokens carry different claim sets. The access token is
/// self-contained so the hot path can authorize without I/O. The refresh token
/// only names its subject, because every use is checked against server state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::principal::Principal;
use crate::auth::roles::Role;

/// Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject (login)
    pub sub: String,
    pub role: Role,
    pub permissions: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
}

impl AccessClaims {
    pub fn new(principal: &Principal, expiry_seconds: i64, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: principal.login.clone(),
            role: principal.role,
            permissions: principal.permissions.clone(),
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
        }
    }

    /// Rebuild the principal these claims describe
    pub fn into_principal(self) -> Principal {
        Principal {
            login: self.sub,
            role: self.role,
            permissions: self.permissions,
        }
    }
}

/// Claims for refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    /// Random token id so two tokens minted in the same second never collide
    pub jti: String,
}

impl RefreshClaims {
    pub fn new(login: &str, expiry_seconds: i64, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: login.to_string(),
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
            jti: Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_claims_creation() {
        let principal = Principal::new("a@test.com", Role::Manager);
        let claims = AccessClaims::new(&principal, 900, "test".to_string());

        assert_eq!(claims.sub, "a@test.com");
        assert_eq!(claims.role, Role::Manager);
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.clone().into_principal(), principal);
    }

    #[test]
    fn test_refresh_claims_are_unique() {
        let first = RefreshClaims::new("a@test.com", 60, "test".to_string());
        let second = RefreshClaims::new("a@test.com", 60, "test".to_string());

        assert_eq!(first.sub, second.sub);
        assert_ne!(first.jti, second.jti);
    }
}
