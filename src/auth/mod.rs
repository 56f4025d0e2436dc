/// Authentication module
///
/// Credential verification, token signing and verification, refresh token
/// rotation, the role hierarchy, and the engine that ties them together.

mod claims;
mod credentials;
mod engine;
mod jwt;
mod password;
mod principal;
mod refresh_token;
mod roles;

pub use claims::{AccessClaims, RefreshClaims};
pub use credentials::CredentialVerifier;
pub use engine::{AuthenticationEngine, Session};
pub use jwt::{IssuedToken, TokenCodec};
pub use password::{hash_password, validate_password_strength, verify_password};
pub use principal::Principal;
pub use refresh_token::{hash_token, spawn_sweeper, RefreshRegistry};
pub use roles::{can_act, transition, Role, RoleTransition};
