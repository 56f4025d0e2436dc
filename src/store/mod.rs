/// Storage collaborators
///
/// The engine never owns persistence. It talks to two traits:
/// - `CredentialStore`: accounts (login, password hash, role)
/// - `RefreshRecordStore`: hashed refresh tokens, at most one active per owner
///
/// Both ship a Postgres implementation and an in-memory one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::AppError;

mod memory;
mod postgres;

pub use memory::{InMemoryCredentialStore, InMemoryRefreshStore};
pub use postgres::{PgCredentialStore, PgRefreshStore};

/// An account as the credential store sees it
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub role: Role,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a live account. Soft-deleted accounts are reported as `None`.
    async fn find_active_by_login(&self, login: &str) -> Result<Option<UserRecord>, AppError>;

    /// Insert a new account.
    ///
    /// # Errors
    /// `DatabaseError::UniqueConstraintViolation` if the login is taken.
    async fn insert_user(&self, user: UserRecord) -> Result<(), AppError>;

    /// # Errors
    /// `DatabaseError::NotFound` if no live account has this login.
    async fn update_role(&self, login: &str, role: Role) -> Result<(), AppError>;

    /// # Errors
    /// `DatabaseError::NotFound` if no live account has this login.
    async fn update_password_hash(&self, login: &str, password_hash: &str)
        -> Result<(), AppError>;
}

/// A persisted refresh token; only the SHA-256 of the token is kept
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub id: Uuid,
    pub token_hash: String,
    pub owner_login: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// What to insert when a record is created or replaced
#[derive(Debug, Clone)]
pub struct NewRefreshRecord {
    pub token_hash: String,
    pub owner_login: String,
    pub expires_at: DateTime<Utc>,
}

impl NewRefreshRecord {
    pub(crate) fn into_record(self, now: DateTime<Utc>) -> RefreshRecord {
        RefreshRecord {
            id: Uuid::new_v4(),
            token_hash: self.token_hash,
            owner_login: self.owner_login,
            expires_at: self.expires_at,
            revoked: false,
            created_at: now,
            revoked_at: None,
        }
    }
}

/// Result of a compare-and-swap on an owner's active record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The presented hash matched; it is now revoked and the replacement is live
    Swapped(Uuid),
    /// Nothing active for the owner and the presented hash is unknown
    NotFound,
    /// The active record matched but is past `expires_at`
    Expired,
    /// The presented hash is not the active one (revoked, rotated, or foreign)
    Revoked,
}

#[async_trait]
pub trait RefreshRecordStore: Send + Sync {
    /// Revoke any active record of the owner and insert `record`, atomically.
    async fn replace_active(&self, record: NewRefreshRecord) -> Result<Uuid, AppError>;

    /// Atomically check the owner's active record against `presented_hash`
    /// and, on match, revoke it and insert `replacement`.
    ///
    /// A non-`Swapped` outcome leaves the store untouched.
    async fn swap_active(
        &self,
        owner_login: &str,
        presented_hash: &str,
        now: DateTime<Utc>,
        replacement: NewRefreshRecord,
    ) -> Result<SwapOutcome, AppError>;

    /// Revoke every active record of the owner; returns how many were revoked.
    async fn revoke_all(&self, owner_login: &str) -> Result<u64, AppError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshRecord>, AppError>;

    /// All non-revoked records of the owner. More than one means the invariant broke.
    async fn active_for(&self, owner_login: &str) -> Result<Vec<RefreshRecord>, AppError>;

    /// Delete records whose `expires_at` is before `now`; returns how many.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Constant-time equality for token hashes
pub(crate) fn hashes_match(stored: &str, presented: &str) -> bool {
    bool::from(stored.as_bytes().ct_eq(presented.as_bytes()))
}
