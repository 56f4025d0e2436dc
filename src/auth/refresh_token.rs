/// Refresh Token Registry
///
/// Keeps at most one live refresh token per principal. Refresh tokens are:
/// - Signed JWTs handed to the client and never stored in plaintext
/// - Hashed with SHA-256 before they reach the store
/// - Single-use: a successful refresh revokes the presented token and installs
///   its replacement in one atomic step (token rotation)
/// - Revocable per principal on logout or password change

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::store::{NewRefreshRecord, RefreshRecordStore, SwapOutcome};

/// Hash a refresh token using SHA-256
///
/// Never store plaintext tokens.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct RefreshRegistry {
    store: Arc<dyn RefreshRecordStore>,
}

impl RefreshRegistry {
    pub fn new(store: Arc<dyn RefreshRecordStore>) -> Self {
        Self { store }
    }

    /// Record a freshly issued refresh token for `subject`
    ///
    /// Any record still active for the subject is revoked in the same step.
    pub async fn store(
        &self,
        token_hash: &str,
        subject: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, AppError> {
        let id = self
            .store
            .replace_active(NewRefreshRecord {
                token_hash: token_hash.to_string(),
                owner_login: subject.to_string(),
                expires_at,
            })
            .await?;

        tracing::debug!(login = %subject, record_id = %id, "Refresh token stored");
        Ok(id)
    }

    /// Consume the presented token and install its replacement
    ///
    /// # Errors
    /// - `RefreshNotFound`: nothing active for the subject and the hash is unknown
    /// - `RefreshExpired`: the active record is past its expiry
    /// - `RefreshRevoked`: the hash is not the active one. This includes replay of
    ///   a token already consumed by an earlier rotation, and the loser of two
    ///   concurrent rotations.
    pub async fn rotate(
        &self,
        subject: &str,
        presented_hash: &str,
        replacement_hash: &str,
        replacement_expires_at: DateTime<Utc>,
    ) -> Result<Uuid, AppError> {
        let outcome = self
            .store
            .swap_active(
                subject,
                presented_hash,
                Utc::now(),
                NewRefreshRecord {
                    token_hash: replacement_hash.to_string(),
                    owner_login: subject.to_string(),
                    expires_at: replacement_expires_at,
                },
            )
            .await?;

        match outcome {
            SwapOutcome::Swapped(id) => {
                tracing::debug!(login = %subject, record_id = %id, "Refresh token rotated");
                Ok(id)
            }
            SwapOutcome::NotFound => {
                tracing::warn!(login = %subject, "No active refresh token for subject");
                Err(AuthError::RefreshNotFound.into())
            }
            SwapOutcome::Expired => {
                tracing::info!(login = %subject, "Refresh token expired");
                Err(AuthError::RefreshExpired.into())
            }
            SwapOutcome::Revoked => {
                tracing::warn!(login = %subject, "Attempt to use revoked or rotated refresh token");
                Err(AuthError::RefreshRevoked.into())
            }
        }
    }

    /// Revoke every refresh token of `subject`
    ///
    /// Used for logout and password change.
    pub async fn revoke_all(&self, subject: &str) -> Result<u64, AppError> {
        let revoked = self.store.revoke_all(subject).await?;
        tracing::info!(login = %subject, revoked, "All refresh tokens revoked for user");
        Ok(revoked)
    }

    /// Delete records whose expiry has passed
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            tracing::info!(purged, "Expired refresh records purged");
        }
        Ok(purged)
    }
}

/// Periodically purge expired refresh records until the runtime shuts down
pub fn spawn_sweeper(registry: Arc<RefreshRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = registry.purge_expired().await {
                tracing::error!(error = %e, "Refresh record sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRefreshStore;

    fn registry() -> (Arc<InMemoryRefreshStore>, RefreshRegistry) {
        let store = Arc::new(InMemoryRefreshStore::new());
        (store.clone(), RefreshRegistry::new(store))
    }

    fn in_days(days: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::days(days)
    }

    #[test]
    fn test_token_hashing() {
        let hash1 = hash_token("some.refresh.token");
        let hash2 = hash_token("some.refresh.token");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, "some.refresh.token");
        // SHA-256 hex
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_token("some.refresh.token2"));
    }

    #[tokio::test]
    async fn store_leaves_exactly_one_active_record() {
        let (store, registry) = registry();
        registry.store("h1", "a@test.com", in_days(30)).await.unwrap();
        registry.store("h2", "a@test.com", in_days(30)).await.unwrap();

        let active = store.active_for("a@test.com").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_hash, "h2");
    }

    #[tokio::test]
    async fn rotate_revokes_prior_and_installs_replacement() {
        let (store, registry) = registry();
        registry.store("h1", "a@test.com", in_days(30)).await.unwrap();

        let new_id = registry.rotate("a@test.com", "h1", "h2", in_days(30)).await.unwrap();

        let prior = store.find_by_hash("h1").await.unwrap().unwrap();
        assert!(prior.revoked);
        assert!(prior.revoked_at.is_some());
        let active = store.active_for("a@test.com").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, new_id);
        assert_eq!(active[0].token_hash, "h2");
    }

    #[tokio::test]
    async fn replayed_hash_is_revoked() {
        let (_, registry) = registry();
        registry.store("h1", "a@test.com", in_days(30)).await.unwrap();
        registry.rotate("a@test.com", "h1", "h2", in_days(30)).await.unwrap();

        let replay = registry.rotate("a@test.com", "h1", "h3", in_days(30)).await;
        assert_eq!(replay.unwrap_err().auth_kind(), Some(AuthError::RefreshRevoked));
    }

    #[tokio::test]
    async fn rotate_without_record_is_not_found() {
        let (_, registry) = registry();
        let result = registry.rotate("ghost@test.com", "h1", "h2", in_days(30)).await;
        assert_eq!(result.unwrap_err().auth_kind(), Some(AuthError::RefreshNotFound));
    }

    #[tokio::test]
    async fn rotate_of_expired_record_is_expired() {
        let (store, registry) = registry();
        registry
            .store("h1", "a@test.com", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let result = registry.rotate("a@test.com", "h1", "h2", in_days(30)).await;
        assert_eq!(result.unwrap_err().auth_kind(), Some(AuthError::RefreshExpired));
        // the expired record stays as it was
        assert!(!store.find_by_hash("h1").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn revoke_all_then_rotate_is_revoked() {
        let (store, registry) = registry();
        registry.store("h1", "a@test.com", in_days(30)).await.unwrap();

        assert_eq!(registry.revoke_all("a@test.com").await.unwrap(), 1);
        assert!(store.active_for("a@test.com").await.unwrap().is_empty());

        let result = registry.rotate("a@test.com", "h1", "h2", in_days(30)).await;
        assert_eq!(result.unwrap_err().auth_kind(), Some(AuthError::RefreshRevoked));
    }

    #[tokio::test]
    async fn sweeper_purges_expired_records() {
        let (store, registry) = registry();
        registry
            .store("old", "a@test.com", Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        registry.store("new", "b@test.com", in_days(30)).await.unwrap();

        let handle = spawn_sweeper(Arc::new(registry), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(store.find_by_hash("old").await.unwrap().is_none());
        assert!(store.find_by_hash("new").await.unwrap().is_some());
    }
}
