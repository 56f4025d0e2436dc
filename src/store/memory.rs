use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::Role;
use crate::error::{AppError, DatabaseError};
use crate::store::{
    hashes_match, CredentialStore, NewRefreshRecord, RefreshRecord, RefreshRecordStore,
    SwapOutcome, UserRecord,
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, AppError> {
    mutex
        .lock()
        .map_err(|_| AppError::Internal("in-memory store lock poisoned".to_string()))
}

struct StoredUser {
    record: UserRecord,
    deleted: bool,
}

/// Credential store kept in process memory, keyed by login
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: Mutex<HashMap<String, StoredUser>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an account deleted; it stops authenticating but keeps its login
    pub fn soft_delete(&self, login: &str) -> Result<(), AppError> {
        let mut users = lock(&self.users)?;
        match users.get_mut(login) {
            Some(user) => {
                user.deleted = true;
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("user {}", login)).into()),
        }
    }

    fn with_live_user<F>(&self, login: &str, update: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut users = lock(&self.users)?;
        match users.get_mut(login) {
            Some(user) if !user.deleted => {
                update(&mut user.record);
                Ok(())
            }
            _ => Err(DatabaseError::NotFound(format!("user {}", login)).into()),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_active_by_login(&self, login: &str) -> Result<Option<UserRecord>, AppError> {
        let users = lock(&self.users)?;
        Ok(users
            .get(login)
            .filter(|user| !user.deleted)
            .map(|user| user.record.clone()))
    }

    async fn insert_user(&self, user: UserRecord) -> Result<(), AppError> {
        let mut users = lock(&self.users)?;
        if users.contains_key(&user.login) {
            return Err(DatabaseError::UniqueConstraintViolation(user.login).into());
        }
        users.insert(
            user.login.clone(),
            StoredUser {
                record: user,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn update_role(&self, login: &str, role: Role) -> Result<(), AppError> {
        self.with_live_user(login, |user| user.role = role)
    }

    async fn update_password_hash(
        &self,
        login: &str,
        password_hash: &str,
    ) -> Result<(), AppError> {
        self.with_live_user(login, |user| user.password_hash = password_hash.to_string())
    }
}

/// Refresh record store kept in process memory
///
/// Every operation runs under one mutex guard, which makes the
/// check-and-swap in `swap_active` atomic.
#[derive(Default)]
pub struct InMemoryRefreshStore {
    records: Mutex<Vec<RefreshRecord>>,
}

impl InMemoryRefreshStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn revoke_active(records: &mut [RefreshRecord], owner_login: &str, now: DateTime<Utc>) -> u64 {
    let mut revoked = 0;
    for record in records
        .iter_mut()
        .filter(|r| !r.revoked && r.owner_login == owner_login)
    {
        record.revoked = true;
        record.revoked_at = Some(now);
        revoked += 1;
    }
    revoked
}

fn insert(records: &mut Vec<RefreshRecord>, record: RefreshRecord) -> Result<Uuid, AppError> {
    if records.iter().any(|r| r.token_hash == record.token_hash) {
        return Err(DatabaseError::UniqueConstraintViolation("token_hash".to_string()).into());
    }
    let id = record.id;
    records.push(record);
    Ok(id)
}

#[async_trait]
impl RefreshRecordStore for InMemoryRefreshStore {
    async fn replace_active(&self, record: NewRefreshRecord) -> Result<Uuid, AppError> {
        let now = Utc::now();
        let mut records = lock(&self.records)?;
        if records.iter().any(|r| r.token_hash == record.token_hash) {
            return Err(DatabaseError::UniqueConstraintViolation("token_hash".to_string()).into());
        }
        revoke_active(&mut records, &record.owner_login, now);
        insert(&mut records, record.into_record(now))
    }

    async fn swap_active(
        &self,
        owner_login: &str,
        presented_hash: &str,
        now: DateTime<Utc>,
        replacement: NewRefreshRecord,
    ) -> Result<SwapOutcome, AppError> {
        let mut records = lock(&self.records)?;

        let active = records
            .iter()
            .position(|r| !r.revoked && r.owner_login == owner_login);

        let index = match active {
            Some(index) => index,
            None => {
                let known = records.iter().any(|r| {
                    r.owner_login == owner_login && hashes_match(&r.token_hash, presented_hash)
                });
                return Ok(if known {
                    SwapOutcome::Revoked
                } else {
                    SwapOutcome::NotFound
                });
            }
        };

        if records[index].expires_at <= now {
            return Ok(SwapOutcome::Expired);
        }
        if !hashes_match(&records[index].token_hash, presented_hash) {
            return Ok(SwapOutcome::Revoked);
        }
        if records.iter().any(|r| r.token_hash == replacement.token_hash) {
            return Err(DatabaseError::UniqueConstraintViolation("token_hash".to_string()).into());
        }

        records[index].revoked = true;
        records[index].revoked_at = Some(now);
        let id = insert(&mut records, replacement.into_record(now))?;
        Ok(SwapOutcome::Swapped(id))
    }

    async fn revoke_all(&self, owner_login: &str) -> Result<u64, AppError> {
        let mut records = lock(&self.records)?;
        Ok(revoke_active(&mut records, owner_login, Utc::now()))
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshRecord>, AppError> {
        let records = lock(&self.records)?;
        Ok(records.iter().find(|r| r.token_hash == token_hash).cloned())
    }

    async fn active_for(&self, owner_login: &str) -> Result<Vec<RefreshRecord>, AppError> {
        let records = lock(&self.records)?;
        Ok(records
            .iter()
            .filter(|r| !r.revoked && r.owner_login == owner_login)
            .cloned()
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|r| r.expires_at >= now);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_record(hash: &str, owner: &str) -> NewRefreshRecord {
        NewRefreshRecord {
            token_hash: hash.to_string(),
            owner_login: owner.to_string(),
            expires_at: Utc::now() + Duration::days(30),
        }
    }

    #[tokio::test]
    async fn replace_active_keeps_a_single_live_record() {
        let store = InMemoryRefreshStore::new();
        store.replace_active(new_record("h1", "a@test.com")).await.unwrap();
        store.replace_active(new_record("h2", "a@test.com")).await.unwrap();
        store.replace_active(new_record("h3", "b@test.com")).await.unwrap();

        let active = store.active_for("a@test.com").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_hash, "h2");
        assert!(store.find_by_hash("h1").await.unwrap().unwrap().revoked);
        assert_eq!(store.active_for("b@test.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_swap_changes_nothing() {
        let store = InMemoryRefreshStore::new();
        store.replace_active(new_record("h1", "a@test.com")).await.unwrap();

        let outcome = store
            .swap_active("a@test.com", "wrong", Utc::now(), new_record("h2", "a@test.com"))
            .await
            .unwrap();

        assert_eq!(outcome, SwapOutcome::Revoked);
        assert!(!store.find_by_hash("h1").await.unwrap().unwrap().revoked);
        assert!(store.find_by_hash("h2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn swap_of_expired_record_reports_expired() {
        let store = InMemoryRefreshStore::new();
        store.replace_active(new_record("h1", "a@test.com")).await.unwrap();

        let later = Utc::now() + Duration::days(31);
        let outcome = store
            .swap_active("a@test.com", "h1", later, new_record("h2", "a@test.com"))
            .await
            .unwrap();

        assert_eq!(outcome, SwapOutcome::Expired);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = InMemoryRefreshStore::new();
        store.replace_active(new_record("h1", "a@test.com")).await.unwrap();
        store.replace_active(new_record("h2", "b@test.com")).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 0);
        assert_eq!(
            store.purge_expired(Utc::now() + Duration::days(31)).await.unwrap(),
            2
        );
        assert!(store.find_by_hash("h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn soft_deleted_user_is_not_found() {
        let store = InMemoryCredentialStore::new();
        store
            .insert_user(UserRecord {
                id: Uuid::new_v4(),
                login: "a@test.com".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
            })
            .await
            .unwrap();

        store.soft_delete("a@test.com").unwrap();

        assert!(store.find_active_by_login("a@test.com").await.unwrap().is_none());
        assert!(store.update_role("a@test.com", Role::Admin).await.is_err());
    }
}
