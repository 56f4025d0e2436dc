use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::auth::Role;
use crate::error::{AppError, DatabaseError};
use crate::store::{
    hashes_match, CredentialStore, NewRefreshRecord, RefreshRecord, RefreshRecordStore,
    SwapOutcome, UserRecord,
};

type RefreshRow = (Uuid, String, String, DateTime<Utc>, bool, DateTime<Utc>, Option<DateTime<Utc>>);

const REFRESH_COLUMNS: &str =
    "id, token_hash, owner_login, expires_at, revoked, created_at, revoked_at";

fn refresh_record(row: RefreshRow) -> RefreshRecord {
    let (id, token_hash, owner_login, expires_at, revoked, created_at, revoked_at) = row;
    RefreshRecord {
        id,
        token_hash,
        owner_login,
        expires_at,
        revoked,
        created_at,
        revoked_at,
    }
}

fn parse_role(raw: &str) -> Result<Role, AppError> {
    raw.parse::<Role>().map_err(|_| {
        AppError::Database(DatabaseError::UnexpectedError(format!(
            "unknown role {} in users table",
            raw
        )))
    })
}

/// Credential store over the `users` table
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_active_by_login(&self, login: &str) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String)>(
            r#"
            SELECT id, login, password_hash, role
            FROM users
            WHERE login = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, login, password_hash, role)| {
            Ok(UserRecord {
                id,
                login,
                password_hash,
                role: parse_role(&role)?,
            })
        })
        .transpose()
    }

    async fn insert_user(&self, user: UserRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, login, password_hash, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_role(&self, login: &str, role: Role) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET role = $1, updated_at = $2
            WHERE login = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(role.as_str())
        .bind(Utc::now())
        .bind(login)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("user {}", login)).into());
        }
        Ok(())
    }

    async fn update_password_hash(
        &self,
        login: &str,
        password_hash: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET password_hash = $1, updated_at = $2
            WHERE login = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(password_hash)
        .bind(Utc::now())
        .bind(login)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("user {}", login)).into());
        }
        Ok(())
    }
}

/// Refresh record store over the `refresh_records` table
///
/// Writes for one owner are serialized by a transaction-scoped advisory lock
/// on the owner's login. A partial unique index on `owner_login WHERE NOT
/// revoked` backs the single-active-record invariant.
pub struct PgRefreshStore {
    pool: PgPool,
}

impl PgRefreshStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_owner(tx: &mut Transaction<'_, Postgres>, owner_login: &str) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(owner_login)
        .execute(&mut *tx)
        .await?;
    Ok(())
}

async fn insert_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &RefreshRecord,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_records (id, token_hash, owner_login, expires_at, revoked, created_at)
        VALUES ($1, $2, $3, $4, false, $5)
        "#,
    )
    .bind(record.id)
    .bind(&record.token_hash)
    .bind(&record.owner_login)
    .bind(record.expires_at)
    .bind(record.created_at)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

#[async_trait]
impl RefreshRecordStore for PgRefreshStore {
    async fn replace_active(&self, record: NewRefreshRecord) -> Result<Uuid, AppError> {
        let now = Utc::now();
        let record = record.into_record(now);

        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, &record.owner_login).await?;

        sqlx::query(
            r#"
            UPDATE refresh_records
            SET revoked = true, revoked_at = $1
            WHERE owner_login = $2 AND revoked = false
            "#,
        )
        .bind(now)
        .bind(&record.owner_login)
        .execute(&mut tx)
        .await?;

        insert_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(record.id)
    }

    async fn swap_active(
        &self,
        owner_login: &str,
        presented_hash: &str,
        now: DateTime<Utc>,
        replacement: NewRefreshRecord,
    ) -> Result<SwapOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, owner_login).await?;

        let active = sqlx::query_as::<_, (Uuid, String, DateTime<Utc>)>(
            r#"
            SELECT id, token_hash, expires_at
            FROM refresh_records
            WHERE owner_login = $1 AND revoked = false
            FOR UPDATE
            "#,
        )
        .bind(owner_login)
        .fetch_optional(&mut tx)
        .await?;

        // Dropping `tx` on any early return rolls back, leaving the store as it was.
        let (active_id, stored_hash, expires_at) = match active {
            Some(row) => row,
            None => {
                let known = sqlx::query_scalar::<_, String>(
                    "SELECT token_hash FROM refresh_records WHERE owner_login = $1 AND token_hash = $2",
                )
                .bind(owner_login)
                .bind(presented_hash)
                .fetch_optional(&mut tx)
                .await?;
                return Ok(if known.is_some() {
                    SwapOutcome::Revoked
                } else {
                    SwapOutcome::NotFound
                });
            }
        };

        if expires_at <= now {
            return Ok(SwapOutcome::Expired);
        }
        if !hashes_match(&stored_hash, presented_hash) {
            return Ok(SwapOutcome::Revoked);
        }

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_records
            SET revoked = true, revoked_at = $1
            WHERE id = $2 AND revoked = false
            "#,
        )
        .bind(now)
        .bind(active_id)
        .execute(&mut tx)
        .await?;

        if revoked.rows_affected() != 1 {
            return Ok(SwapOutcome::Revoked);
        }

        let record = replacement.into_record(now);
        insert_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(SwapOutcome::Swapped(record.id))
    }

    async fn revoke_all(&self, owner_login: &str) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut tx, owner_login).await?;

        let result = sqlx::query(
            r#"
            UPDATE refresh_records
            SET revoked = true, revoked_at = $1
            WHERE owner_login = $2 AND revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(owner_login)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshRecord>, AppError> {
        let row = sqlx::query_as::<_, RefreshRow>(&format!(
            "SELECT {} FROM refresh_records WHERE token_hash = $1",
            REFRESH_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(refresh_record))
    }

    async fn active_for(&self, owner_login: &str) -> Result<Vec<RefreshRecord>, AppError> {
        let rows = sqlx::query_as::<_, RefreshRow>(&format!(
            "SELECT {} FROM refresh_records WHERE owner_login = $1 AND revoked = false",
            REFRESH_COLUMNS
        ))
        .bind(owner_login)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(refresh_record).collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_records WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
