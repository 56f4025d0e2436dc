/// Authentication Engine
///
/// Orchestrates the session lineage of a principal:
///
/// ```text
/// ANONYMOUS     --login/register-->  AUTHENTICATED (access + refresh issued)
/// AUTHENTICATED --refresh ok------>  AUTHENTICATED (new pair, old refresh revoked)
/// AUTHENTICATED --refresh failed-->  ANONYMOUS (must log in again)
/// AUTHENTICATED --logout/password->  ANONYMOUS (every refresh revoked)
/// ```
///
/// Access tokens expire on their own; the engine keeps no session state besides
/// the refresh registry.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::credentials::CredentialVerifier;
use crate::auth::jwt::{IssuedToken, TokenCodec};
use crate::auth::password::hash_password;
use crate::auth::principal::Principal;
use crate::auth::refresh_token::{hash_token, RefreshRegistry};
use crate::auth::roles::{can_act, transition, Role, RoleTransition};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::store::{CredentialStore, RefreshRecordStore, UserRecord};

/// What a successful login, registration or refresh hands back
#[derive(Debug, Clone)]
pub struct Session {
    pub principal: Principal,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

pub struct AuthenticationEngine {
    verifier: CredentialVerifier,
    codec: TokenCodec,
    registry: Arc<RefreshRegistry>,
    credentials: Arc<dyn CredentialStore>,
}

impl AuthenticationEngine {
    /// # Errors
    /// - `Config` if the JWT settings are rejected by `JwtSettings::validate`
    /// - `Internal` if the password hasher cannot be initialised
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        refresh_records: Arc<dyn RefreshRecordStore>,
        jwt: &JwtSettings,
        hash_cost: u32,
    ) -> Result<Self, AppError> {
        jwt.validate()?;

        Ok(Self {
            verifier: CredentialVerifier::new(credentials.clone(), hash_cost)?,
            codec: TokenCodec::new(jwt),
            registry: Arc::new(RefreshRegistry::new(refresh_records)),
            credentials,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn registry(&self) -> Arc<RefreshRegistry> {
        self.registry.clone()
    }

    /// Authenticate with login and password and open a session
    pub async fn login(&self, login: &str, password: &str) -> Result<Session, AppError> {
        let principal = self.verifier.verify(login, password).await?;
        let session = self.open_session(principal).await?;

        tracing::info!(login = %session.principal.login, "User logged in successfully");
        Ok(session)
    }

    /// Create a USER account and open a session for it
    ///
    /// # Errors
    /// - `Validation` if the password is too weak
    /// - `DatabaseError::UniqueConstraintViolation` if the login is taken
    pub async fn register(&self, login: &str, password: &str) -> Result<Session, AppError> {
        let password_hash = hash_password(password, self.verifier.hash_cost())?;

        self.credentials
            .insert_user(UserRecord {
                id: Uuid::new_v4(),
                login: login.to_string(),
                password_hash,
                role: Role::User,
            })
            .await?;

        let session = self.open_session(Principal::new(login, Role::User)).await?;

        tracing::info!(login = %login, "User registered successfully");
        Ok(session)
    }

    /// Exchange a refresh token for a new access/refresh pair
    ///
    /// The presented token is consumed. If rotation fails, the pair minted for
    /// it is dropped and never reaches the client.
    pub async fn refresh(&self, raw_refresh: &str) -> Result<Session, AppError> {
        let subject = self.codec.verify_refresh(raw_refresh)?;
        let presented_hash = hash_token(raw_refresh);

        let principal = match self.credentials.find_active_by_login(&subject).await? {
            Some(user) => Principal::new(user.login, user.role),
            None => {
                tracing::warn!(login = %subject, "Refresh for missing account");
                self.registry.revoke_all(&subject).await?;
                return Err(AuthError::RefreshRevoked.into());
            }
        };

        let access_token = self.codec.issue_access(&principal)?;
        let refresh_token = self.codec.issue_refresh(&principal)?;

        self.registry
            .rotate(
                &subject,
                &presented_hash,
                &hash_token(&refresh_token.value),
                refresh_token.expires_at,
            )
            .await?;

        tracing::info!(login = %subject, "Token refreshed successfully");
        Ok(Session {
            principal,
            access_token,
            refresh_token,
        })
    }

    /// Resolve the principal behind an access token
    ///
    /// With `strong`, the account is re-read and its current role replaces the
    /// one in the token. Every state-mutating request must use `strong`.
    pub async fn authorize(&self, raw_access: &str, strong: bool) -> Result<Principal, AppError> {
        let principal = self.codec.verify_access(raw_access)?;
        if !strong {
            return Ok(principal);
        }

        match self.credentials.find_active_by_login(&principal.login).await? {
            Some(user) => {
                if user.role != principal.role {
                    tracing::info!(
                        login = %principal.login,
                        token_role = %principal.role,
                        current_role = %user.role,
                        "Token role is stale, using current role"
                    );
                }
                Ok(principal.with_role(user.role))
            }
            None => {
                tracing::warn!(login = %principal.login, "Access token for missing account");
                Err(AuthError::TokenInvalid.into())
            }
        }
    }

    /// End every session of the principal
    pub async fn logout(&self, principal: &Principal) -> Result<u64, AppError> {
        self.registry.revoke_all(&principal.login).await
    }

    /// Replace the principal's password and end every session
    ///
    /// Sessions are revoked before the new hash is written. A failure at either
    /// step leaves the old password in place and is safe to retry.
    pub async fn change_password(
        &self,
        principal: &Principal,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        self.verifier
            .verify_record(&principal.login, current_password)
            .await?;

        let password_hash = hash_password(new_password, self.verifier.hash_cost())?;
        self.registry.revoke_all(&principal.login).await?;
        self.credentials
            .update_password_hash(&principal.login, &password_hash)
            .await?;

        tracing::info!(login = %principal.login, "Password changed");
        Ok(())
    }

    /// Move `target_login` to `new_role` on behalf of `actor`
    ///
    /// # Errors
    /// - `DatabaseError::NotFound` if the target account does not exist
    /// - `InsufficientRank` if the actor may not act on the target's current or new role
    /// - `RoleAlreadyAtTarget` / `InvalidRoleTransition` from the transition guard
    pub async fn change_role(
        &self,
        actor: &Principal,
        target_login: &str,
        new_role: Role,
    ) -> Result<RoleTransition, AppError> {
        let target = self
            .credentials
            .find_active_by_login(target_login)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("user {}", target_login)))?;

        if !can_act(actor.role, target.role) || !can_act(actor.role, new_role) {
            tracing::warn!(
                actor = %actor.login,
                actor_role = %actor.role,
                target = %target_login,
                target_role = %target.role,
                requested_role = %new_role,
                "Role change rejected"
            );
            return Err(AuthError::InsufficientRank.into());
        }

        let step = transition(target.role, new_role)?;
        self.credentials.update_role(target_login, new_role).await?;

        tracing::info!(
            actor = %actor.login,
            target = %target_login,
            from = %target.role,
            to = %new_role,
            step = ?step,
            "Role changed"
        );
        Ok(step)
    }

    async fn open_session(&self, principal: Principal) -> Result<Session, AppError> {
        let access_token = self.codec.issue_access(&principal)?;
        let refresh_token = self.codec.issue_refresh(&principal)?;

        self.registry
            .store(
                &hash_token(&refresh_token.value),
                &principal.login,
                refresh_token.expires_at,
            )
            .await?;

        Ok(Session {
            principal,
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        InMemoryCredentialStore, InMemoryRefreshStore, NewRefreshRecord, RefreshRecord, SwapOutcome,
    };

    const PASSWORD: &str = "Secret123!";

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 2_592_000,
            issuer: "test".to_string(),
            leeway: 0,
        }
    }

    struct Fixture {
        credentials: Arc<InMemoryCredentialStore>,
        refresh: Arc<InMemoryRefreshStore>,
        engine: AuthenticationEngine,
    }

    async fn seeded_credentials(users: &[(&str, Role)]) -> Arc<InMemoryCredentialStore> {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        for (login, role) in users {
            credentials
                .insert_user(UserRecord {
                    id: Uuid::new_v4(),
                    login: login.to_string(),
                    password_hash: hash_password(PASSWORD, 4).unwrap(),
                    role: *role,
                })
                .await
                .unwrap();
        }
        credentials
    }

    async fn fixture(users: &[(&str, Role)]) -> Fixture {
        let credentials = seeded_credentials(users).await;
        let refresh = Arc::new(InMemoryRefreshStore::new());
        let engine =
            AuthenticationEngine::new(credentials.clone(), refresh.clone(), &jwt_settings(), 4)
                .unwrap();
        Fixture {
            credentials,
            refresh,
            engine,
        }
    }

    #[test]
    fn engine_refuses_weak_jwt_settings() {
        let mut jwt = jwt_settings();
        jwt.secret = "short".to_string();

        let result = AuthenticationEngine::new(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryRefreshStore::new()),
            &jwt,
            4,
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn login_issues_two_distinct_tokens() {
        let f = fixture(&[("a@test.com", Role::User)]).await;

        let session = f.engine.login("a@test.com", PASSWORD).await.unwrap();

        assert_eq!(session.principal.role, Role::User);
        assert!(!session.access_token.value.is_empty());
        assert!(!session.refresh_token.value.is_empty());
        assert_ne!(session.access_token.value, session.refresh_token.value);
        assert_eq!(f.refresh.active_for("a@test.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn login_with_bad_password_is_invalid_credentials() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let err = f.engine.login("a@test.com", "Wrong123!").await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_rejects_password_sharing_72_byte_prefix() {
        let f = fixture(&[]).await;
        let password = format!("Aa1{}", "x".repeat(69));
        f.engine.register("long@test.com", &password).await.unwrap();

        let err = f
            .engine
            .login("long@test.com", &format!("{}WRONG", password))
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InvalidCredentials));

        let too_long = f
            .engine
            .register("longer@test.com", &format!("{}RealSuffix9", password))
            .await
            .unwrap_err();
        assert!(matches!(too_long, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn second_login_supersedes_first_refresh() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let first = f.engine.login("a@test.com", PASSWORD).await.unwrap();
        let _second = f.engine.login("a@test.com", PASSWORD).await.unwrap();

        let err = f.engine.refresh(&first.refresh_token.value).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::RefreshRevoked));
        assert_eq!(f.refresh.active_for("a@test.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_replay() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let session = f.engine.login("a@test.com", PASSWORD).await.unwrap();

        let rotated = f.engine.refresh(&session.refresh_token.value).await.unwrap();
        assert_ne!(rotated.refresh_token.value, session.refresh_token.value);

        let old = f
            .refresh
            .find_by_hash(&hash_token(&session.refresh_token.value))
            .await
            .unwrap()
            .unwrap();
        assert!(old.revoked);

        let replay = f.engine.refresh(&session.refresh_token.value).await.unwrap_err();
        assert_eq!(replay.auth_kind(), Some(AuthError::RefreshRevoked));

        // the legitimate successor still works
        assert!(f.engine.refresh(&rotated.refresh_token.value).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let session = f.engine.login("a@test.com", PASSWORD).await.unwrap();

        let err = f.engine.refresh(&session.access_token.value).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn refresh_for_deleted_account_is_revoked() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let session = f.engine.login("a@test.com", PASSWORD).await.unwrap();
        f.credentials.soft_delete("a@test.com").unwrap();

        let err = f.engine.refresh(&session.refresh_token.value).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::RefreshRevoked));
        assert!(f.refresh.active_for("a@test.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn strong_authorize_uses_current_role() {
        let f = fixture(&[("admin@test.com", Role::Admin)]).await;
        let session = f.engine.login("admin@test.com", PASSWORD).await.unwrap();
        f.credentials.update_role("admin@test.com", Role::Manager).await.unwrap();

        let weak = f.engine.authorize(&session.access_token.value, false).await.unwrap();
        let strong = f.engine.authorize(&session.access_token.value, true).await.unwrap();

        assert_eq!(weak.role, Role::Admin);
        assert_eq!(strong.role, Role::Manager);
        assert!(!strong.has_permission("role:manage"));
    }

    #[tokio::test]
    async fn strong_authorize_rejects_deleted_account() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let session = f.engine.login("a@test.com", PASSWORD).await.unwrap();
        f.credentials.soft_delete("a@test.com").unwrap();

        assert!(f.engine.authorize(&session.access_token.value, false).await.is_ok());
        let err = f.engine.authorize(&session.access_token.value, true).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn register_creates_user_and_session() {
        let f = fixture(&[]).await;
        let session = f.engine.register("new@test.com", PASSWORD).await.unwrap();

        assert_eq!(session.principal.role, Role::User);
        assert!(f.engine.login("new@test.com", PASSWORD).await.is_ok());

        let duplicate = f.engine.register("new@test.com", PASSWORD).await.unwrap_err();
        assert!(matches!(
            duplicate,
            AppError::Database(DatabaseError::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn logout_revokes_refresh() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let session = f.engine.login("a@test.com", PASSWORD).await.unwrap();

        assert_eq!(f.engine.logout(&session.principal).await.unwrap(), 1);

        let err = f.engine.refresh(&session.refresh_token.value).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::RefreshRevoked));
    }

    #[tokio::test]
    async fn change_password_revokes_sessions_and_swaps_password() {
        let f = fixture(&[("a@test.com", Role::User)]).await;
        let session = f.engine.login("a@test.com", PASSWORD).await.unwrap();

        let wrong = f
            .engine
            .change_password(&session.principal, "Wrong123!", "Another456!")
            .await
            .unwrap_err();
        assert_eq!(wrong.auth_kind(), Some(AuthError::InvalidCredentials));

        f.engine
            .change_password(&session.principal, PASSWORD, "Another456!")
            .await
            .unwrap();

        assert!(f.engine.refresh(&session.refresh_token.value).await.is_err());
        assert!(f.engine.login("a@test.com", PASSWORD).await.is_err());
        assert!(f.engine.login("a@test.com", "Another456!").await.is_ok());
    }

    /// Refresh store whose `revoke_all` always fails
    struct UnrevokableStore(InMemoryRefreshStore);

    #[async_trait::async_trait]
    impl RefreshRecordStore for UnrevokableStore {
        async fn replace_active(&self, record: NewRefreshRecord) -> Result<Uuid, AppError> {
            self.0.replace_active(record).await
        }

        async fn swap_active(
            &self,
            owner_login: &str,
            presented_hash: &str,
            now: chrono::DateTime<chrono::Utc>,
            replacement: NewRefreshRecord,
        ) -> Result<SwapOutcome, AppError> {
            self.0
                .swap_active(owner_login, presented_hash, now, replacement)
                .await
        }

        async fn revoke_all(&self, _owner_login: &str) -> Result<u64, AppError> {
            Err(DatabaseError::ConnectionPool("unavailable".to_string()).into())
        }

        async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshRecord>, AppError> {
            self.0.find_by_hash(token_hash).await
        }

        async fn active_for(&self, owner_login: &str) -> Result<Vec<RefreshRecord>, AppError> {
            self.0.active_for(owner_login).await
        }

        async fn purge_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64, AppError> {
            self.0.purge_expired(now).await
        }
    }

    #[tokio::test]
    async fn failed_revocation_keeps_old_password() {
        let credentials = seeded_credentials(&[("a@test.com", Role::User)]).await;
        let engine = AuthenticationEngine::new(
            credentials,
            Arc::new(UnrevokableStore(InMemoryRefreshStore::new())),
            &jwt_settings(),
            4,
        )
        .unwrap();
        let session = engine.login("a@test.com", PASSWORD).await.unwrap();

        assert!(engine
            .change_password(&session.principal, PASSWORD, "Another456!")
            .await
            .is_err());

        assert!(engine.login("a@test.com", PASSWORD).await.is_ok());
        assert!(engine.login("a@test.com", "Another456!").await.is_err());
    }

    #[tokio::test]
    async fn change_role_enforces_hierarchy() {
        let f = fixture(&[
            ("admin@test.com", Role::Admin),
            ("manager@test.com", Role::Manager),
            ("user@test.com", Role::User),
        ])
        .await;
        let admin = Principal::new("admin@test.com", Role::Admin);
        let manager = Principal::new("manager@test.com", Role::Manager);

        assert_eq!(
            f.engine.change_role(&manager, "user@test.com", Role::Manager).await.unwrap(),
            RoleTransition::Promotion
        );

        // a manager cannot mint admins
        let err = f
            .engine
            .change_role(&manager, "user@test.com", Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::InsufficientRank));

        let err = f
            .engine
            .change_role(&admin, "admin@test.com", Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::RoleAlreadyAtTarget));

        assert_eq!(
            f.engine.change_role(&admin, "manager@test.com", Role::User).await.unwrap(),
            RoleTransition::Revocation
        );

        let missing = f
            .engine
            .change_role(&admin, "ghost@test.com", Role::Manager)
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::Database(DatabaseError::NotFound(_))));
    }
}
