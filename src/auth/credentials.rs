/// Credential Verification
///
/// Checks a login/password pair against the credential store. An unknown login
/// and a wrong password fail the same way and take the same time.

use std::sync::Arc;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::principal::Principal;
use crate::error::{AppError, AuthError};
use crate::store::{CredentialStore, UserRecord};

// Only ever compared against, never accepted: it is hashed at startup and
// verify() runs against it when the login is unknown.
const TIMING_DECOY: &str = "TimingDecoy-0-Password";

pub struct CredentialVerifier {
    store: Arc<dyn CredentialStore>,
    hash_cost: u32,
    decoy_hash: String,
}

impl CredentialVerifier {
    /// # Errors
    /// Returns error if bcrypt cannot hash with `hash_cost`
    pub fn new(store: Arc<dyn CredentialStore>, hash_cost: u32) -> Result<Self, AppError> {
        let decoy_hash = hash_password(TIMING_DECOY, hash_cost)?;
        Ok(Self {
            store,
            hash_cost,
            decoy_hash,
        })
    }

    pub fn hash_cost(&self) -> u32 {
        self.hash_cost
    }

    /// Verify `password` for `login` and return the account's principal
    ///
    /// # Errors
    /// - `InvalidCredentials` for an unknown (or deleted) login or a wrong password
    /// - store errors propagate unchanged
    pub async fn verify(&self, login: &str, password: &str) -> Result<Principal, AppError> {
        self.verify_record(login, password)
            .await
            .map(|user| Principal::new(user.login, user.role))
    }

    pub(crate) async fn verify_record(
        &self,
        login: &str,
        password: &str,
    ) -> Result<UserRecord, AppError> {
        let user = self.store.find_active_by_login(login).await?;

        let (hash, user) = match user {
            Some(user) => (user.password_hash.clone(), Some(user)),
            None => (self.decoy_hash.clone(), None),
        };

        let matches = verify_password(password, &hash)?;

        match user {
            Some(user) if matches => Ok(user),
            Some(_) => {
                tracing::debug!(login = %login, "Password mismatch");
                Err(AuthError::InvalidCredentials.into())
            }
            None => {
                tracing::debug!(login = %login, "Unknown login");
                Err(AuthError::InvalidCredentials.into())
            }
        }
    }
}
