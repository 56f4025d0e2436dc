/// JWT Token Codec
///
/// Signs and verifies access and refresh tokens (HS256). The codec holds the
/// process-wide signing key, loaded once from configuration and never rotated.
/// It performs no I/O.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;

use crate::auth::claims::{AccessClaims, RefreshClaims};
use crate::auth::principal::Principal;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// A signed token together with the instant it stops being valid
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_token_expiry: i64,
    refresh_token_expiry: i64,
}

impl TokenCodec {
    pub fn new(config: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = config.leeway;

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_token_expiry: config.access_token_expiry,
            refresh_token_expiry: config.refresh_token_expiry,
        }
    }

    /// Access token lifetime in seconds
    pub fn access_token_expiry(&self) -> i64 {
        self.access_token_expiry
    }

    /// Refresh token lifetime in seconds
    pub fn refresh_token_expiry(&self) -> i64 {
        self.refresh_token_expiry
    }

    /// Build a short-lived access token carrying the principal's role and permissions
    pub fn issue_access(&self, principal: &Principal) -> Result<IssuedToken, AppError> {
        let claims = AccessClaims::new(principal, self.access_token_expiry, self.issuer.clone());
        let expires_at = timestamp(claims.exp)?;
        let value = self.sign(&claims)?;
        Ok(IssuedToken { value, expires_at })
    }

    /// Build a long-lived refresh token naming only the subject
    pub fn issue_refresh(&self, principal: &Principal) -> Result<IssuedToken, AppError> {
        let claims =
            RefreshClaims::new(&principal.login, self.refresh_token_expiry, self.issuer.clone());
        let expires_at = timestamp(claims.exp)?;
        let value = self.sign(&claims)?;
        Ok(IssuedToken { value, expires_at })
    }

    /// Verify an access token and rebuild its principal
    ///
    /// # Errors
    /// - `TokenInvalid` for a bad signature, wrong issuer or malformed claims
    /// - `TokenExpired` for a genuine token past its `exp`
    pub fn verify_access(&self, token: &str) -> Result<Principal, AppError> {
        self.verify::<AccessClaims>(token)
            .map(AccessClaims::into_principal)
    }

    /// Verify a refresh token and return its subject
    pub fn verify_refresh(&self, token: &str) -> Result<String, AppError> {
        self.verify::<RefreshClaims>(token).map(|claims| claims.sub)
    }

    fn sign<T: serde::Serialize>(&self, claims: &T) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, AppError> {
        decode::<T>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("JWT expired");
                    AppError::Auth(AuthError::TokenExpired)
                }
                kind => {
                    tracing::warn!(reason = ?kind, "JWT validation error");
                    AppError::Auth(AuthError::TokenInvalid)
                }
            })
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))
}
