/// Authentication Routes
///
/// Registration, login, token refresh, logout and password change.
/// The refresh token travels in an HttpOnly cookie scoped to `/auth/refresh`.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::{AuthenticationEngine, Principal, Session};
use crate::error::{AppError, AuthError, ErrorContext, ValidationError};

pub const REFRESH_COOKIE: &str = "refresh_token";
pub const REFRESH_COOKIE_PATH: &str = "/auth/refresh";

const MAX_LOGIN_LENGTH: usize = 254;

/// Login or registration request
#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for CredentialsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsRequest")
            .field("login", &self.login)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Token refresh request, for clients that cannot send the cookie
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Password change request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangePasswordRequest { .. }")
    }
}

/// Authentication response; the refresh token goes in the cookie only
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub principal: Principal,
}

fn refresh_cookie(value: String, max_age_seconds: i64) -> Cookie<'static> {
    Cookie::build(REFRESH_COOKIE, value)
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_seconds))
        .finish()
}

fn cleared_refresh_cookie() -> Cookie<'static> {
    refresh_cookie(String::new(), 0)
}

fn validate_credentials(form: &CredentialsRequest) -> Result<(), AppError> {
    if form.login.trim().is_empty() {
        return Err(ValidationError::EmptyField("login".to_string()).into());
    }
    if form.login.len() > MAX_LOGIN_LENGTH {
        return Err(ValidationError::TooLong("login".to_string(), MAX_LOGIN_LENGTH).into());
    }
    if form.password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()).into());
    }
    Ok(())
}

fn session_response(
    mut builder: actix_web::HttpResponseBuilder,
    session: Session,
    engine: &AuthenticationEngine,
) -> HttpResponse {
    builder
        .cookie(refresh_cookie(
            session.refresh_token.value,
            engine.codec().refresh_token_expiry(),
        ))
        .json(AuthResponse {
            access_token: session.access_token.value,
            token_type: "Bearer".to_string(),
            expires_in: engine.codec().access_token_expiry(),
            principal: session.principal,
        })
}

/// POST /auth/register
///
/// Create a USER account and open a session.
///
/// # Errors
/// - 400: Validation errors (empty login, weak password)
/// - 409: Login already registered
pub async fn register(
    form: web::Json<CredentialsRequest>,
    engine: web::Data<AuthenticationEngine>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");
    validate_credentials(&form)?;

    let session = engine.register(form.login.trim(), &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        login = %session.principal.login,
        "Registration completed"
    );
    Ok(session_response(HttpResponse::Created(), session, &engine))
}

/// POST /auth/login
///
/// # Errors
/// - 400: Empty login or password
/// - 401: Invalid credentials (unknown login and wrong password are indistinguishable)
pub async fn login(
    form: web::Json<CredentialsRequest>,
    engine: web::Data<AuthenticationEngine>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    validate_credentials(&form)?;

    let session = engine.login(form.login.trim(), &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        login = %session.principal.login,
        "Login completed"
    );
    Ok(session_response(HttpResponse::Ok(), session, &engine))
}

/// POST /auth/refresh
///
/// Rotate the refresh token (cookie first, then JSON body) and issue a new
/// access token. The presented refresh token is consumed.
///
/// # Errors
/// - 401: Missing, invalid, expired, revoked or replayed refresh token
pub async fn refresh(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    engine: web::Data<AuthenticationEngine>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let presented = req
        .cookie(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| body.map(|body| body.into_inner().refresh_token))
        .ok_or(AuthError::MissingToken)?;

    let session = engine.refresh(&presented).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        login = %session.principal.login,
        "Refresh completed"
    );
    Ok(session_response(HttpResponse::Ok(), session, &engine))
}

/// POST /api/logout
///
/// Revoke every refresh token of the caller and clear the cookie.
pub async fn logout(
    principal: web::ReqData<Principal>,
    engine: web::Data<AuthenticationEngine>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("logout").with_login(&principal.login);

    let revoked = engine.logout(&principal).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        login = ?context.login,
        revoked,
        "Logout completed"
    );
    Ok(HttpResponse::NoContent()
        .cookie(cleared_refresh_cookie())
        .finish())
}

/// POST /api/password
///
/// # Errors
/// - 400: New password too weak
/// - 401: Current password wrong
pub async fn change_password(
    principal: web::ReqData<Principal>,
    form: web::Json<ChangePasswordRequest>,
    engine: web::Data<AuthenticationEngine>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("password_change").with_login(&principal.login);

    engine
        .change_password(&principal, &form.current_password, &form.new_password)
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        login = ?context.login,
        "Password change completed"
    );
    Ok(HttpResponse::NoContent()
        .cookie(cleared_refresh_cookie())
        .finish())
}

/// GET /api/me
///
/// The caller's principal as carried by the access token.
pub async fn get_current_principal(principal: web::ReqData<Principal>) -> HttpResponse {
    HttpResponse::Ok().json(principal.into_inner())
}
