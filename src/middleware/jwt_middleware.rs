/// Bearer Authentication Middleware
///
/// Validates the access token from the Authorization header and injects the
/// resolved `Principal` into request extensions. Handlers take it explicitly as
/// `web::ReqData<Principal>`; there is no ambient security context.
///
/// Safe methods (GET, HEAD) get the stateless token check. Every other method
/// gets the strong check, which re-reads the account's current role.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::AuthenticationEngine;
use crate::error::{AppError, AuthError};

/// Bearer middleware for protecting routes
pub struct JwtMiddleware {
    engine: Arc<AuthenticationEngine>,
}

impl JwtMiddleware {
    pub fn new(engine: Arc<AuthenticationEngine>) -> Self {
        Self { engine }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            engine: self.engine.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    engine: Arc<AuthenticationEngine>,
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn requires_strong_check(method: &Method) -> bool {
    !(method == Method::GET || method == Method::HEAD)
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = bearer_token(&req);
        let strong = requires_strong_check(req.method());
        let engine = self.engine.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let token = match token {
                Some(token) => token,
                None => {
                    tracing::warn!(path = %req.path(), "Missing or invalid Authorization header");
                    return Err(AppError::Auth(AuthError::MissingToken).into());
                }
            };

            let principal = engine.authorize(&token, strong).await?;

            tracing::debug!(
                login = %principal.login,
                role = %principal.role,
                strong,
                "Access token validated"
            );
            req.extensions_mut().insert(principal);

            service.call(req).await
        })
    }
}
