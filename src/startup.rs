use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::AuthenticationEngine;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    change_password, change_role, get_current_principal, health_check, login, logout, refresh,
    register,
};

/// Register every route and the shared engine on an app
///
/// Used by `run` and by tests that drive the app in-process.
pub fn configure(cfg: &mut web::ServiceConfig, engine: Arc<AuthenticationEngine>) {
    cfg.app_data(web::Data::from(engine.clone()))
        // Public routes
        .route("/health_check", web::get().to(health_check))
        .route("/auth/register", web::post().to(register))
        .route("/auth/login", web::post().to(login))
        .route("/auth/refresh", web::post().to(refresh))
        // Protected routes; non-GET requests get the strong check
        .service(
            web::scope("/api")
                .wrap(JwtMiddleware::new(engine))
                .route("/me", web::get().to(get_current_principal))
                .route("/logout", web::post().to(logout))
                .route("/password", web::post().to(change_password))
                .route("/users/{login}/role", web::put().to(change_role)),
        );
}

pub fn run(
    listener: TcpListener,
    engine: Arc<AuthenticationEngine>,
) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        let engine = engine.clone();
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)
            .configure(move |cfg| configure(cfg, engine))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
