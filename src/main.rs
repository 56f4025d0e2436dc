use authgate::auth::{spawn_sweeper, AuthenticationEngine};
use authgate::configuration::get_configuration;
use authgate::startup::run;
use authgate::store::{PgCredentialStore, PgRefreshStore};
use authgate::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(startup_error(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to migrate database: {}", e);
            startup_error(std::io::ErrorKind::Other, "Database migration error")
        })?;

    tracing::info!("Database ready");

    let engine = AuthenticationEngine::new(
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(PgRefreshStore::new(pool)),
        &configuration.jwt,
        configuration.password.hash_cost,
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to initialise authentication engine");
        startup_error(std::io::ErrorKind::Other, "Engine initialisation error")
    })?;
    let engine = Arc::new(engine);

    spawn_sweeper(
        engine.registry(),
        Duration::from_secs(configuration.refresh.sweep_interval_seconds.max(1)),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, engine)?;
    server.await
}
