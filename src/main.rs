use actix_web::{middleware::Compress, App, HttpServer};
use actix_cors::Cors;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod models;
mod moderation;
mod notify;
mod openapi;
mod rate_limit;
mod repo;
mod routes;
mod security;
mod storage;
mod visibility;

use notify::LogSink;
use openapi::ApiDoc;
use rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use routes::{config, AppState};
use security::SecurityHeaders;
use std::sync::Arc;
use storage::build_file_store;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment variables are normally set externally (shell, systemd,
    // Docker). Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping Galleria server");

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = {
        info!("Using in-memory repository backend");
        repo::inmem::InMemRepo::new()
    };

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .expect("Failed to create Pg pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        info!("Using Postgres repository backend");
        repo::pg::PgRepo::new(pool)
    };

    let openapi = ApiDoc::openapi();
    let file_store = build_file_store();
    let notifier: Arc<dyn notify::NotificationSink> = Arc::new(LogSink);
    let rate_limits = RateLimiterFacade::new(
        InMemoryRateLimiter::new(true),
        RateLimitConfig::from_env(),
    );

    let state = AppState {
        repo: Arc::new(repo),
        file_store,
        notifier,
        rate_limits,
    };

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .app_data(actix_web::web::Data::new(state.clone()))
    })
    .bind(("0.0.0.0", 8080))?;

    info!("Listening on http://0.0.0.0:8080");

    server.run().await
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    use std::env;

    if env::var("JWT_SECRET").is_err() {
        eprintln!("Missing required environment variable JWT_SECRET");
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }
}
