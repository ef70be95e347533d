//! Course Repository Backend - library for app logic and testing

pub mod activity;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    services::ServeDir, trace::TraceLayer,
};

use crate::config::{AppConfig, ConfigError};
use crate::db::{MemoryStore, PgStore, Store};
use crate::state::AppState;

/// Request bodies are capped just above the 5 MB upload limit.
const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// CORS for the configured frontend origins.
pub fn configure_cors(allowed_origins: &[HeaderValue]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allowed_origins.to_vec())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

fn auth_routes() -> Router<AppState> {
    use routes::auth;

    Router::new()
        .route("/signup", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/profile", axum::routing::put(auth::update_profile))
        .route("/change-password", axum::routing::put(auth::change_password))
        .route("/upload-avatar", post(auth::upload_avatar))
        .route("/users", get(auth::list_users))
        .route("/activity", get(auth::my_activity))
}

fn course_routes() -> Router<AppState> {
    use routes::courses;

    Router::new()
        .route(
            "/",
            get(courses::list_courses).post(courses::create_course),
        )
        .route("/search", get(courses::search_courses))
        .route("/materials/all", get(courses::all_materials))
        .route("/complete-course", post(courses::complete_by_body))
        .route("/student/progress", get(courses::student_progress))
        .route("/student/completed", get(courses::completed_courses))
        .route("/student/activity", get(courses::student_activity))
        .route(
            "/{id}",
            get(courses::get_course)
                .put(courses::update_course)
                .delete(courses::delete_course),
        )
        .route("/{id}/materials", post(courses::add_material))
        .route("/{id}/upload-cover", post(courses::upload_cover))
        .route("/{id}/enroll", post(courses::enroll))
        .route("/{id}/complete", post(courses::complete))
        .route("/{id}/reviews", post(courses::add_review))
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors(&state.config.allowed_origins);
    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .nest("/api/auth", auth_routes())
        .nest("/api/courses", course_routes())
        .route("/api/health", get(routes::health::health))
        .route("/api/health/ready", get(routes::health::ready))
        .nest_service("/uploads", uploads)
        .fallback(routes::not_found)
        .with_state(state)
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        // Multipart reads would otherwise stop at axum's 2 MB default.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
}

/// Connect the backend named by `DATABASE_URL`: Postgres (with migrations)
/// or the in-process store for `memory://`.
pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn Store>, StartupError> {
    if config.uses_memory_store() {
        tracing::warn!("DATABASE_URL is memory://, data will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = db::init_pool(&config.database_url, &config.db).await?;
    db::run_migrations(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run the server (used by main).
pub async fn run() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();

    // Dropping these early shuts down the log writer threads and loses
    // buffered lines.
    let _log_guards = logging::init();

    let config = AppConfig::from_env()?;
    let addr = config.bind_addr;

    let store = build_store(&config).await?;
    let state = AppState::new(store.clone(), config);
    let app = create_app(state);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(StartupError::Serve)?;

    store.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_store_selects_memory_backend() {
        let config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("memory://".to_string()),
            "JWT_SECRET" => Some("test-secret".to_string()),
            _ => None,
        })
        .unwrap();
        let store = build_store(&config).await.unwrap();
        assert!(store.ping().await.is_ok());

        let _app = create_app(AppState::new(store, config));
    }
}
