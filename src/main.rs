//! Custom Skin Backend
//!
//! Stores per-blog skins in SQLite, renders them into sanitized markup and
//! scoped CSS, and relays theme generation from a local completion model.

mod api;
mod config;
mod db;
mod errors;
mod generation;
mod models;
mod relay;
mod render;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, LogFormat};
use db::Repository;
use generation::{GenerationOptions, OllamaProvider, ThemeGenerator};
use relay::SessionRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub generator: Arc<ThemeGenerator>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting Custom Skin Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        "Model: {} at {}",
        config.model.model,
        config.model.base_url
    );

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Fold legacy per-section skins into the unified template
    let migrated = repo.migrate_legacy_skins().await?;
    tracing::info!("Legacy skin migration complete ({} converted)", migrated);

    // Initialize the completion backend
    let provider = Arc::new(OllamaProvider::new(&config.model)?);
    let generator = Arc::new(ThemeGenerator::new(
        provider,
        GenerationOptions::from(&config.model),
    ));

    let sessions = Arc::new(SessionRegistry::new(
        generator.options().history_limit,
        relay::SESSION_IDLE_TTL,
    ));

    // Create application state
    let state = AppState {
        repo,
        generator,
        sessions,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Stored skins
        .route(
            "/blogs/{blog_id}/skin",
            get(api::get_skin)
                .put(api::save_skin)
                .delete(api::reset_skin),
        )
        .route(
            "/blogs/{blog_id}/skin/sections/{section}",
            put(api::replace_section),
        )
        .route("/blogs/{blog_id}/skin/active", post(api::set_skin_active))
        .route("/blogs/{blog_id}/skin/render", post(api::render_stored_skin))
        // Unsaved skins
        .route("/skins/preview", post(api::preview_skin))
        .route("/skins/defaults", get(api::get_skin_defaults))
        // Generation
        .route("/ai/generate", post(api::generate_theme))
        .route("/ai/chat/stream", post(api::chat_stream))
        .route("/ai/theme/stream", post(api::theme_stream))
        .route("/ai/sessions/{session_id}", get(api::get_session))
        .route("/ai/sessions/{session_id}/cancel", post(api::cancel_session))
        .route("/ai/health", get(api::model_health));

    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
