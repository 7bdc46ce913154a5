//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{backend::LocalBackend, db::DbStore},
    config::Config,
    error::ApiError,
    web::{get_attempt_handler, rest::ApiDoc, start_attempt_handler, state::AppState, ws_handler},
};
use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        Method,
    },
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(DbStore::new(db_pool.clone()));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Wire the Backend Adapter ---
    // One adapter serves both controller-facing ports.
    let backend = Arc::new(LocalBackend::new(store.clone()));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        store: store.clone(),
        service: backend.clone(),
        telemetry: backend,
        config: config.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    let api_router = Router::new()
        .route("/attempts", post(start_attempt_handler))
        .route("/attempts/{attempt_id}", get(get_attempt_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
