pub mod broadcast;
pub mod codec;
pub mod config;
pub mod db;
pub mod duel;
pub mod error;
pub mod registry;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::state::AppState;

/// Build the HTTP match API router plus the state shared with the duel socket.
pub async fn build_app(config: ServerConfig) -> (Router, Arc<AppState>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to SQLite");

    db::init_db(&pool)
        .await
        .expect("Failed to initialize database");
    let seeded = db::seed_problems(&pool)
        .await
        .expect("Failed to seed problems");
    if seeded > 0 {
        info!(count = seeded, "seeded default problems");
    }

    let state = Arc::new(AppState::new(config, pool));

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/matches", post(routes::create_match))
        .route("/matches/active", get(routes::active_matches))
        .route("/matches/{id}", get(routes::get_match))
        .route("/matches/{id}/join", post(routes::join_match))
        .route("/matches/{id}/answer", post(routes::submit_answer))
        .route("/matches/{id}/cancel", post(routes::cancel_match))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}
