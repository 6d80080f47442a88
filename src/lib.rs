pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod supervisor;

pub use error::{AppError, AppResult};

use std::sync::Arc;

use axum::{Json, Router, extract::FromRef, routing::get};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::TokenVerifier, hub::BroadcastHub, registry::RoomRegistry,
    supervisor::ConnectionSupervisor,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub verifier: TokenVerifier,
    pub registry: Arc<RoomRegistry>,
    pub hub: Arc<BroadcastHub>,
    pub supervisor: Arc<ConnectionSupervisor>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, verifier: TokenVerifier) -> Self {
        let registry = Arc::new(RoomRegistry::new(db_pool.clone()));
        let supervisor = Arc::new(ConnectionSupervisor::new());
        let hub = Arc::new(BroadcastHub::new(registry.clone(), supervisor.clone()));
        Self {
            db_pool,
            verifier,
            registry,
            hub,
            supervisor,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/r", rooms::router())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
