pub mod admin;
pub mod events;
pub mod facebook;
pub mod slots;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(admin::routes())
        .merge(events::routes())
        .merge(facebook::routes())
        .merge(slots::routes())
}

/// The full application: liveness endpoints plus the API under `/api`
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", build_routes())
        .with_state(state)
}

async fn root() -> &'static str {
    "Carp King Backend API"
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
