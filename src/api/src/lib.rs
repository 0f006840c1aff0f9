use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use store::Store;

pub mod endpoints;
pub mod error;
pub mod params;

pub use error::{ApiError, ApiResult, ErrorResponse};

/// Shared state of the route handlers
#[derive(Debug, Clone)]
pub struct ApiState {
    store: Arc<Store>,
    started: Instant,
}

impl ApiState {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// Create a new router instance with all routes configured
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(endpoints::tables::router())
        .merge(endpoints::columns::router())
        .merge(endpoints::rows::router())
        .with_state(state)
}

async fn health_check(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started.elapsed().as_secs(),
    }))
}
