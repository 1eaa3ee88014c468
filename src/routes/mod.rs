use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod excel;
pub mod owner;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
}

/// The full application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes())
        .merge(excel::routes(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
