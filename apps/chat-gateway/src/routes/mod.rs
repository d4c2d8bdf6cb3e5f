pub mod cors;
pub mod health;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
}

/// The full application: routes plus CORS and request tracing.
pub fn app(state: AppState) -> Router {
    router()
        .layer(cors::layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
