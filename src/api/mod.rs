//! API layer -- axum routes, handlers, and middleware.

mod catalog;
mod extract;
mod routes;
mod runs;
pub mod state;

use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use self::state::AppState;
use crate::error::ApiError;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    routes::api_routes()
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = o.as_str(), "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

async fn fallback() -> ApiError {
    ApiError::NotFound("Route")
}
