//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Client capability discovery
        .route("/v1/capabilities", get(handlers::get_capabilities))
        // Anti-forgery tokens for the form-rendering host
        .route("/v1/form-tokens", post(handlers::create_form_token))
        // The upload orchestrator
        .route("/v1/upload", post(handlers::upload));

    // Conditionally add metrics endpoint based on config.
    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.merge(Router::new().route("/metrics", get(metrics_handler)));
    }

    let post_limit = usize::try_from(state.config.server.post_size_limit).unwrap_or(usize::MAX);

    router
        .layer(DefaultBodyLimit::max(post_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
