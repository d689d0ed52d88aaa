//! HTTP surface.

mod handlers;

use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/projects/:project_id/validate",
            post(handlers::validate),
        )
        .route(
            "/api/projects/:project_id/rules",
            get(handlers::get_rule_set).put(handlers::put_rule_set),
        )
        .route(
            "/api/projects/:project_id/terminology/code-systems",
            put(handlers::put_code_system),
        )
        .route(
            "/api/projects/:project_id/terminology/constraints",
            put(handlers::put_constraints),
        )
        .route(
            "/api/projects/:project_id/features",
            get(handlers::get_feature_flags).patch(handlers::patch_feature_flags),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
