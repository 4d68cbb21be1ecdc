//! Route registration

pub mod actions;
pub mod events;
pub mod instances;
pub mod workflows;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// All management API routes.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflows", post(workflows::register).get(workflows::list))
        .route("/workflows/{id}", get(workflows::versions))
        .route("/workflows/{id}/{version}", get(workflows::fetch))
        .route("/workflow/{id}/{version}", delete(workflows::remove))
        .route("/instances/start", post(instances::start))
        .route("/instances/status", post(instances::status))
        .route("/actions", post(actions::register).get(actions::list))
        .route("/actions/{id}", get(actions::fetch))
        .route("/events/step-change", post(events::step_change))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
