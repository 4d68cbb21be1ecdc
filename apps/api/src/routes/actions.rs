//! Action catalog endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use weft_domain::ActionSpec;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ActionsResponse {
    pub action_specs: Vec<ActionSpec>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(spec): Json<ActionSpec>,
) -> Result<StatusCode, ApiError> {
    state.manager.save_action(&spec).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn list(State(state): State<AppState>) -> Result<Json<ActionsResponse>, ApiError> {
    let action_specs = state.manager.actions().await?;
    Ok(Json(ActionsResponse { action_specs }))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionSpec>, ApiError> {
    let spec = state.manager.action(&id).await?;
    Ok(Json(spec))
}
