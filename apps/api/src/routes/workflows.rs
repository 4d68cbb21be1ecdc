//! Workflow catalog endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use weft_domain::Workflow;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WorkflowsResponse {
    pub workflows: Vec<Workflow>,
}

/// Register a workflow definition; 409 on duplicate `(id, version)`.
pub async fn register(
    State(state): State<AppState>,
    Json(workflow): Json<Workflow>,
) -> Result<StatusCode, ApiError> {
    state.manager.save(&workflow).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn list(State(state): State<AppState>) -> Result<Json<WorkflowsResponse>, ApiError> {
    let workflows = state.manager.workflows().await?;
    Ok(Json(WorkflowsResponse { workflows }))
}

pub async fn versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowsResponse>, ApiError> {
    let workflows = state.manager.versions(&id).await?;
    Ok(Json(WorkflowsResponse { workflows }))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, i32)>,
) -> Result<Json<Workflow>, ApiError> {
    let workflow = state.manager.workflow(&id, version).await?;
    Ok(Json(workflow))
}

pub async fn remove(
    State(state): State<AppState>,
    Path((id, version)): Path<(String, i32)>,
) -> Result<StatusCode, ApiError> {
    state.manager.delete(&id, version).await?;
    Ok(StatusCode::NO_CONTENT)
}
