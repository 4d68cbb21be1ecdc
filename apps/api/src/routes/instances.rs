//! Instance lifecycle endpoints

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use weft_domain::InstanceId;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub workflow_id: String,
    pub version: i32,
    #[serde(default)]
    pub input: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub instance_id: InstanceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub instance_id: InstanceId,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub pipeline: Map<String, Value>,
}

/// Start an instance of a registered workflow version.
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let instance_id = state
        .manager
        .start(&request.workflow_id, request.version, request.input)
        .await?;
    Ok(Json(StartResponse { instance_id }))
}

/// Current status and pipeline contents of an instance.
pub async fn status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (status, pipeline) = state.manager.status(request.instance_id).await?;
    Ok(Json(StatusResponse {
        status: status.to_string(),
        pipeline,
    }))
}
