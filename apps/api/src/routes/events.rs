//! Step-change callback endpoint
//!
//! External action services post their asynchronous completions here; the
//! handler serializes them per instance and resumes the driver.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use weft_domain::StepChangeEvent;

use crate::error::ApiError;
use crate::state::AppState;

/// Accept a step-change event for processing. Returns 202: the event is
/// applied under the instance lock, possibly after queueing.
pub async fn step_change(
    State(state): State<AppState>,
    Json(event): Json<StepChangeEvent>,
) -> Result<StatusCode, ApiError> {
    state.handler.handle(&event).await?;
    Ok(StatusCode::ACCEPTED)
}
