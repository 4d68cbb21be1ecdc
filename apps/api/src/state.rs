//! Shared application state for route handlers.

use std::sync::Arc;

use weft_engine::{HandlerRegistry, StepChangeHandler, WorkflowManager};

/// Handles shared by every route handler.
#[derive(Clone)]
pub struct AppState {
    /// Catalog and lifecycle front door
    pub manager: Arc<WorkflowManager>,

    /// Entry point for external step completions
    pub handler: Arc<StepChangeHandler>,

    /// Local action handler registry, exposed so embedders can register
    /// in-process actions before serving
    pub handlers: Arc<HandlerRegistry>,
}
