//! Engine error taxonomy.

use thiserror::Error;

use weft_domain::{EndpointKind, PipelineError, ValidationError};
use weft_storage::StorageError;

/// Errors raised while invoking an action transport.
///
/// Wrapped into [`EngineError::Transport`]; the interpreter turns them into
/// `Failed` step-change events rather than letting them bubble out of the
/// driver.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request could not be sent or the response not read
    #[error("http transport error: {0}")]
    Http(String),

    /// Remote endpoint reported a failure (decoded error message when
    /// available)
    #[error("remote action failed: {0}")]
    Remote(String),

    /// Messaging transport failure
    #[error("messaging transport error: {0}")]
    Messaging(String),

    /// Endpoint definition is incomplete for its declared kind
    #[error("invalid endpoint configuration: {0}")]
    InvalidEndpoint(String),
}

/// Errors surfaced by the engine core
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Step whose `type` tag names no executable kind; carries the step id
    #[error("unsupported step type on step '{0}'")]
    UnsupportedStep(String),

    /// Endpoint kind with no registered invoker
    #[error("unsupported endpoint '{0}'")]
    UnsupportedEndpoint(EndpointKind),

    /// Local endpoint with no handler registered for the action
    #[error("no local handler registered for action '{0}'")]
    ActionHandlerNotFound(String),

    /// Required action input missing from both literal and pipeline sources
    #[error("missing required input '{name}' for action '{action}'")]
    MissingRequiredInput { action: String, name: String },

    /// Step id referenced by a pending step or event is absent from the
    /// workflow definition
    #[error("step '{0}' not found in workflow")]
    StepNotFound(String),

    /// Pipeline handed to the engine carries no instance id
    #[error("pipeline carries no instance id")]
    MissingInstanceContext,

    /// A spawned parallel child panicked or was cancelled
    #[error("parallel task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_identifiers() {
        let err = EngineError::MissingRequiredInput {
            action: "local.add".to_string(),
            name: "x".to_string(),
        };
        assert!(err.to_string().contains("local.add"));
        assert!(err.to_string().contains('x'));

        let err = EngineError::UnsupportedEndpoint(EndpointKind::Grpc);
        assert!(err.to_string().contains("grpc"));
    }

    #[test]
    fn test_storage_error_converts() {
        let storage_err = StorageError::ActionNotFound("a".to_string());
        let err: EngineError = storage_err.into();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
