//! Local action handlers
//!
//! In-process implementations of catalogued actions, registered by action id
//! and executed by the local endpoint invoker on the prepared action
//! pipeline.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use weft_domain::Pipeline;

/// Handler errors
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Execution failed
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Invalid input data
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// An in-process action implementation.
///
/// Inputs arrive already bound on the pipeline; outputs are written back to
/// it and extracted by the caller through the step's result mappings.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, pipeline: &mut Pipeline) -> Result<(), HandlerError>;
}

/// Registry of local action handlers, keyed by action id.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an action id.
    pub fn register(&self, action_id: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(action_id.into(), handler);
        }
    }

    /// Handler for an action id, if registered.
    #[must_use]
    pub fn get(&self, action_id: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(action_id).cloned())
    }

    /// Registered action ids.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.handlers
            .read()
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler;

    #[async_trait]
    impl ActionHandler for Doubler {
        async fn handle(&self, pipeline: &mut Pipeline) -> Result<(), HandlerError> {
            let n = pipeline
                .get("n")
                .ok()
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| HandlerError::InvalidInput("n must be an integer".to_string()))?;
            pipeline.set("doubled", json!(n * 2));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = HandlerRegistry::new();
        registry.register("local.double", Arc::new(Doubler));

        let handler = registry.get("local.double").expect("handler registered");
        let mut pipeline = Pipeline::new();
        pipeline.set("n", json!(21));
        handler.handle(&mut pipeline).await.unwrap();
        assert_eq!(pipeline.get("doubled").unwrap(), &json!(42));
    }

    #[tokio::test]
    async fn test_handler_error() {
        let registry = HandlerRegistry::new();
        registry.register("local.double", Arc::new(Doubler));

        let handler = registry.get("local.double").unwrap();
        let mut pipeline = Pipeline::new();
        let err = handler.handle(&mut pipeline).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_handler() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("unknown").is_none());
        assert!(registry.list().is_empty());
    }
}
