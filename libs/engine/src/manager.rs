//! Workflow manager
//!
//! Public surface for operators: the workflow and action catalogs, instance
//! start, and instance status. Everything else happens through the driver
//! and the step-change handler.

use std::sync::Arc;

use serde_json::{Map, Value};

use weft_domain::{ActionSpec, InstanceId, Pipeline, Status, Workflow, WorkflowState};
use weft_storage::{Storage, StorageError};

use crate::driver::WorkflowDriver;
use crate::error::EngineError;
use crate::invoker::InvokerRegistry;

/// Registry and lifecycle front door.
pub struct WorkflowManager {
    storage: Arc<dyn Storage>,
    invokers: Arc<InvokerRegistry>,
}

impl WorkflowManager {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, invokers: Arc<InvokerRegistry>) -> Self {
        Self { storage, invokers }
    }

    // =========================================================================
    // Workflow catalog
    // =========================================================================

    /// Validate and register a workflow definition. Rejects a duplicate
    /// `(id, version)`.
    pub async fn save(&self, workflow: &Workflow) -> Result<(), EngineError> {
        workflow.validate()?;

        match self.storage.workflow(&workflow.id, workflow.version).await {
            Ok(_) => Err(StorageError::WorkflowAlreadyRegistered {
                id: workflow.id.clone(),
                version: workflow.version,
            }
            .into()),
            Err(StorageError::WorkflowNotFound { .. }) => {
                self.storage.save_workflow(workflow).await?;
                tracing::info!(workflow = %workflow.id, version = workflow.version, "workflow registered");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn workflow(&self, id: &str, version: i32) -> Result<Workflow, EngineError> {
        Ok(self.storage.workflow(id, version).await?)
    }

    pub async fn workflows(&self) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.storage.list_workflows().await?)
    }

    pub async fn versions(&self, id: &str) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.storage.list_workflow_versions(id).await?)
    }

    pub async fn delete(&self, id: &str, version: i32) -> Result<(), EngineError> {
        Ok(self.storage.delete_workflow(id, version).await?)
    }

    // =========================================================================
    // Action catalog
    // =========================================================================

    pub async fn save_action(&self, action: &ActionSpec) -> Result<(), EngineError> {
        Ok(self.storage.save_action(action).await?)
    }

    pub async fn action(&self, id: &str) -> Result<ActionSpec, EngineError> {
        Ok(self.storage.action_spec(id).await?)
    }

    pub async fn actions(&self) -> Result<Vec<ActionSpec>, EngineError> {
        Ok(self.storage.list_actions().await?)
    }

    pub async fn delete_action(&self, id: &str) -> Result<(), EngineError> {
        Ok(self.storage.delete_action(id).await?)
    }

    // =========================================================================
    // Instance lifecycle
    // =========================================================================

    /// Start a new instance: seed the pipeline with the caller's input plus
    /// the reserved context keys, persist instance and running state, and
    /// hand the first step to the driver.
    pub async fn start(
        &self,
        id: &str,
        version: i32,
        input: Map<String, Value>,
    ) -> Result<InstanceId, EngineError> {
        let workflow = self.storage.workflow(id, version).await?;

        let instance_id = InstanceId::new();
        let pipeline = Pipeline::seeded(instance_id, id, version, input);

        self.storage
            .create_new_instance(id, instance_id, pipeline.clone())
            .await?;
        self.storage
            .save_state(&WorkflowState::running(instance_id, id, version))
            .await?;

        tracing::info!(workflow = %id, version, instance = %instance_id, "starting instance");

        let driver = WorkflowDriver::new(Arc::clone(&self.storage), Arc::clone(&self.invokers));
        driver.execute(&workflow, pipeline).await?;

        Ok(instance_id)
    }

    /// Current status and pipeline contents of an instance.
    pub async fn status(
        &self,
        instance_id: InstanceId,
    ) -> Result<(Status, Map<String, Value>), EngineError> {
        let state = self.storage.state(instance_id).await?;
        let pipeline = self.storage.pipeline(instance_id).await?;
        Ok((state.status, pipeline.map()))
    }
}
