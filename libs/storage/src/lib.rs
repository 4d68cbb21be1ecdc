//! Storage contract for the Weft engine
//!
//! A single trait covers everything the engine persists: the action and
//! workflow catalogs, per-instance pipelines and states, and the two queues
//! the coordination protocol runs on (step-change events, pending steps).
//! Two reference backends are provided: an in-memory store for tests and
//! single-process deployments, and a PostgreSQL store for durability.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use weft_domain::{
    ActionSpec, Endpoint, EventId, InstanceId, PendingStep, PendingStepId, Pipeline,
    StepChangeEvent, StepState, Workflow, WorkflowState,
};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// Workflow definition not found for `(id, version)`
    #[error("workflow '{id}' version {version} not found")]
    WorkflowNotFound { id: String, version: i32 },

    /// A workflow with the same `(id, version)` is already registered
    #[error("workflow '{id}' version {version} already registered")]
    WorkflowAlreadyRegistered { id: String, version: i32 },

    /// No workflow state for the instance
    #[error("workflow state not found for instance {0}")]
    WorkflowStateNotFound(InstanceId),

    /// No step state for `(instance, step, iteration)`
    #[error("step state not found for instance {instance_id}, step '{step_id}', iteration {iteration}")]
    StepStateNotFound {
        instance_id: InstanceId,
        step_id: String,
        iteration: i32,
    },

    /// No pipeline stored for the instance
    #[error("no pipeline found for instance {0}")]
    NoPipelineFound(InstanceId),

    /// Action spec not found
    #[error("action '{0}' not found")]
    ActionNotFound(String),

    /// Unlock requested on an instance that holds no lock
    #[error("instance {0} is not locked")]
    InstanceNotLocked(InstanceId),

    /// Serialization failure while encoding or decoding a stored record
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend failure (connection, query, I/O)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Storage Trait
// =============================================================================

/// Persistence contract the engine core depends on.
///
/// All per-instance mutations are expected to happen under the advisory
/// instance lock (`lock_instance`/`unlock_instance`); the lock lives in the
/// backend so multiple engine workers cannot double-execute one instance.
/// Both queues preserve insertion order by a monotonic timestamp.
#[async_trait]
pub trait Storage: Send + Sync {
    // =========================================================================
    // Action catalog
    // =========================================================================

    async fn save_action(&self, action: &ActionSpec) -> Result<(), StorageError>;

    /// Soft delete: the spec is tombstoned, not removed.
    async fn delete_action(&self, id: &str) -> Result<(), StorageError>;

    async fn action_spec(&self, id: &str) -> Result<ActionSpec, StorageError>;

    async fn action_specs(&self) -> Result<Vec<ActionSpec>, StorageError>;

    async fn action_endpoint(&self, id: &str) -> Result<Endpoint, StorageError> {
        Ok(self.action_spec(id).await?.endpoint)
    }

    async fn list_actions(&self) -> Result<Vec<ActionSpec>, StorageError> {
        self.action_specs().await
    }

    // =========================================================================
    // Workflow catalog
    // =========================================================================

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError>;

    /// Soft delete: running instances of the version keep resolving it.
    async fn delete_workflow(&self, id: &str, version: i32) -> Result<(), StorageError>;

    async fn workflow(&self, id: &str, version: i32) -> Result<Workflow, StorageError>;

    /// Resolve the definition pinned by a running instance, tombstones
    /// included.
    async fn workflow_by_instance(&self, instance_id: InstanceId)
        -> Result<Workflow, StorageError>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError>;

    async fn list_workflow_versions(&self, id: &str) -> Result<Vec<Workflow>, StorageError>;

    // =========================================================================
    // Instance lifecycle
    // =========================================================================

    async fn create_new_instance(
        &self,
        workflow_id: &str,
        instance_id: InstanceId,
        pipeline: Pipeline,
    ) -> Result<(), StorageError>;

    /// Archive a finished instance; `purge` removes its queues, pipeline,
    /// and states instead of tombstoning them.
    async fn archive_instance(
        &self,
        instance_id: InstanceId,
        purge: bool,
    ) -> Result<(), StorageError>;

    /// Try to take the advisory per-instance lock. Returns `false` when
    /// another holder has it; callers then queue their work.
    async fn lock_instance(&self, instance_id: InstanceId) -> Result<bool, StorageError>;

    async fn unlock_instance(&self, instance_id: InstanceId) -> Result<(), StorageError>;

    // =========================================================================
    // Pipeline
    // =========================================================================

    async fn pipeline(&self, instance_id: InstanceId) -> Result<Pipeline, StorageError>;

    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<(), StorageError>;

    // =========================================================================
    // Workflow state
    // =========================================================================

    async fn state(&self, instance_id: InstanceId) -> Result<WorkflowState, StorageError>;

    /// Upsert keyed by instance; on conflict the stored `instance_version`
    /// is bumped and the status/error replaced.
    async fn save_state(&self, state: &WorkflowState) -> Result<(), StorageError>;

    // =========================================================================
    // Step state
    // =========================================================================

    async fn step_state(
        &self,
        instance_id: InstanceId,
        step_id: &str,
        iteration: i32,
    ) -> Result<StepState, StorageError>;

    /// All step states of an instance, grouped by step id and ordered by
    /// iteration within each group.
    async fn step_states(
        &self,
        instance_id: InstanceId,
    ) -> Result<HashMap<String, Vec<StepState>>, StorageError>;

    /// Upsert keyed by `(instance, step, iteration)`.
    async fn save_step_state(&self, state: &StepState) -> Result<(), StorageError>;

    // =========================================================================
    // Step-change event queue
    // =========================================================================

    async fn save_step_change_event(&self, event: &StepChangeEvent) -> Result<(), StorageError>;

    /// Queued events for an instance in insertion order.
    async fn step_change_events(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<StepChangeEvent>, StorageError>;

    async fn delete_step_change_event(
        &self,
        instance_id: InstanceId,
        event_id: EventId,
    ) -> Result<(), StorageError>;

    // =========================================================================
    // Pending steps
    // =========================================================================

    async fn add_pending_steps(
        &self,
        instance_id: InstanceId,
        steps: Vec<PendingStep>,
    ) -> Result<(), StorageError>;

    /// Dequeue the oldest pending step, removing it atomically.
    async fn next_pending_step(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<PendingStep>, StorageError>;

    async fn pending_steps(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<PendingStep>, StorageError>;

    async fn delete_pending_step(
        &self,
        instance_id: InstanceId,
        pending_id: PendingStepId,
    ) -> Result<(), StorageError>;
}
