//! In-memory storage backend
//!
//! Reference implementation for tests and single-process deployments. All
//! collections live behind one async mutex; the instance lock table is a
//! plain set, which satisfies the advisory-lock contract within a process.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use weft_domain::{
    ActionSpec, EventId, InstanceId, PendingStep, PendingStepId, Pipeline, StepChangeEvent,
    StepState, Workflow, WorkflowState,
};

use crate::{Storage, StorageError};

#[derive(Debug)]
struct StoredAction {
    spec: ActionSpec,
    deleted: bool,
}

#[derive(Debug)]
struct StoredWorkflow {
    workflow: Workflow,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    actions: HashMap<String, StoredAction>,
    // workflow id -> version -> definition
    workflows: HashMap<String, BTreeMap<i32, StoredWorkflow>>,
    pipelines: HashMap<InstanceId, Pipeline>,
    states: HashMap<InstanceId, WorkflowState>,
    // instance -> (step id, iteration) -> state
    step_states: HashMap<InstanceId, BTreeMap<(String, i32), StepState>>,
    events: HashMap<InstanceId, Vec<StepChangeEvent>>,
    pending: HashMap<InstanceId, VecDeque<PendingStep>>,
    locks: HashSet<InstanceId>,
}

/// Storage backend holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_action(&self, action: &ActionSpec) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.actions.insert(
            action.id.clone(),
            StoredAction {
                spec: action.clone(),
                deleted: false,
            },
        );
        Ok(())
    }

    async fn delete_action(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        match inner.actions.get_mut(id) {
            Some(stored) => {
                stored.deleted = true;
                Ok(())
            }
            None => Err(StorageError::ActionNotFound(id.to_string())),
        }
    }

    async fn action_spec(&self, id: &str) -> Result<ActionSpec, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .actions
            .get(id)
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.spec.clone())
            .ok_or_else(|| StorageError::ActionNotFound(id.to_string()))
    }

    async fn action_specs(&self) -> Result<Vec<ActionSpec>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .actions
            .values()
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.spec.clone())
            .collect())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.workflows.entry(workflow.id.clone()).or_default().insert(
            workflow.version,
            StoredWorkflow {
                workflow: workflow.clone(),
                deleted: false,
            },
        );
        Ok(())
    }

    async fn delete_workflow(&self, id: &str, version: i32) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner
            .workflows
            .get_mut(id)
            .and_then(|versions| versions.get_mut(&version))
            .map(|stored| stored.deleted = true)
            .ok_or(StorageError::WorkflowNotFound {
                id: id.to_string(),
                version,
            })
    }

    async fn workflow(&self, id: &str, version: i32) -> Result<Workflow, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .workflows
            .get(id)
            .and_then(|versions| versions.get(&version))
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.workflow.clone())
            .ok_or(StorageError::WorkflowNotFound {
                id: id.to_string(),
                version,
            })
    }

    async fn workflow_by_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Workflow, StorageError> {
        let inner = self.inner.lock().await;
        let state = inner
            .states
            .get(&instance_id)
            .ok_or(StorageError::WorkflowStateNotFound(instance_id))?;
        // Deleted versions still resolve for their running instances.
        inner
            .workflows
            .get(&state.workflow_id)
            .and_then(|versions| versions.get(&state.workflow_version))
            .map(|stored| stored.workflow.clone())
            .ok_or_else(|| StorageError::WorkflowNotFound {
                id: state.workflow_id.clone(),
                version: state.workflow_version,
            })
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .workflows
            .values()
            .flat_map(|versions| versions.values())
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.workflow.clone())
            .collect())
    }

    async fn list_workflow_versions(&self, id: &str) -> Result<Vec<Workflow>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .workflows
            .get(id)
            .map(|versions| {
                versions
                    .values()
                    .filter(|stored| !stored.deleted)
                    .map(|stored| stored.workflow.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_new_instance(
        &self,
        _workflow_id: &str,
        instance_id: InstanceId,
        pipeline: Pipeline,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.pipelines.insert(instance_id, pipeline);
        Ok(())
    }

    async fn archive_instance(
        &self,
        instance_id: InstanceId,
        purge: bool,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.events.remove(&instance_id);
        inner.pending.remove(&instance_id);
        if purge {
            inner.pipelines.remove(&instance_id);
            inner.states.remove(&instance_id);
            inner.step_states.remove(&instance_id);
        }
        Ok(())
    }

    async fn lock_instance(&self, instance_id: InstanceId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.locks.insert(instance_id))
    }

    async fn unlock_instance(&self, instance_id: InstanceId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if inner.locks.remove(&instance_id) {
            Ok(())
        } else {
            Err(StorageError::InstanceNotLocked(instance_id))
        }
    }

    async fn pipeline(&self, instance_id: InstanceId) -> Result<Pipeline, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .pipelines
            .get(&instance_id)
            .cloned()
            .ok_or(StorageError::NoPipelineFound(instance_id))
    }

    async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<(), StorageError> {
        let instance_id = pipeline
            .instance_id()
            .ok_or_else(|| StorageError::Backend("pipeline carries no instance id".to_string()))?;
        let mut inner = self.inner.lock().await;
        inner.pipelines.insert(instance_id, pipeline.clone());
        Ok(())
    }

    async fn state(&self, instance_id: InstanceId) -> Result<WorkflowState, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .states
            .get(&instance_id)
            .cloned()
            .ok_or(StorageError::WorkflowStateNotFound(instance_id))
    }

    async fn save_state(&self, state: &WorkflowState) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let mut next = state.clone();
        if let Some(existing) = inner.states.get(&state.instance_id) {
            next.instance_version = existing.instance_version + 1;
        }
        inner.states.insert(state.instance_id, next);
        Ok(())
    }

    async fn step_state(
        &self,
        instance_id: InstanceId,
        step_id: &str,
        iteration: i32,
    ) -> Result<StepState, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .step_states
            .get(&instance_id)
            .and_then(|states| states.get(&(step_id.to_string(), iteration)))
            .cloned()
            .ok_or_else(|| StorageError::StepStateNotFound {
                instance_id,
                step_id: step_id.to_string(),
                iteration,
            })
    }

    async fn step_states(
        &self,
        instance_id: InstanceId,
    ) -> Result<HashMap<String, Vec<StepState>>, StorageError> {
        let inner = self.inner.lock().await;
        let mut grouped: HashMap<String, Vec<StepState>> = HashMap::new();
        if let Some(states) = inner.step_states.get(&instance_id) {
            // BTreeMap ordering yields iterations in ascending order per step.
            for ((step_id, _), state) in states {
                grouped.entry(step_id.clone()).or_default().push(state.clone());
            }
        }
        Ok(grouped)
    }

    async fn save_step_state(&self, state: &StepState) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner
            .step_states
            .entry(state.instance_id)
            .or_default()
            .insert((state.step_id.clone(), state.iteration), state.clone());
        Ok(())
    }

    async fn save_step_change_event(&self, event: &StepChangeEvent) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner
            .events
            .entry(event.instance_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn step_change_events(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<StepChangeEvent>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.events.get(&instance_id).cloned().unwrap_or_default())
    }

    async fn delete_step_change_event(
        &self,
        instance_id: InstanceId,
        event_id: EventId,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if let Some(events) = inner.events.get_mut(&instance_id) {
            events.retain(|event| event.event_id != event_id);
        }
        Ok(())
    }

    async fn add_pending_steps(
        &self,
        instance_id: InstanceId,
        steps: Vec<PendingStep>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.pending.entry(instance_id).or_default().extend(steps);
        Ok(())
    }

    async fn next_pending_step(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<PendingStep>, StorageError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .pending
            .get_mut(&instance_id)
            .and_then(VecDeque::pop_front))
    }

    async fn pending_steps(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<PendingStep>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pending
            .get(&instance_id)
            .map(|steps| steps.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_pending_step(
        &self,
        instance_id: InstanceId,
        pending_id: PendingStepId,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if let Some(steps) = inner.pending.get_mut(&instance_id) {
            steps.retain(|step| step.id != pending_id);
        }
        Ok(())
    }
}
