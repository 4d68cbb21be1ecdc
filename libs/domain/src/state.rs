//! Runtime state records for workflow instances.
//!
//! One `WorkflowState` per instance, one `StepState` per
//! `(instance, step, iteration)` execution, plus the two persisted queues
//! the coordination protocol runs on: step-change events and pending steps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{EventId, InstanceId, PendingStepId};
use crate::pipeline::Pipeline;
use crate::status::Status;

/// Aggregate status of a single workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub instance_id: InstanceId,

    /// Bumped on every state save
    pub instance_version: i32,

    pub workflow_id: String,

    pub workflow_version: i32,

    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowState {
    /// Initial state for a freshly started instance.
    #[must_use]
    pub fn running(instance_id: InstanceId, workflow_id: impl Into<String>, version: i32) -> Self {
        Self {
            instance_id,
            instance_version: 1,
            workflow_id: workflow_id.into(),
            workflow_version: version,
            status: Status::Running,
            error: None,
        }
    }
}

/// State of one step execution, keyed by `(instance_id, step_id, iteration)`.
///
/// `child_count` is the number of direct child executions a composite
/// scheduled; the composite completes only once that many children reach a
/// terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub instance_id: InstanceId,

    pub step_id: String,

    #[serde(default)]
    pub iteration: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step: Option<String>,

    #[serde(default)]
    pub child_count: i32,

    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Pipeline>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Pipeline>,
}

impl StepState {
    /// A running execution with no children scheduled yet.
    #[must_use]
    pub fn running(
        instance_id: InstanceId,
        step_id: impl Into<String>,
        parent_step: Option<String>,
        iteration: i32,
    ) -> Self {
        Self {
            instance_id,
            step_id: step_id.into(),
            iteration,
            parent_step,
            child_count: 0,
            status: Status::Running,
            input: None,
            output: None,
        }
    }

    /// Error recorded on the output pipeline, if any.
    #[must_use]
    pub fn output_error(&self) -> Option<&str> {
        self.output.as_ref().and_then(Pipeline::error)
    }
}

/// Immutable record announcing that a step reached a new status.
///
/// Produced inline by the interpreter for synchronous action completions and
/// by external callers for asynchronous ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepChangeEvent {
    /// Generated when an external caller omits it
    #[serde(default)]
    pub event_id: EventId,

    pub instance_id: InstanceId,

    pub step_id: String,

    #[serde(default)]
    pub iteration: i32,

    pub status: Status,

    /// Output values to merge into the instance pipeline
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl StepChangeEvent {
    #[must_use]
    pub fn new(
        instance_id: InstanceId,
        step_id: impl Into<String>,
        iteration: i32,
        status: Status,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            instance_id,
            step_id: step_id.into(),
            iteration,
            status,
            data,
        }
    }
}

/// A deferred child execution scheduled by a composite step.
///
/// Persisted rather than held on a call stack so execution resumes after a
/// crash; `vars` are per-iteration pipeline bindings applied before the step
/// runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingStep {
    pub id: PendingStepId,

    pub instance_id: InstanceId,

    pub step_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub iteration: i32,

    #[serde(default)]
    pub vars: Map<String, Value>,
}

impl PendingStep {
    #[must_use]
    pub fn new(
        instance_id: InstanceId,
        step_id: impl Into<String>,
        parent_id: Option<String>,
        iteration: i32,
        vars: Map<String, Value>,
    ) -> Self {
        Self {
            id: PendingStepId::new(),
            instance_id,
            step_id: step_id.into(),
            parent_id,
            iteration,
            vars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_state_running() {
        let state = WorkflowState::running(InstanceId::new(), "wf", 2);
        assert_eq!(state.status, Status::Running);
        assert_eq!(state.instance_version, 1);
        assert_eq!(state.workflow_version, 2);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_step_state_defaults() {
        let state = StepState::running(InstanceId::new(), "a", None, 0);
        assert_eq!(state.child_count, 0);
        assert_eq!(state.iteration, 0);
        assert!(state.output_error().is_none());
    }

    #[test]
    fn test_event_iteration_defaults_to_zero() {
        let json = serde_json::json!({
            "instance_id": InstanceId::new().to_string(),
            "step_id": "a",
            "status": "Completed"
        });
        let event: StepChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.iteration, 0);
        assert!(event.data.is_empty());
        // An omitted event id is generated.
        assert!(event.event_id.to_string().starts_with("evt_"));
    }

    #[test]
    fn test_pending_step_roundtrip() {
        let mut vars = Map::new();
        vars.insert("n".to_string(), serde_json::json!(20));
        let pending = PendingStep::new(InstanceId::new(), "a", Some("loop".to_string()), 1, vars);

        let json = serde_json::to_string(&pending).unwrap();
        let back: PendingStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step_id, "a");
        assert_eq!(back.iteration, 1);
        assert_eq!(back.vars["n"], serde_json::json!(20));
    }
}
