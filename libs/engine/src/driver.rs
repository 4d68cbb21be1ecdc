//! Workflow driver
//!
//! Progresses one instance by one logical step per invocation. Entered by
//! `start`, by the step-change handler after applying an event, and again
//! while the handler drains its queue. Progress between invocations is
//! carried entirely by storage: the pending-step queue holds deferred
//! children, and the post-order scan decides composite completion.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use weft_domain::{
    InstanceId, Pipeline, Status, StepState, Workflow, WorkflowState, PARENT_ID_KEY, STEP_ID_KEY,
};
use weft_storage::Storage;

use crate::error::EngineError;
use crate::interpreter::StepInterpreter;
use crate::invoker::InvokerRegistry;

/// Verdict on a running composite.
enum Settled {
    /// All children terminal, none failed; scan may continue past it
    Completed,
    /// A child failed; composite and instance were cascaded to `Failed`
    Failed,
    /// Children still outstanding; yield and wait for events
    Waiting,
}

/// Resumable single-instance driver.
pub struct WorkflowDriver {
    storage: Arc<dyn Storage>,
    invokers: Arc<InvokerRegistry>,
}

impl WorkflowDriver {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, invokers: Arc<InvokerRegistry>) -> Self {
        Self { storage, invokers }
    }

    /// Advance the instance behind `pipeline` by at most one new step.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        mut pipeline: Pipeline,
    ) -> Result<(), EngineError> {
        let instance_id = pipeline
            .instance_id()
            .ok_or(EngineError::MissingInstanceContext)?;

        let workflow_state = self.storage.state(instance_id).await?;
        if workflow_state.status != Status::Running {
            return Ok(());
        }

        let mut step_states = self.storage.step_states(instance_id).await?;
        let interpreter =
            StepInterpreter::new(Arc::clone(&self.storage), Arc::clone(&self.invokers));

        // Deferred children first: a queued pending step is the stored
        // continuation of some composite's expansion.
        if let Some(pending) = self.storage.next_pending_step(instance_id).await? {
            tracing::debug!(
                instance = %instance_id,
                step = %pending.step_id,
                iteration = pending.iteration,
                "executing pending step"
            );
            for (key, value) in &pending.vars {
                pipeline.set(key, value.clone());
            }
            if let Some(parent_id) = &pending.parent_id {
                pipeline.set(PARENT_ID_KEY, Value::String(parent_id.clone()));
            }
            pipeline.set_step_iteration(pending.iteration);

            let step = workflow
                .step_by_id(&pending.step_id)
                .ok_or_else(|| EngineError::StepNotFound(pending.step_id.clone()))?;
            pipeline.set(STEP_ID_KEY, Value::String(step.id.clone()));
            interpreter.execute(step, pipeline).await?;
            return Ok(());
        }

        pipeline.set_step_iteration(0);
        self.storage.save_pipeline(&pipeline).await?;

        let parent_index = workflow.parent_index();
        for step in workflow.flattened() {
            let Some(states) = step_states.get(&step.id).cloned() else {
                // Descendants without state belong to branches their
                // composite has not (or will never) schedule; only
                // top-level steps are the driver's to start.
                if parent_index.contains_key(step.id.as_str()) {
                    continue;
                }
                let mut step_pipeline = pipeline.clone();
                step_pipeline.set(STEP_ID_KEY, Value::String(step.id.clone()));
                interpreter.execute(step, step_pipeline).await?;
                return Ok(());
            };

            for (idx, state) in states.iter().enumerate() {
                match state.status {
                    Status::Completed | Status::Skipped => {}
                    Status::Failed => {
                        tracing::debug!(
                            instance = %instance_id,
                            step = %step.id,
                            "step failed, halting the scan"
                        );
                        return Ok(());
                    }
                    Status::Running => {
                        if !step.is_composite() {
                            // A running leaf is awaiting its completion
                            // event; nothing to drive.
                            return Ok(());
                        }
                        match self
                            .settle_composite(instance_id, state, &step_states, &workflow_state)
                            .await?
                        {
                            Settled::Completed => {
                                // Reflect the write in the scan's view so an
                                // enclosing composite examined later in this
                                // pass counts this one as terminal.
                                if let Some(entry) = step_states
                                    .get_mut(&step.id)
                                    .and_then(|list| list.get_mut(idx))
                                {
                                    entry.status = Status::Completed;
                                }
                            }
                            Settled::Failed | Settled::Waiting => return Ok(()),
                        }
                    }
                    Status::Pending | Status::Unknown => return Ok(()),
                }
            }
        }

        // The scan fell through: every step reached a terminal state.
        let mut done = workflow_state;
        done.status = Status::Completed;
        self.storage.save_state(&done).await?;
        tracing::info!(instance = %instance_id, "workflow completed");
        Ok(())
    }

    /// Decide a running composite from its children's states.
    async fn settle_composite(
        &self,
        instance_id: InstanceId,
        state: &StepState,
        step_states: &HashMap<String, Vec<StepState>>,
        workflow_state: &WorkflowState,
    ) -> Result<Settled, EngineError> {
        let mut terminal_children = 0;
        let mut child_error: Option<String> = None;

        for child_states in step_states.values() {
            for child in child_states {
                if child.parent_step.as_deref() != Some(state.step_id.as_str()) {
                    continue;
                }
                if child.status.is_terminal() {
                    terminal_children += 1;
                }
                if child.status == Status::Failed && child_error.is_none() {
                    child_error = Some(child.output_error().map_or_else(
                        || format!("Step {} failed for instance {}", child.step_id, instance_id),
                        str::to_string,
                    ));
                }
            }
        }

        if let Some(error) = child_error {
            tracing::debug!(
                instance = %instance_id,
                step = %state.step_id,
                "child failed, cascading composite and instance"
            );
            let mut failed = state.clone();
            failed.status = Status::Failed;
            self.storage.save_step_state(&failed).await?;

            let mut failed_state = workflow_state.clone();
            failed_state.status = Status::Failed;
            failed_state.error = Some(error);
            self.storage.save_state(&failed_state).await?;
            return Ok(Settled::Failed);
        }

        if terminal_children >= state.child_count {
            tracing::debug!(
                instance = %instance_id,
                step = %state.step_id,
                "all children settled, composite completed"
            );
            let mut done = state.clone();
            done.status = Status::Completed;
            self.storage.save_step_state(&done).await?;
            return Ok(Settled::Completed);
        }

        Ok(Settled::Waiting)
    }
}
