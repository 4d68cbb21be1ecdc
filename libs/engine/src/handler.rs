//! Step-change handler
//!
//! Single entry point for step completions, wherever they originate:
//! in-process synchronous calls, REST callbacks, or messaging consumers.
//! Events are serialized per instance through the storage lock; an arrival
//! that finds the lock held is queued, and the holder drains the queue
//! before releasing.

use std::sync::Arc;

use serde_json::Value;

use weft_domain::{InstanceId, Pipeline, Status, StepChangeEvent, Workflow, ERROR_KEY};
use weft_storage::{Storage, StorageError};

use crate::driver::WorkflowDriver;
use crate::error::EngineError;
use crate::invoker::InvokerRegistry;

/// Applies step-change events to instance state and re-enters the driver.
pub struct StepChangeHandler {
    storage: Arc<dyn Storage>,
    invokers: Arc<InvokerRegistry>,
}

impl StepChangeHandler {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, invokers: Arc<InvokerRegistry>) -> Self {
        Self { storage, invokers }
    }

    /// Handle one event. When the instance lock is already held the event is
    /// queued for the holder to drain; otherwise the event is processed,
    /// the queue drained, and the lock released. Processing errors are
    /// captured per event so the drain always finishes; the first one is
    /// returned after unlock.
    pub async fn handle(&self, event: &StepChangeEvent) -> Result<(), EngineError> {
        let instance_id = event.instance_id;
        let mut first_error: Option<EngineError> = None;

        if self.storage.lock_instance(instance_id).await? {
            first_error = self.process(event).await.err();
        } else {
            tracing::debug!(
                instance = %instance_id,
                step = %event.step_id,
                "instance locked, queueing event"
            );
            self.storage.save_step_change_event(event).await?;
            // The holder may have released between the failed lock attempt
            // and the save, which would strand the queued event. Retry once:
            // either we now own the lock (and drain below), or the current
            // holder saw our event after we saved it.
            if !self.storage.lock_instance(instance_id).await? {
                return Ok(());
            }
        }

        let mut unlock_result: Result<(), StorageError>;

        loop {
            self.drain(instance_id, &mut first_error).await;

            tracing::debug!(instance = %instance_id, "unlocking instance");
            unlock_result = self.storage.unlock_instance(instance_id).await;

            // An event may have been queued between the last empty check and
            // the unlock; pick it up unless someone else took the lock and
            // will drain it themselves.
            match self.storage.step_change_events(instance_id).await {
                Ok(queued) if queued.is_empty() => break,
                Ok(_) => match self.storage.lock_instance(instance_id).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        first_error.get_or_insert(err.into());
                        break;
                    }
                },
                Err(err) => {
                    first_error.get_or_insert(err.into());
                    break;
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => unlock_result.map_err(EngineError::from),
        }
    }

    /// Process and delete queued events until the queue stays empty,
    /// recording the first failure without stopping.
    async fn drain(&self, instance_id: InstanceId, first_error: &mut Option<EngineError>) {
        'drain: loop {
            let queued = match self.storage.step_change_events(instance_id).await {
                Ok(queued) => queued,
                Err(err) => {
                    first_error.get_or_insert(err.into());
                    break;
                }
            };
            if queued.is_empty() {
                break;
            }
            for queued_event in queued {
                if let Err(err) = self.process(&queued_event).await {
                    tracing::warn!(
                        instance = %instance_id,
                        step = %queued_event.step_id,
                        error = %err,
                        "event processing failed, continuing drain"
                    );
                    first_error.get_or_insert(err);
                }
                if let Err(err) = self
                    .storage
                    .delete_step_change_event(instance_id, queued_event.event_id)
                    .await
                {
                    first_error.get_or_insert(err.into());
                    break 'drain;
                }
            }
        }
    }

    /// Apply one event: upsert the step state, merge the output into the
    /// instance pipeline, then dispatch on the new status.
    async fn process(&self, event: &StepChangeEvent) -> Result<(), EngineError> {
        tracing::debug!(
            instance = %event.instance_id,
            step = %event.step_id,
            iteration = event.iteration,
            status = %event.status,
            "processing step change"
        );

        let mut pipeline = self.storage.pipeline(event.instance_id).await?;
        let workflow = self.storage.workflow_by_instance(event.instance_id).await?;

        let output = Pipeline::from_map(event.data.clone());
        let mut step_state = self
            .storage
            .step_state(event.instance_id, &event.step_id, event.iteration)
            .await?;
        step_state.output = Some(output.clone());
        step_state.status = event.status;
        self.storage.save_step_state(&step_state).await?;

        pipeline.merge(&output);
        self.storage.save_pipeline(&pipeline).await?;

        match event.status {
            Status::Completed | Status::Skipped => {
                let driver =
                    WorkflowDriver::new(Arc::clone(&self.storage), Arc::clone(&self.invokers));
                driver.execute(&workflow, pipeline).await
            }
            Status::Failed => self.fail_instance(event, &workflow).await,
            other => {
                tracing::debug!(
                    instance = %event.instance_id,
                    step = %event.step_id,
                    status = %other,
                    "ignoring non-terminal step change"
                );
                Ok(())
            }
        }
    }

    /// A failed step fails the instance. The enclosing composites can never
    /// complete, so their running executions are cascaded too.
    async fn fail_instance(
        &self,
        event: &StepChangeEvent,
        workflow: &Workflow,
    ) -> Result<(), EngineError> {
        let mut workflow_state = self.storage.state(event.instance_id).await?;
        workflow_state.error = Some(
            event
                .data
                .get(ERROR_KEY)
                .and_then(Value::as_str)
                .map_or_else(
                    || {
                        format!(
                            "Step {} failed for instance {}",
                            event.step_id, event.instance_id
                        )
                    },
                    str::to_string,
                ),
        );
        workflow_state.status = Status::Failed;
        self.storage.save_state(&workflow_state).await?;

        let parent_index = workflow.parent_index();
        let step_states = self.storage.step_states(event.instance_id).await?;
        let mut ancestor = parent_index.get(event.step_id.as_str()).copied();
        while let Some(ancestor_id) = ancestor {
            if let Some(states) = step_states.get(ancestor_id) {
                for state in states {
                    if state.status == Status::Running {
                        let mut failed = state.clone();
                        failed.status = Status::Failed;
                        self.storage.save_step_state(&failed).await?;
                    }
                }
            }
            ancestor = parent_index.get(ancestor_id).copied();
        }
        Ok(())
    }
}
