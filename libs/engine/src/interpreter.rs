//! Step interpreter
//!
//! Evaluates a single step against a pipeline. Composites expand into child
//! executions (inline, queued, or spawned); action leaves dispatch through
//! the invoker registry and close the loop by emitting a step-change event
//! for synchronous completions. The interpreter never blocks on remote
//! completion: it either emits the event itself or an external caller
//! delivers one later.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::task::JoinSet;

use weft_domain::{
    ActionStep, InstanceId, PendingStep, Pipeline, Status, Step, StepChangeEvent, StepKind,
    StepState, ERROR_KEY, PARENT_ID_KEY, STEP_ID_KEY,
};
use weft_storage::Storage;

use crate::error::{EngineError, TransportError};
use crate::handler::StepChangeHandler;
use crate::invoker::{InvokeOutcome, InvokerRegistry};

/// Walks the step tree for one instance.
#[derive(Clone)]
pub struct StepInterpreter {
    storage: Arc<dyn Storage>,
    invokers: Arc<InvokerRegistry>,
}

impl StepInterpreter {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, invokers: Arc<InvokerRegistry>) -> Self {
        Self { storage, invokers }
    }

    /// Execute one step. Boxed because composite expansion recurses through
    /// the interpreter, and synchronous action completions re-enter the
    /// driver through the step-change handler.
    pub fn execute<'a>(
        &'a self,
        step: &'a Step,
        pipeline: Pipeline,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(self.execute_inner(step, pipeline))
    }

    async fn execute_inner(&self, step: &Step, pipeline: Pipeline) -> Result<(), EngineError> {
        let instance_id = pipeline
            .instance_id()
            .ok_or(EngineError::MissingInstanceContext)?;
        let iteration = pipeline.step_iteration();
        let parent_step = pipeline.parent_id().map(str::to_string);

        tracing::debug!(
            instance = %instance_id,
            step = %step.id,
            kind = step.kind_name(),
            iteration,
            "executing step"
        );

        if step.skip {
            let mut state = StepState::running(instance_id, &step.id, parent_step, iteration);
            state.status = Status::Skipped;
            self.storage.save_step_state(&state).await?;
            return self
                .emit(instance_id, &step.id, iteration, Status::Skipped, Map::new())
                .await;
        }

        let mut state = StepState::running(instance_id, &step.id, parent_step, iteration);
        state.input = Some(pipeline.clone());

        match &step.kind {
            StepKind::Action { action } => {
                self.storage.save_step_state(&state).await?;
                if let Err(err) = self.run_action(step, action, &pipeline, iteration).await {
                    // Invocation failures close through the event channel,
                    // not as errors bubbling out of the driver.
                    tracing::warn!(
                        instance = %instance_id,
                        step = %step.id,
                        error = %err,
                        "action invocation failed"
                    );
                    let mut data = Map::new();
                    data.insert(ERROR_KEY.to_string(), Value::String(err.to_string()));
                    self.emit(instance_id, &step.id, iteration, Status::Failed, data)
                        .await?;
                }
            }

            StepKind::If { branch } => {
                let mut selected = None;
                if pipeline.evaluate_condition(&branch.condition)? {
                    selected = Some(&branch.steps);
                } else {
                    for else_if in &branch.else_ifs {
                        if pipeline.evaluate_condition(&else_if.condition)? {
                            selected = Some(&else_if.steps);
                            break;
                        }
                    }
                    if selected.is_none() {
                        if let Some(else_branch) = &branch.else_branch {
                            selected = Some(&else_branch.steps);
                        }
                    }
                }

                match selected {
                    Some(steps) if !steps.is_empty() => {
                        state.child_count = i32::try_from(steps.len()).unwrap_or(i32::MAX);
                        self.storage.save_step_state(&state).await?;
                        for child in steps {
                            let child_pipeline = clone_for(&pipeline, child, &step.id);
                            self.execute(child, child_pipeline).await?;
                        }
                    }
                    _ => {
                        self.complete_empty(state, instance_id, &step.id, iteration)
                            .await?;
                    }
                }
            }

            StepKind::Switch { switch } => {
                let value = pipeline.get(&switch.variable)?.clone();
                let mut selected: Option<&Vec<Step>> = None;
                let mut default_steps: Option<&Vec<Step>> = None;
                for case in &switch.cases {
                    if case.default {
                        default_steps.get_or_insert(&case.steps);
                        continue;
                    }
                    if case
                        .value
                        .as_ref()
                        .is_some_and(|candidate| values_equal(candidate, &value))
                    {
                        selected = Some(&case.steps);
                        break;
                    }
                }
                let steps = selected.or(default_steps);

                match steps {
                    Some(steps) if !steps.is_empty() => {
                        state.child_count = i32::try_from(steps.len()).unwrap_or(i32::MAX);
                        self.storage.save_step_state(&state).await?;
                        for child in steps {
                            let child_pipeline = clone_for(&pipeline, child, &step.id);
                            self.execute(child, child_pipeline).await?;
                        }
                    }
                    _ => {
                        self.complete_empty(state, instance_id, &step.id, iteration)
                            .await?;
                    }
                }
            }

            StepKind::ForLoop { for_loop } => {
                let items: Vec<Value> = if for_loop.items.is_empty() {
                    match pipeline.get(&for_loop.items_var)? {
                        Value::Array(items) => items.clone(),
                        other => {
                            return Err(EngineError::Pipeline(
                                weft_domain::PipelineError::Condition(format!(
                                    "'{}' resolves to {other}, expected an array",
                                    for_loop.items_var
                                )),
                            ))
                        }
                    }
                } else {
                    for_loop.items.clone()
                };

                if items.is_empty() || for_loop.steps.is_empty() {
                    self.complete_empty(state, instance_id, &step.id, iteration)
                        .await?;
                    return Ok(());
                }

                // One child execution per (item, body step) combination.
                state.child_count =
                    i32::try_from(items.len() * for_loop.steps.len()).unwrap_or(i32::MAX);
                self.storage.save_step_state(&state).await?;

                // Queue every combination except the first before running it
                // inline: its synchronous completion re-enters the driver,
                // which pulls the queue.
                let mut pending = Vec::new();
                for (idx, item) in items.iter().enumerate() {
                    for (child_pos, child) in for_loop.steps.iter().enumerate() {
                        if idx == 0 && child_pos == 0 {
                            continue;
                        }
                        let mut vars = Map::new();
                        vars.insert(for_loop.loop_var.clone(), item.clone());
                        if !for_loop.index_var.is_empty() {
                            vars.insert(for_loop.index_var.clone(), Value::from(idx));
                        }
                        pending.push(PendingStep::new(
                            instance_id,
                            &child.id,
                            Some(step.id.clone()),
                            i32::try_from(idx).unwrap_or(i32::MAX),
                            vars,
                        ));
                    }
                }
                if !pending.is_empty() {
                    self.storage.add_pending_steps(instance_id, pending).await?;
                }

                let first = &for_loop.steps[0];
                let mut child_pipeline = clone_for(&pipeline, first, &step.id);
                child_pipeline.set(&for_loop.loop_var, items[0].clone());
                if !for_loop.index_var.is_empty() {
                    child_pipeline.set(&for_loop.index_var, Value::from(0));
                }
                child_pipeline.set_step_iteration(0);
                self.execute(first, child_pipeline).await?;
            }

            StepKind::Parallel { parallel } => {
                if parallel.steps.is_empty() {
                    self.complete_empty(state, instance_id, &step.id, iteration)
                        .await?;
                    return Ok(());
                }

                state.child_count = i32::try_from(parallel.steps.len()).unwrap_or(i32::MAX);
                self.storage.save_step_state(&state).await?;

                let mut tasks: JoinSet<Result<(), EngineError>> = JoinSet::new();
                for child in &parallel.steps {
                    let interpreter = self.clone();
                    let child = child.clone();
                    let child_pipeline = clone_for(&pipeline, &child, &step.id);
                    tasks.spawn(async move { interpreter.execute(&child, child_pipeline).await });
                }

                let mut first_error = None;
                while let Some(joined) = tasks.join_next().await {
                    let result = joined.map_err(|err| EngineError::Join(err.to_string()))?;
                    if let Err(err) = result {
                        first_error.get_or_insert(err);
                    }
                }
                if let Some(err) = first_error {
                    return Err(err);
                }
            }

            StepKind::Unknown => {
                return Err(EngineError::UnsupportedStep(step.id.clone()));
            }
        }

        Ok(())
    }

    /// A composite with nothing to run completes immediately.
    async fn complete_empty(
        &self,
        mut state: StepState,
        instance_id: InstanceId,
        step_id: &str,
        iteration: i32,
    ) -> Result<(), EngineError> {
        state.status = Status::Completed;
        state.child_count = 0;
        self.storage.save_step_state(&state).await?;
        self.emit(instance_id, step_id, iteration, Status::Completed, Map::new())
            .await
    }

    /// Route a step-change event through the handler, which serializes it
    /// under the instance lock (or queues it when the lock is held).
    async fn emit(
        &self,
        instance_id: InstanceId,
        step_id: &str,
        iteration: i32,
        status: Status,
        data: Map<String, Value>,
    ) -> Result<(), EngineError> {
        let event = StepChangeEvent::new(instance_id, step_id, iteration, status, data);
        let handler = StepChangeHandler::new(Arc::clone(&self.storage), Arc::clone(&self.invokers));
        handler.handle(&event).await
    }

    /// Dispatch an action leaf: bind parameters onto a cloned pipeline,
    /// invoke the transport, and emit the completion event for synchronous
    /// outcomes.
    async fn run_action(
        &self,
        step: &Step,
        action: &ActionStep,
        pipeline: &Pipeline,
        iteration: i32,
    ) -> Result<(), EngineError> {
        let instance_id = pipeline
            .instance_id()
            .ok_or(EngineError::MissingInstanceContext)?;
        let spec = self.storage.action_spec(&action.id).await?;

        let mut action_pipeline = pipeline.clone();
        for param in &action.parameters {
            let mut value = match (&param.value, &param.var) {
                (Some(literal), _) => Some(literal.clone()),
                (None, Some(var)) => pipeline.get(var).ok().cloned(),
                (None, None) => None,
            };

            // Integer literals widen when the schema declares a float field.
            if let (Some(Value::Number(n)), Some(schema)) = (&value, spec.parameter(&param.name)) {
                if schema.field_type.is_floating() {
                    if let Some(int) = n.as_i64() {
                        #[allow(clippy::cast_precision_loss)]
                        let widened = serde_json::Number::from_f64(int as f64);
                        value = widened.map(Value::Number);
                    }
                }
            }

            match value {
                Some(value) => action_pipeline.set(&param.name, value),
                None => {
                    if spec.parameter(&param.name).is_some_and(|schema| schema.required) {
                        return Err(EngineError::MissingRequiredInput {
                            action: action.id.clone(),
                            name: param.name.clone(),
                        });
                    }
                }
            }
        }

        let invoker = self
            .invokers
            .get(spec.endpoint.kind)
            .ok_or(EngineError::UnsupportedEndpoint(spec.endpoint.kind))?;

        match invoker.invoke(&spec, &mut action_pipeline).await? {
            InvokeOutcome::Completed { data } => {
                // Local endpoints report the whole action pipeline; only
                // what the step's result mappings name flows back. Remote
                // endpoints already answer in pipeline terms, so mappings
                // are optional there.
                let mapped = if spec.endpoint.kind == weft_domain::EndpointKind::Local
                    || !action.results.is_empty()
                {
                    let mut mapped = Map::new();
                    for mapping in &action.results {
                        let value = data.get(&mapping.output_var).cloned().ok_or_else(|| {
                            TransportError::Remote(format!(
                                "action '{}' returned no output '{}'",
                                action.id, mapping.output_var
                            ))
                        })?;
                        mapped.insert(mapping.pipeline_var.clone(), value);
                    }
                    mapped
                } else {
                    data
                };
                self.emit(instance_id, &step.id, iteration, Status::Completed, mapped)
                    .await
            }
            InvokeOutcome::Failed { data } => {
                self.emit(instance_id, &step.id, iteration, Status::Failed, data)
                    .await
            }
            InvokeOutcome::Accepted => Ok(()),
        }
    }
}

/// Child pipelines are clones carrying their own step id and the composite's
/// id as parent.
fn clone_for(pipeline: &Pipeline, step: &Step, parent_id: &str) -> Pipeline {
    let mut clone = pipeline.clone();
    clone.set(STEP_ID_KEY, Value::String(step.id.clone()));
    clone.set(PARENT_ID_KEY, Value::String(parent_id.to_string()));
    clone
}

/// Switch-case comparison with numeric coercion so `3` matches `3.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}
