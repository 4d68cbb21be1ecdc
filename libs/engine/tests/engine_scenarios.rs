//! End-to-end engine scenarios over the in-memory backend.
//!
//! Each test registers real action specs and local handlers, starts an
//! instance through the manager, and observes the persisted states the way
//! an operator would.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use weft_domain::{
    ActionSpec, ActionStep, Case, ElseBranch, Endpoint, EndpointKind, FieldType, IfStep,
    InstanceId, Parameter, ParallelStep, Pipeline, ResultMapping, Schema, Status, Step,
    StepChangeEvent, StepKind, SwitchStep, Workflow, ForStep,
};
use weft_engine::{
    ActionHandler, ActionInvoker, EngineError, HandlerError, HandlerRegistry, InvokeOutcome,
    InvokerRegistry, StepChangeHandler, WorkflowManager,
};
use weft_storage::{MemoryStorage, Storage};

// =============================================================================
// Harness
// =============================================================================

struct Env {
    storage: Arc<MemoryStorage>,
    handlers: Arc<HandlerRegistry>,
    invokers: Arc<InvokerRegistry>,
}

impl Env {
    fn new() -> Self {
        Self::with_registry(|_| {})
    }

    /// Build an environment, letting the test adjust the invoker registry
    /// (e.g. to stand in an async-accepting transport).
    fn with_registry(customize: impl FnOnce(&mut InvokerRegistry)) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let handlers = Arc::new(HandlerRegistry::new());
        let mut registry = InvokerRegistry::with_defaults(Arc::clone(&handlers));
        customize(&mut registry);
        Self {
            storage,
            handlers,
            invokers: Arc::new(registry),
        }
    }

    fn manager(&self) -> WorkflowManager {
        WorkflowManager::new(self.storage.clone(), Arc::clone(&self.invokers))
    }

    fn handler(&self) -> StepChangeHandler {
        StepChangeHandler::new(self.storage.clone(), Arc::clone(&self.invokers))
    }

    async fn register_local_action(&self, id: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.register(id, handler);
        self.manager()
            .save_action(&spec(id, Endpoint::local()))
            .await
            .unwrap();
    }
}

fn spec(id: &str, endpoint: Endpoint) -> ActionSpec {
    ActionSpec {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        parameters: vec![
            Schema::new("x", FieldType::Int),
            Schema::new("y", FieldType::Int),
            Schema::new("n", FieldType::Int),
        ],
        returns: vec![Schema::new("sum", FieldType::Int)],
        async_completion: false,
        endpoint,
    }
}

fn workflow(id: &str, steps: Vec<Step>) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: id.to_string(),
        version: 1,
        description: String::new(),
        steps,
    }
}

fn action_step(id: &str, action_id: &str, parameters: Vec<Parameter>, results: Vec<ResultMapping>) -> Step {
    Step {
        id: id.to_string(),
        skip: false,
        kind: StepKind::Action {
            action: ActionStep {
                id: action_id.to_string(),
                name: String::new(),
                parameters,
                results,
            },
        },
    }
}

fn literal(name: &str, value: Value) -> Parameter {
    Parameter {
        name: name.to_string(),
        value: Some(value),
        var: None,
    }
}

fn mapped(output_var: &str, pipeline_var: &str) -> ResultMapping {
    ResultMapping {
        output_var: output_var.to_string(),
        pipeline_var: pipeline_var.to_string(),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Sets `sum = x + y` on the action pipeline.
struct Adder;

#[async_trait]
impl ActionHandler for Adder {
    async fn handle(&self, pipeline: &mut Pipeline) -> Result<(), HandlerError> {
        let x = pipeline.get("x").ok().and_then(Value::as_i64).unwrap_or(0);
        let y = pipeline.get("y").ok().and_then(Value::as_i64).unwrap_or(0);
        pipeline.set("sum", json!(x + y));
        Ok(())
    }
}

/// Adds `n` onto the running `sum`.
struct Accumulator;

#[async_trait]
impl ActionHandler for Accumulator {
    async fn handle(&self, pipeline: &mut Pipeline) -> Result<(), HandlerError> {
        let sum = pipeline.get("sum").ok().and_then(Value::as_i64).unwrap_or(0);
        let n = pipeline.get("n").ok().and_then(Value::as_i64).unwrap_or(0);
        pipeline.set("sum", json!(sum + n));
        Ok(())
    }
}

/// Appends its tag to a shared log and marks a pipeline key.
struct Recorder {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ActionHandler for Recorder {
    async fn handle(&self, pipeline: &mut Pipeline) -> Result<(), HandlerError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(self.tag.to_string());
        }
        pipeline.set(&format!("ran_{}", self.tag), json!(true));
        Ok(())
    }
}

/// Always fails.
struct Exploder;

#[async_trait]
impl ActionHandler for Exploder {
    async fn handle(&self, _pipeline: &mut Pipeline) -> Result<(), HandlerError> {
        Err(HandlerError::ExecutionFailed("child exploded".to_string()))
    }
}

/// Transport double that accepts every request for async completion.
struct AcceptingInvoker;

#[async_trait]
impl ActionInvoker for AcceptingInvoker {
    async fn invoke(
        &self,
        _spec: &ActionSpec,
        _pipeline: &mut Pipeline,
    ) -> Result<InvokeOutcome, EngineError> {
        Ok(InvokeOutcome::Accepted)
    }
}

async fn step_status(env: &Env, instance_id: InstanceId, step_id: &str, iteration: i32) -> Status {
    env.storage
        .step_state(instance_id, step_id, iteration)
        .await
        .unwrap()
        .status
}

// =============================================================================
// Scenario 1: sequential action happy path
// =============================================================================

#[tokio::test]
async fn sequential_action_happy_path() {
    let env = Env::new();
    env.register_local_action("local.add", Arc::new(Adder)).await;

    let wf = workflow(
        "math",
        vec![action_step(
            "A",
            "local.add",
            vec![literal("x", json!(2)), literal("y", json!(3))],
            vec![mapped("sum", "result")],
        )],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let instance_id = manager.start("math", 1, Map::new()).await.unwrap();

    let (status, pipeline) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
    assert_eq!(pipeline.get("result"), Some(&json!(5)));
    assert_eq!(step_status(&env, instance_id, "A", 0).await, Status::Completed);
}

// =============================================================================
// Scenario 2: if branch selection
// =============================================================================

async fn run_if_workflow(input: Value) -> (Vec<String>, Status) {
    let env = Env::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    env.register_local_action(
        "local.mark_t",
        Arc::new(Recorder {
            tag: "T",
            log: Arc::clone(&log),
        }),
    )
    .await;
    env.register_local_action(
        "local.mark_e",
        Arc::new(Recorder {
            tag: "E",
            log: Arc::clone(&log),
        }),
    )
    .await;

    let wf = workflow(
        "branching",
        vec![Step {
            id: "cond".to_string(),
            skip: false,
            kind: StepKind::If {
                branch: IfStep {
                    condition: "flag == true".to_string(),
                    steps: vec![action_step("T", "local.mark_t", vec![], vec![])],
                    else_ifs: Vec::new(),
                    else_branch: Some(ElseBranch {
                        steps: vec![action_step("E", "local.mark_e", vec![], vec![])],
                    }),
                },
            },
        }],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let input = match input {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let instance_id = manager.start("branching", 1, input).await.unwrap();
    let (status, _) = manager.status(instance_id).await.unwrap();

    let executed = log.lock().unwrap().clone();
    (executed, status)
}

#[tokio::test]
async fn if_branch_selects_then() {
    let (executed, status) = run_if_workflow(json!({"flag": true})).await;
    assert_eq!(status, Status::Completed);
    assert_eq!(executed, vec!["T"]);
}

#[tokio::test]
async fn if_branch_selects_else() {
    let (executed, status) = run_if_workflow(json!({"flag": false})).await;
    assert_eq!(status, Status::Completed);
    assert_eq!(executed, vec!["E"]);
}

// =============================================================================
// Scenario 3: for loop over three items
// =============================================================================

#[tokio::test]
async fn for_loop_accumulates_three_items() {
    let env = Env::new();
    env.register_local_action("local.accumulate", Arc::new(Accumulator))
        .await;

    let wf = workflow(
        "looping",
        vec![Step {
            id: "loop".to_string(),
            skip: false,
            kind: StepKind::ForLoop {
                for_loop: ForStep {
                    loop_var: "n".to_string(),
                    index_var: "i".to_string(),
                    items_var: String::new(),
                    items: vec![json!(10), json!(20), json!(30)],
                    steps: vec![action_step(
                        "A",
                        "local.accumulate",
                        vec![],
                        vec![mapped("sum", "sum")],
                    )],
                },
            },
        }],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let instance_id = manager.start("looping", 1, Map::new()).await.unwrap();

    let (status, pipeline) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
    assert_eq!(pipeline.get("sum"), Some(&json!(60)));

    let loop_state = env.storage.step_state(instance_id, "loop", 0).await.unwrap();
    assert_eq!(loop_state.status, Status::Completed);
    assert_eq!(loop_state.child_count, 3);

    for iteration in 0..3 {
        assert_eq!(
            step_status(&env, instance_id, "A", iteration).await,
            Status::Completed
        );
    }
}

// =============================================================================
// Scenario 4: parallel fan-out with one failure
// =============================================================================

#[tokio::test]
async fn parallel_failure_cascades() {
    let env = Env::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    env.register_local_action(
        "local.ok1",
        Arc::new(Recorder {
            tag: "ok1",
            log: Arc::clone(&log),
        }),
    )
    .await;
    env.register_local_action("local.boom", Arc::new(Exploder)).await;
    env.register_local_action(
        "local.ok2",
        Arc::new(Recorder {
            tag: "ok2",
            log: Arc::clone(&log),
        }),
    )
    .await;

    let wf = workflow(
        "fanout",
        vec![Step {
            id: "par".to_string(),
            skip: false,
            kind: StepKind::Parallel {
                parallel: ParallelStep {
                    steps: vec![
                        action_step("a1", "local.ok1", vec![], vec![]),
                        action_step("a2", "local.boom", vec![], vec![]),
                        action_step("a3", "local.ok2", vec![], vec![]),
                    ],
                },
            },
        }],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let instance_id = manager.start("fanout", 1, Map::new()).await.unwrap();

    let state = env.storage.state(instance_id).await.unwrap();
    assert_eq!(state.status, Status::Failed);
    assert!(
        state.error.as_deref().unwrap_or("").contains("child exploded"),
        "error should carry the failing child's message, got {:?}",
        state.error
    );

    assert_eq!(step_status(&env, instance_id, "par", 0).await, Status::Failed);
    assert_eq!(step_status(&env, instance_id, "a1", 0).await, Status::Completed);
    assert_eq!(step_status(&env, instance_id, "a2", 0).await, Status::Failed);
    assert_eq!(step_status(&env, instance_id, "a3", 0).await, Status::Completed);
}

// =============================================================================
// Scenario 5: async action resume
// =============================================================================

#[tokio::test]
async fn async_action_resumes_on_event() {
    let env = Env::with_registry(|registry| {
        registry.register(EndpointKind::Rest, Arc::new(AcceptingInvoker));
    });
    let log = Arc::new(Mutex::new(Vec::new()));
    env.register_local_action(
        "local.finish",
        Arc::new(Recorder {
            tag: "finish",
            log: Arc::clone(&log),
        }),
    )
    .await;
    env.manager()
        .save_action(&spec("remote.task", Endpoint::rest("http://upstream.test/run")))
        .await
        .unwrap();

    let wf = workflow(
        "remote",
        vec![
            action_step("A", "remote.task", vec![], vec![]),
            action_step("B", "local.finish", vec![], vec![]),
        ],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let instance_id = manager.start("remote", 1, Map::new()).await.unwrap();

    // The transport accepted the request; nothing is terminal yet.
    let (status, _) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Running);
    assert_eq!(step_status(&env, instance_id, "A", 0).await, Status::Running);
    assert!(log.lock().unwrap().is_empty());

    // External completion arrives through the step-change API.
    let mut data = Map::new();
    data.insert("out".to_string(), json!(7));
    env.handler()
        .handle(&StepChangeEvent::new(
            instance_id,
            "A",
            0,
            Status::Completed,
            data,
        ))
        .await
        .unwrap();

    let (status, pipeline) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
    assert_eq!(pipeline.get("out"), Some(&json!(7)));
    assert_eq!(*log.lock().unwrap(), vec!["finish"]);
}

// =============================================================================
// Scenario 6: events racing the lock
// =============================================================================

#[tokio::test]
async fn queued_events_drain_after_unlock() {
    let env = Env::with_registry(|registry| {
        registry.register(EndpointKind::Rest, Arc::new(AcceptingInvoker));
    });
    for id in ["remote.a1", "remote.a2", "remote.a3"] {
        env.manager()
            .save_action(&spec(id, Endpoint::rest("http://upstream.test/run")))
            .await
            .unwrap();
    }

    let wf = workflow(
        "racing",
        vec![Step {
            id: "par".to_string(),
            skip: false,
            kind: StepKind::Parallel {
                parallel: ParallelStep {
                    steps: vec![
                        action_step("a1", "remote.a1", vec![], vec![]),
                        action_step("a2", "remote.a2", vec![], vec![]),
                        action_step("a3", "remote.a3", vec![], vec![]),
                    ],
                },
            },
        }],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();
    let instance_id = manager.start("racing", 1, Map::new()).await.unwrap();

    // Hold the instance lock while two completions arrive; both must queue.
    assert!(env.storage.lock_instance(instance_id).await.unwrap());

    let mut d1 = Map::new();
    d1.insert("r1".to_string(), json!(1));
    let mut d2 = Map::new();
    d2.insert("r2".to_string(), json!(2));
    env.handler()
        .handle(&StepChangeEvent::new(instance_id, "a1", 0, Status::Completed, d1))
        .await
        .unwrap();
    env.handler()
        .handle(&StepChangeEvent::new(instance_id, "a2", 0, Status::Completed, d2))
        .await
        .unwrap();

    assert_eq!(
        env.storage.step_change_events(instance_id).await.unwrap().len(),
        2
    );
    assert_eq!(step_status(&env, instance_id, "a1", 0).await, Status::Running);

    env.storage.unlock_instance(instance_id).await.unwrap();

    // The third event acquires the lock and drains everything.
    let mut d3 = Map::new();
    d3.insert("r3".to_string(), json!(3));
    env.handler()
        .handle(&StepChangeEvent::new(instance_id, "a3", 0, Status::Completed, d3))
        .await
        .unwrap();

    assert!(env
        .storage
        .step_change_events(instance_id)
        .await
        .unwrap()
        .is_empty());

    let (status, pipeline) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
    assert_eq!(pipeline.get("r1"), Some(&json!(1)));
    assert_eq!(pipeline.get("r2"), Some(&json!(2)));
    assert_eq!(pipeline.get("r3"), Some(&json!(3)));
    assert_eq!(step_status(&env, instance_id, "par", 0).await, Status::Completed);
}

// =============================================================================
// ForLoop with a multi-step body
// =============================================================================

#[tokio::test]
async fn for_loop_multi_step_body_completes_after_all_children() {
    let env = Env::with_registry(|registry| {
        registry.register(EndpointKind::Rest, Arc::new(AcceptingInvoker));
    });
    for id in ["remote.s1", "remote.s2"] {
        env.manager()
            .save_action(&spec(id, Endpoint::rest("http://upstream.test/run")))
            .await
            .unwrap();
    }

    let wf = workflow(
        "batching",
        vec![Step {
            id: "loop".to_string(),
            skip: false,
            kind: StepKind::ForLoop {
                for_loop: ForStep {
                    loop_var: "item".to_string(),
                    index_var: "i".to_string(),
                    items_var: String::new(),
                    items: vec![json!("a"), json!("b")],
                    steps: vec![
                        action_step("s1", "remote.s1", vec![], vec![]),
                        action_step("s2", "remote.s2", vec![], vec![]),
                    ],
                },
            },
        }],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();
    let instance_id = manager.start("batching", 1, Map::new()).await.unwrap();

    // Two items with a two-step body: four child executions in total.
    let loop_state = env.storage.step_state(instance_id, "loop", 0).await.unwrap();
    assert_eq!(loop_state.child_count, 4);

    // Children complete one at a time in schedule order; the loop must stay
    // open until the last one settles.
    for (step_id, iteration) in [("s1", 0), ("s2", 0), ("s1", 1)] {
        env.handler()
            .handle(&StepChangeEvent::new(
                instance_id,
                step_id,
                iteration,
                Status::Completed,
                Map::new(),
            ))
            .await
            .unwrap();

        assert_eq!(
            step_status(&env, instance_id, "loop", 0).await,
            Status::Running,
            "loop settled early after ({step_id}, {iteration})"
        );
        let (status, _) = manager.status(instance_id).await.unwrap();
        assert_eq!(status, Status::Running);
    }

    env.handler()
        .handle(&StepChangeEvent::new(
            instance_id,
            "s2",
            1,
            Status::Completed,
            Map::new(),
        ))
        .await
        .unwrap();

    assert_eq!(step_status(&env, instance_id, "loop", 0).await, Status::Completed);
    for (step_id, iteration) in [("s1", 0), ("s2", 0), ("s1", 1), ("s2", 1)] {
        assert_eq!(
            step_status(&env, instance_id, step_id, iteration).await,
            Status::Completed
        );
    }
    let (status, _) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
}

// =============================================================================
// Switch, skip, and structural behaviors
// =============================================================================

#[tokio::test]
async fn switch_selects_case_and_default() {
    for (input, expected) in [
        (json!({"route": "fast"}), "T"),
        (json!({"route": "unknown"}), "E"),
    ] {
        let env = Env::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        env.register_local_action(
            "local.mark_t",
            Arc::new(Recorder {
                tag: "T",
                log: Arc::clone(&log),
            }),
        )
        .await;
        env.register_local_action(
            "local.mark_e",
            Arc::new(Recorder {
                tag: "E",
                log: Arc::clone(&log),
            }),
        )
        .await;

        let wf = workflow(
            "switching",
            vec![Step {
                id: "sw".to_string(),
                skip: false,
                kind: StepKind::Switch {
                    switch: SwitchStep {
                        variable: "route".to_string(),
                        cases: vec![
                            Case {
                                value: Some(json!("fast")),
                                default: false,
                                steps: vec![action_step("T", "local.mark_t", vec![], vec![])],
                            },
                            Case {
                                value: None,
                                default: true,
                                steps: vec![action_step("E", "local.mark_e", vec![], vec![])],
                            },
                        ],
                    },
                },
            }],
        );
        let manager = env.manager();
        manager.save(&wf).await.unwrap();

        let input = match input {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let instance_id = manager.start("switching", 1, input).await.unwrap();
        let (status, _) = manager.status(instance_id).await.unwrap();
        assert_eq!(status, Status::Completed);
        assert_eq!(*log.lock().unwrap(), vec![expected.to_string()]);
    }
}

#[tokio::test]
async fn skipped_step_is_terminal_and_not_executed() {
    let env = Env::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    env.register_local_action(
        "local.mark_t",
        Arc::new(Recorder {
            tag: "T",
            log: Arc::clone(&log),
        }),
    )
    .await;

    let mut skipped = action_step("skipped", "local.mark_t", vec![], vec![]);
    skipped.skip = true;
    let wf = workflow(
        "skipping",
        vec![skipped, action_step("after", "local.mark_t", vec![], vec![])],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let instance_id = manager.start("skipping", 1, Map::new()).await.unwrap();
    let (status, _) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
    assert_eq!(
        step_status(&env, instance_id, "skipped", 0).await,
        Status::Skipped
    );
    // Only the non-skipped step actually ran.
    assert_eq!(*log.lock().unwrap(), vec!["T"]);
}

#[tokio::test]
async fn empty_composite_completes_immediately() {
    let env = Env::new();
    let wf = workflow(
        "hollow",
        vec![Step {
            id: "par".to_string(),
            skip: false,
            kind: StepKind::Parallel {
                parallel: ParallelStep { steps: Vec::new() },
            },
        }],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let instance_id = manager.start("hollow", 1, Map::new()).await.unwrap();
    let (status, _) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);

    let state = env.storage.step_state(instance_id, "par", 0).await.unwrap();
    assert_eq!(state.status, Status::Completed);
    assert_eq!(state.child_count, 0);
}

// =============================================================================
// Idempotence and lifecycle properties
// =============================================================================

#[tokio::test]
async fn duplicate_event_is_idempotent() {
    let env = Env::with_registry(|registry| {
        registry.register(EndpointKind::Rest, Arc::new(AcceptingInvoker));
    });
    env.manager()
        .save_action(&spec("remote.task", Endpoint::rest("http://upstream.test/run")))
        .await
        .unwrap();

    let wf = workflow("solo", vec![action_step("A", "remote.task", vec![], vec![])]);
    let manager = env.manager();
    manager.save(&wf).await.unwrap();
    let instance_id = manager.start("solo", 1, Map::new()).await.unwrap();

    let mut data = Map::new();
    data.insert("out".to_string(), json!(7));
    let event = StepChangeEvent::new(instance_id, "A", 0, Status::Completed, data);

    env.handler().handle(&event).await.unwrap();
    env.handler().handle(&event).await.unwrap();

    // Still exactly one state for (instance, step, iteration).
    let states = env.storage.step_states(instance_id).await.unwrap();
    assert_eq!(states["A"].len(), 1);
    assert_eq!(states["A"][0].status, Status::Completed);

    let (status, pipeline) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
    assert_eq!(pipeline.get("out"), Some(&json!(7)));
}

#[tokio::test]
async fn deleting_workflow_does_not_break_running_instance() {
    let env = Env::with_registry(|registry| {
        registry.register(EndpointKind::Rest, Arc::new(AcceptingInvoker));
    });
    env.manager()
        .save_action(&spec("remote.task", Endpoint::rest("http://upstream.test/run")))
        .await
        .unwrap();

    let wf = workflow("doomed", vec![action_step("A", "remote.task", vec![], vec![])]);
    let manager = env.manager();
    manager.save(&wf).await.unwrap();
    let instance_id = manager.start("doomed", 1, Map::new()).await.unwrap();

    manager.delete("doomed", 1).await.unwrap();
    assert!(manager.workflow("doomed", 1).await.is_err());

    // The in-flight instance still resolves its pinned version and finishes.
    env.handler()
        .handle(&StepChangeEvent::new(
            instance_id,
            "A",
            0,
            Status::Completed,
            Map::new(),
        ))
        .await
        .unwrap();

    let (status, _) = manager.status(instance_id).await.unwrap();
    assert_eq!(status, Status::Completed);
}

#[tokio::test]
async fn terminal_workflow_has_only_terminal_steps() {
    let env = Env::new();
    env.register_local_action("local.add", Arc::new(Adder)).await;

    let wf = workflow(
        "audit",
        vec![
            action_step(
                "A",
                "local.add",
                vec![literal("x", json!(1)), literal("y", json!(1))],
                vec![mapped("sum", "first")],
            ),
            action_step(
                "B",
                "local.add",
                vec![literal("x", json!(2)), literal("y", json!(2))],
                vec![mapped("sum", "second")],
            ),
        ],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();
    let instance_id = manager.start("audit", 1, Map::new()).await.unwrap();

    let state = env.storage.state(instance_id).await.unwrap();
    assert!(state.status.is_terminal());

    for states in env.storage.step_states(instance_id).await.unwrap().values() {
        for step_state in states {
            assert!(
                step_state.status.is_terminal(),
                "step {} left non-terminal",
                step_state.step_id
            );
        }
    }
}

#[tokio::test]
async fn unknown_step_type_surfaces_unsupported_step() {
    let env = Env::new();
    // A misspelled type survives parsing as an unknown kind and is rejected
    // when the step is dispatched.
    let wf: Workflow = serde_json::from_value(json!({
        "id": "mystery",
        "name": "mystery",
        "version": 1,
        "steps": [{"id": "odd", "type": "Quantum"}]
    }))
    .unwrap();
    assert_eq!(wf.steps[0].kind_name(), "Unknown");

    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let err = manager.start("mystery", 1, Map::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedStep(_)));
    assert!(err.to_string().contains("odd"));
}

#[tokio::test]
async fn missing_required_input_fails_instance() {
    let env = Env::new();
    env.handlers.register("local.add", Arc::new(Adder));
    let mut strict = spec("local.add", Endpoint::local());
    strict.parameters = vec![Schema::new("x", FieldType::Int).required()];
    env.manager().save_action(&strict).await.unwrap();

    let wf = workflow(
        "strict",
        vec![action_step(
            "A",
            "local.add",
            vec![Parameter {
                name: "x".to_string(),
                value: None,
                var: Some("absent".to_string()),
            }],
            vec![],
        )],
    );
    let manager = env.manager();
    manager.save(&wf).await.unwrap();

    let instance_id = manager.start("strict", 1, Map::new()).await.unwrap();
    let state = env.storage.state(instance_id).await.unwrap();
    assert_eq!(state.status, Status::Failed);
    assert!(state
        .error
        .as_deref()
        .unwrap_or("")
        .contains("missing required input"));
}
