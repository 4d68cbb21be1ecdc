//! Pipeline: the mutable keyed data container of a workflow instance.
//!
//! Keys are dotted paths into a JSON document; integer segments index
//! arrays. A handful of reserved keys carry per-execution context (instance
//! id, workflow id/version, current and parent step ids, iteration counter,
//! error slot). Pipelines are not shared: the driver hands cloned copies to
//! child executions and merges outputs back under the instance lock.

mod condition;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ids::InstanceId;

// =============================================================================
// Reserved keys
// =============================================================================

pub const INSTANCE_ID_KEY: &str = "_instance_id";
pub const WORKFLOW_ID_KEY: &str = "_workflow_id";
pub const WORKFLOW_VERSION_KEY: &str = "_workflow_version";
pub const PARENT_ID_KEY: &str = "_parent_id";
pub const STEP_ID_KEY: &str = "_step_id";
pub const STEP_ITERATION_KEY: &str = "_step_iteration";
pub const ERROR_KEY: &str = "_error";

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by pipeline access and condition evaluation
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No value at the requested path
    #[error("no value at path '{0}'")]
    PathNotFound(String),

    /// Condition expression failed to parse or compare
    #[error("condition error: {0}")]
    Condition(String),
}

// =============================================================================
// Pipeline
// =============================================================================

/// Keyed data container for a single instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    data: Map<String, Value>,
}

impl Pipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Map::new() }
    }

    /// Wrap an existing key/value map.
    #[must_use]
    pub const fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Build the initial pipeline for a new instance: caller input seeded
    /// with the reserved context keys.
    #[must_use]
    pub fn seeded(
        instance_id: InstanceId,
        workflow_id: &str,
        workflow_version: i32,
        input: Map<String, Value>,
    ) -> Self {
        let mut pipeline = Self::from_map(input);
        pipeline.set(INSTANCE_ID_KEY, Value::String(instance_id.to_string()));
        pipeline.set(WORKFLOW_ID_KEY, Value::String(workflow_id.to_string()));
        pipeline.set(WORKFLOW_VERSION_KEY, Value::from(workflow_version));
        pipeline.set(STEP_ITERATION_KEY, Value::from(0));
        pipeline
    }

    /// Value at a dotted path.
    pub fn get(&self, path: &str) -> Result<&Value, PipelineError> {
        self.lookup(path)
            .ok_or_else(|| PipelineError::PathNotFound(path.to_string()))
    }

    /// Whether a value exists at the path.
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Set a value at a dotted path, creating intermediate objects as
    /// needed and overwriting scalars in the way.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        set_in_map(&mut self.data, &segments, value);
    }

    /// Deep-merge another pipeline into this one; values from `other` win,
    /// objects merge recursively, arrays and scalars overwrite.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.data {
            match self.data.get_mut(key) {
                Some(existing) => merge_value(existing, value),
                None => {
                    self.data.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Materialized copy of the underlying map.
    #[must_use]
    pub fn map(&self) -> Map<String, Value> {
        self.data.clone()
    }

    /// Consume the pipeline, yielding the underlying map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.data
    }

    /// Evaluate a boolean expression over pipeline paths.
    ///
    /// Supports comparison (`==`, `!=`, `<`, `<=`, `>`, `>=`) and logical
    /// (`&&`, `||`, `!`) operators plus parentheses. Paths that resolve to
    /// nothing compare as `null`.
    pub fn evaluate_condition(&self, expr: &str) -> Result<bool, PipelineError> {
        condition::evaluate(expr, self)
    }

    // =========================================================================
    // Reserved-key accessors
    // =========================================================================

    /// The owning instance id, when the pipeline has been seeded.
    #[must_use]
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.str_key(INSTANCE_ID_KEY).and_then(|s| s.parse().ok())
    }

    #[must_use]
    pub fn step_id(&self) -> Option<&str> {
        self.str_key(STEP_ID_KEY)
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.str_key(PARENT_ID_KEY)
    }

    /// Iteration counter for the current step execution; 0 when unset.
    #[must_use]
    pub fn step_iteration(&self) -> i32 {
        self.lookup(STEP_ITERATION_KEY)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(0)
    }

    pub fn set_step_iteration(&mut self, iteration: i32) {
        self.set(STEP_ITERATION_KEY, Value::from(iteration));
    }

    /// Error recorded on this pipeline, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.str_key(ERROR_KEY)
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.set(ERROR_KEY, Value::String(message.into()));
    }

    fn str_key(&self, key: &str) -> Option<&str> {
        self.lookup(key).and_then(Value::as_str)
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

fn set_in_map(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let key = segments[0];
    if segments.len() == 1 {
        map.insert(key.to_string(), value);
        return;
    }
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_in_value(entry, &segments[1..], value);
}

fn set_in_value(current: &mut Value, segments: &[&str], value: Value) {
    if let Value::Array(arr) = current {
        if let Ok(idx) = segments[0].parse::<usize>() {
            while arr.len() <= idx {
                arr.push(Value::Null);
            }
            if segments.len() == 1 {
                arr[idx] = value;
            } else {
                set_in_value(&mut arr[idx], &segments[1..], value);
            }
            return;
        }
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        set_in_map(map, segments, value);
    }
}

fn merge_value(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                match dst_map.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        dst_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}
