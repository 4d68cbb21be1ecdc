//! Workflow definitions
//!
//! A workflow is a versioned, immutable tree of steps: leaf action
//! invocations plus If/Switch/ForLoop/Parallel composites. This module also
//! carries the structural utilities the driver relies on: step lookup,
//! post-order flattening, and the child-to-parent index.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Structural validation error with an optional location
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Error message
    pub message: String,

    /// Location in the definition (e.g., "steps[2].for")
    pub location: Option<String>,
}

impl ValidationError {
    /// Create a new validation error with just a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Add a location to the error
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

// =============================================================================
// Workflow
// =============================================================================

/// A versioned workflow definition. Immutable once registered; identified by
/// `(id, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub version: i32,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Workflow {
    /// Find a step anywhere in the tree by id.
    #[must_use]
    pub fn step_by_id(&self, id: &str) -> Option<&Step> {
        fn search<'a>(steps: &'a [Step], id: &str) -> Option<&'a Step> {
            for step in steps {
                if step.id == id {
                    return Some(step);
                }
                if let Some(found) = search_children(step, id) {
                    return Some(found);
                }
            }
            None
        }

        fn search_children<'a>(step: &'a Step, id: &str) -> Option<&'a Step> {
            for child in step.nested_steps() {
                if child.id == id {
                    return Some(child);
                }
                if let Some(found) = search_children(child, id) {
                    return Some(found);
                }
            }
            None
        }

        search(&self.steps, id)
    }

    /// Flatten the step tree: for each top-level step, its descendants in
    /// post-order followed by the step itself. The driver scans this order so
    /// a composite is examined only after all of its descendants.
    #[must_use]
    pub fn flattened(&self) -> Vec<&Step> {
        fn push_descendants<'a>(step: &'a Step, out: &mut Vec<&'a Step>) {
            for child in step.nested_steps() {
                push_descendants(child, out);
                out.push(child);
            }
        }

        let mut out = Vec::new();
        for step in &self.steps {
            push_descendants(step, &mut out);
            out.push(step);
        }
        out
    }

    /// Map each descendant step id to the id of its enclosing composite.
    /// Top-level steps have no entry.
    #[must_use]
    pub fn parent_index(&self) -> HashMap<&str, &str> {
        fn visit<'a>(step: &'a Step, index: &mut HashMap<&'a str, &'a str>) {
            for child in step.nested_steps() {
                index.insert(child.id.as_str(), step.id.as_str());
                visit(child, index);
            }
        }

        let mut index = HashMap::new();
        for step in &self.steps {
            visit(step, &mut index);
        }
        index
    }

    /// Validate the definition: step ids unique across the tree, action
    /// steps reference an action id, every `ForLoop` declares an items
    /// source, and a `Switch` has at most one default case.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for step in self.flattened() {
            if step.id.is_empty() {
                return Err(ValidationError::new("step id must not be empty"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ValidationError::new(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            match &step.kind {
                StepKind::Action { action } => {
                    if action.id.is_empty() {
                        return Err(ValidationError::new(
                            "action step references no action id",
                        )
                        .with_location(format!("steps[{}].action", step.id)));
                    }
                }
                StepKind::ForLoop { for_loop } => {
                    if for_loop.items.is_empty() && for_loop.items_var.is_empty() {
                        return Err(ValidationError::new(
                            "for loop declares neither items nor items_var",
                        )
                        .with_location(format!("steps[{}].for", step.id)));
                    }
                }
                StepKind::Switch { switch } => {
                    let defaults = switch.cases.iter().filter(|c| c.default).count();
                    if defaults > 1 {
                        return Err(ValidationError::new("switch has more than one default case")
                            .with_location(format!("steps[{}].switch", step.id)));
                    }
                }
                StepKind::If { .. } | StepKind::Parallel { .. } | StepKind::Unknown => {}
            }
        }
        Ok(())
    }
}

// =============================================================================
// Steps
// =============================================================================

/// A node in the workflow tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,

    /// Skipped steps are persisted as `Skipped` and count as terminal
    #[serde(default)]
    pub skip: bool,

    #[serde(flatten)]
    pub kind: StepKind,
}

/// Step variant, discriminated by the `type` field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepKind {
    Action {
        action: ActionStep,
    },
    If {
        #[serde(rename = "if")]
        branch: IfStep,
    },
    Switch {
        switch: SwitchStep,
    },
    ForLoop {
        #[serde(rename = "for")]
        for_loop: ForStep,
    },
    Parallel {
        parallel: ParallelStep,
    },
    /// Captures definitions whose `type` tag matches no known kind, so a
    /// stale or misspelled type survives parsing and fails at execution
    /// with an unsupported-step error instead of a decode error.
    #[serde(other)]
    Unknown,
}

impl Step {
    /// True for If/Switch/ForLoop/Parallel steps.
    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            StepKind::If { .. }
                | StepKind::Switch { .. }
                | StepKind::ForLoop { .. }
                | StepKind::Parallel { .. }
        )
    }

    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self.kind {
            StepKind::Action { .. } => "Action",
            StepKind::If { .. } => "If",
            StepKind::Switch { .. } => "Switch",
            StepKind::ForLoop { .. } => "ForLoop",
            StepKind::Parallel { .. } => "Parallel",
            StepKind::Unknown => "Unknown",
        }
    }

    /// Direct child steps across all branches/cases/bodies.
    #[must_use]
    pub fn nested_steps(&self) -> Vec<&Step> {
        match &self.kind {
            StepKind::Action { .. } | StepKind::Unknown => Vec::new(),
            StepKind::If { branch } => {
                let mut out: Vec<&Step> = branch.steps.iter().collect();
                for else_if in &branch.else_ifs {
                    out.extend(else_if.steps.iter());
                }
                if let Some(else_branch) = &branch.else_branch {
                    out.extend(else_branch.steps.iter());
                }
                out
            }
            StepKind::Switch { switch } => switch
                .cases
                .iter()
                .flat_map(|case| case.steps.iter())
                .collect(),
            StepKind::ForLoop { for_loop } => for_loop.steps.iter().collect(),
            StepKind::Parallel { parallel } => parallel.steps.iter().collect(),
        }
    }
}

/// Leaf step invoking a catalogued action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// Id of the `ActionSpec` to invoke
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Input bindings, literal or pipeline path
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Output mappings from action output fields to pipeline paths
    #[serde(default)]
    pub results: Vec<ResultMapping>,
}

/// A single action input binding: either a literal `value` or a pipeline
/// path `var` to read at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
}

/// Maps one action output field to the pipeline path where it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMapping {
    pub output_var: String,
    pub pipeline_var: String,
}

/// Conditional branch step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStep {
    pub condition: String,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub else_ifs: Vec<ElseIf>,

    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_branch: Option<ElseBranch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElseIf {
    pub condition: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElseBranch {
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Multi-way branch on a pipeline value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStep {
    /// Pipeline path whose value selects the case
    pub variable: String,

    #[serde(default)]
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default)]
    pub default: bool,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Iterates a body over a literal array or a pipeline-resolved one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForStep {
    /// Pipeline key receiving the current item
    pub loop_var: String,

    /// Pipeline key receiving the current index
    #[serde(default)]
    pub index_var: String,

    /// Pipeline path resolving to the item array; used when `items` is empty
    #[serde(default)]
    pub items_var: String,

    /// Literal item array; takes precedence when non-empty
    #[serde(default)]
    pub items: Vec<Value>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Runs all child steps concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStep {
    #[serde(default)]
    pub steps: Vec<Step>,
}
