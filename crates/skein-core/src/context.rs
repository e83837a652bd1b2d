//! Workflow execution context.
//!
//! `WorkflowContext` is the mutable per-run state threaded through the
//! engine: resolved inputs, completed step results, for_each iteration
//! variables, the opaque validation config handle, and registered rollback
//! actions. Loop handlers derive per-iteration contexts that share `inputs`
//! but hold a private view of `results`, so writes inside one iteration are
//! never visible to peer iterations.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use skein_types::result::{StepResult, is_skip_marker};

use crate::config::ValidationConfig;

/// A compensating action registered by a completed step, executed in
/// reverse registration order if the workflow fails.
pub type RollbackFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A rollback action tagged with the step that registered it.
pub struct RollbackRegistration {
    pub step_name: String,
    pub action: RollbackFn,
}

impl std::fmt::Debug for RollbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackRegistration")
            .field("step_name", &self.step_name)
            .finish_non_exhaustive()
    }
}

/// Current for_each iteration variables.
#[derive(Debug, Clone)]
pub struct IterationVars {
    /// The current item from the iterated array.
    pub item: Value,
    /// The 0-based iteration index.
    pub index: usize,
}

/// Runtime context for a workflow run.
pub struct WorkflowContext {
    /// Resolved input map, shared read-only across derived contexts.
    pub inputs: Arc<serde_json::Map<String, Value>>,
    /// Completed step results keyed by step name.
    pub results: HashMap<String, StepResult>,
    /// Iteration variables, present only inside a for_each iteration.
    pub iteration: Option<IterationVars>,
    /// Name of the innermost enclosing loop step. Nested loops read this to
    /// attribute their iteration events to the correct parent.
    pub current_loop: Option<String>,
    config: Option<Arc<dyn ValidationConfig>>,
    rollbacks: Vec<RollbackRegistration>,
}

impl WorkflowContext {
    /// Create a fresh context from resolved inputs.
    pub fn new(
        inputs: serde_json::Map<String, Value>,
        config: Option<Arc<dyn ValidationConfig>>,
    ) -> Self {
        Self {
            inputs: Arc::new(inputs),
            results: HashMap::new(),
            iteration: None,
            current_loop: None,
            config,
            rollbacks: Vec::new(),
        }
    }

    /// The opaque validation config handle, if any.
    pub fn config(&self) -> Option<Arc<dyn ValidationConfig>> {
        self.config.clone()
    }

    /// Output of a previously executed step, or `None` if it has not run.
    pub fn get_step_output(&self, step_name: &str) -> Option<&Value> {
        self.results.get(step_name).map(|r| &r.output)
    }

    /// Store a completed step result under its step name.
    pub fn store_result(&mut self, result: StepResult) {
        self.results.insert(result.name.clone(), result);
    }

    /// Whether a step exists and was skipped (skip-marker output).
    pub fn is_step_skipped(&self, step_name: &str) -> bool {
        self.get_step_output(step_name)
            .map(is_skip_marker)
            .unwrap_or(false)
    }

    /// Register a rollback action for a completed step.
    pub fn register_rollback(&mut self, step_name: impl Into<String>, action: RollbackFn) {
        self.rollbacks.push(RollbackRegistration {
            step_name: step_name.into(),
            action,
        });
    }

    /// Drain registered rollbacks, in registration order.
    pub fn take_rollbacks(&mut self) -> Vec<RollbackRegistration> {
        std::mem::take(&mut self.rollbacks)
    }

    /// Derive a context for one for_each iteration: shared inputs, a private
    /// results view seeded from this context, fresh `item`/`index`, and the
    /// loop's name as the current loop for nested-loop event attribution.
    /// Rollbacks stay with the parent; iteration contexts start empty.
    pub fn for_iteration(&self, item: Value, index: usize, loop_name: &str) -> Self {
        Self {
            inputs: Arc::clone(&self.inputs),
            results: self.results.clone(),
            iteration: Some(IterationVars { item, index }),
            current_loop: Some(loop_name.to_string()),
            config: self.config.clone(),
            rollbacks: Vec::new(),
        }
    }

    /// Derive a context for one task of a task-set loop. Iteration variables
    /// are inherited from the parent (a task-set loop inside a for_each
    /// iteration still sees the outer `item`/`index`).
    pub fn for_task(&self, loop_name: &str) -> Self {
        Self {
            inputs: Arc::clone(&self.inputs),
            results: self.results.clone(),
            iteration: self.iteration.clone(),
            current_loop: Some(loop_name.to_string()),
            config: self.config.clone(),
            rollbacks: Vec::new(),
        }
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("inputs", &self.inputs)
            .field("results", &self.results.keys().collect::<Vec<_>>())
            .field("iteration", &self.iteration)
            .field("current_loop", &self.current_loop)
            .field("rollbacks", &self.rollbacks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
