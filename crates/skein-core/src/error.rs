//! Engine error taxonomy.
//!
//! Parse, semantic, and input-binding errors abort a run before any step
//! executes. Step-level failures are folded into failed `StepResult`s by the
//! executor and never surface as `Err` from the runner; `EngineError` covers
//! everything that prevents or aborts a run.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::expression::ExpressionError;

/// Errors that abort a workflow run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow document parse failure (YAML structure, unknown fields).
    #[error("parse error: {0}")]
    Parse(String),

    /// Template expression failure (syntax or evaluation).
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// Static validation failure (duplicate names, concurrency conflicts,
    /// subworkflow cycles).
    #[error("semantic error: {0}")]
    Semantic(String),

    /// A step references a component that is not registered.
    #[error("unknown {kind}: '{name}'")]
    UnknownComponent { kind: &'static str, name: String },

    /// Input binding failure (missing required input, type mismatch).
    #[error("input binding error: {0}")]
    InputBinding(String),

    /// Checkpoint persistence failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Aggregate failure of a loop step: every failed iteration, by index.
#[derive(Debug, Clone)]
pub struct LoopStepError {
    /// Name of the loop step.
    pub step_name: String,
    /// `(iteration_index, error_message)` pairs, in index order.
    pub failed_iterations: Vec<(usize, String)>,
    /// Total number of iterations the loop attempted.
    pub total_iterations: usize,
}

impl std::fmt::Display for LoopStepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "loop step '{}': {} of {} iterations failed: ",
            self.step_name,
            self.failed_iterations.len(),
            self.total_iterations
        )?;
        for (i, (index, message)) in self.failed_iterations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "iteration {index}: {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for LoopStepError {}
