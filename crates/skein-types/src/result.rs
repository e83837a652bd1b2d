//! Execution outcome types: per-step results and the final workflow result.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Step type
// ---------------------------------------------------------------------------

/// The kind of a workflow step. Matches the `type` tag of `StepRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Python,
    Agent,
    Generate,
    Validate,
    Branch,
    Loop,
    Subworkflow,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Python => "python",
            StepType::Agent => "agent",
            StepType::Generate => "generate",
            StepType::Validate => "validate",
            StepType::Branch => "branch",
            StepType::Loop => "loop",
            StepType::Subworkflow => "subworkflow",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Skip marker
// ---------------------------------------------------------------------------

/// Output value recorded for steps that were skipped (falsy `when`, branch
/// with no matching option).
pub fn skip_marker() -> Value {
    json!({ "_skipped": true })
}

/// Check whether a step output is the skip marker.
pub fn is_skip_marker(value: &Value) -> bool {
    value
        .get("_skipped")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// The record of a single step's execution. Immutable once finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name, matching its step record.
    pub name: String,
    /// Variant tag of the step that produced this result.
    pub step_type: StepType,
    /// Whether the step succeeded.
    pub success: bool,
    /// Output value. For control-flow steps this is a structured summary;
    /// for leaf steps it is the action/agent/generator return.
    #[serde(default)]
    pub output: Value,
    /// Error message; present iff the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Nested step results, for control-flow steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Vec<StepResult>>,
}

impl StepResult {
    /// A successful result.
    pub fn success(
        name: impl Into<String>,
        step_type: StepType,
        output: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: true,
            output,
            error: None,
            duration_ms,
            nested: None,
        }
    }

    /// A failed result.
    pub fn failure(
        name: impl Into<String>,
        step_type: StepType,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms,
            nested: None,
        }
    }

    /// A successful result whose output is the skip marker.
    pub fn skipped(name: impl Into<String>, step_type: StepType) -> Self {
        Self::success(name, step_type, skip_marker(), 0)
    }

    /// Whether this result records a skipped step.
    pub fn is_skipped(&self) -> bool {
        is_skip_marker(&self.output)
    }

    /// Attach nested step results (control-flow steps).
    pub fn with_nested(mut self, nested: Vec<StepResult>) -> Self {
        self.nested = Some(nested);
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowResult
// ---------------------------------------------------------------------------

/// The final result of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Name of the workflow that ran.
    pub workflow_name: String,
    /// True iff every executed step succeeded.
    pub success: bool,
    /// All top-level step results, in execution order.
    pub step_results: Vec<StepResult>,
    /// Output of the last executed step (null when no step ran).
    pub final_output: Value,
    /// Aggregate wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl WorkflowResult {
    /// The first failing step result, if any.
    pub fn first_failure(&self) -> Option<&StepResult> {
        self.step_results.iter().find(|r| !r.success)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
