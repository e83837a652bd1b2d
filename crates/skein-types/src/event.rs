//! Lifecycle events emitted by the workflow engine.
//!
//! Every event carries a hierarchical `step_path` (slash-joined, composed by
//! prefix-wrapping callbacks as execution descends into loops and
//! subworkflows) and a UTC timestamp. Under parallel loop execution events
//! may arrive out of order; `iteration_index` is the canonical ordering for
//! loop events, so consumers needing a deterministic presentation sort by
//! `(step_name, iteration_index)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::StepType;

/// A lifecycle event with a stable discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_name: String,
        total_steps: usize,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_name: String,
        success: bool,
        total_duration_ms: u64,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    ValidationStarted {
        workflow_name: String,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    ValidationCompleted {
        workflow_name: String,
        success: bool,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    PreflightStarted {
        workflow_name: String,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    PreflightCompleted {
        workflow_name: String,
        success: bool,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        step_name: String,
        step_type: StepType,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        step_name: String,
        step_type: StepType,
        success: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    LoopIterationStarted {
        step_name: String,
        iteration_index: usize,
        total_iterations: usize,
        item_label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_step_name: Option<String>,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
    LoopIterationCompleted {
        step_name: String,
        iteration_index: usize,
        success: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        step_path: String,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// The event's hierarchical step path.
    pub fn step_path(&self) -> &str {
        match self {
            WorkflowEvent::WorkflowStarted { step_path, .. }
            | WorkflowEvent::WorkflowCompleted { step_path, .. }
            | WorkflowEvent::ValidationStarted { step_path, .. }
            | WorkflowEvent::ValidationCompleted { step_path, .. }
            | WorkflowEvent::PreflightStarted { step_path, .. }
            | WorkflowEvent::PreflightCompleted { step_path, .. }
            | WorkflowEvent::StepStarted { step_path, .. }
            | WorkflowEvent::StepCompleted { step_path, .. }
            | WorkflowEvent::LoopIterationStarted { step_path, .. }
            | WorkflowEvent::LoopIterationCompleted { step_path, .. } => step_path,
        }
    }

    fn step_path_mut(&mut self) -> &mut String {
        match self {
            WorkflowEvent::WorkflowStarted { step_path, .. }
            | WorkflowEvent::WorkflowCompleted { step_path, .. }
            | WorkflowEvent::ValidationStarted { step_path, .. }
            | WorkflowEvent::ValidationCompleted { step_path, .. }
            | WorkflowEvent::PreflightStarted { step_path, .. }
            | WorkflowEvent::PreflightCompleted { step_path, .. }
            | WorkflowEvent::StepStarted { step_path, .. }
            | WorkflowEvent::StepCompleted { step_path, .. }
            | WorkflowEvent::LoopIterationStarted { step_path, .. }
            | WorkflowEvent::LoopIterationCompleted { step_path, .. } => step_path,
        }
    }

    /// Return the event with `prefix` prepended to its step path.
    ///
    /// Used by the prefix-wrapping callbacks that compose hierarchical
    /// paths like `implement_by_phase/[0]/implement_phase`.
    pub fn with_path_prefix(mut self, prefix: &str) -> Self {
        let path = self.step_path_mut();
        if path.is_empty() {
            *path = prefix.to_string();
        } else {
            *path = format!("{prefix}/{path}");
        }
        self
    }

    /// Stable discriminator name, as used in the wire format.
    pub fn discriminator(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
            WorkflowEvent::ValidationStarted { .. } => "validation_started",
            WorkflowEvent::ValidationCompleted { .. } => "validation_completed",
            WorkflowEvent::PreflightStarted { .. } => "preflight_started",
            WorkflowEvent::PreflightCompleted { .. } => "preflight_completed",
            WorkflowEvent::StepStarted { .. } => "step_started",
            WorkflowEvent::StepCompleted { .. } => "step_completed",
            WorkflowEvent::LoopIterationStarted { .. } => "loop_iteration_started",
            WorkflowEvent::LoopIterationCompleted { .. } => "loop_iteration_completed",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
