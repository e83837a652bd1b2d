//! Workflow runner: top-level orchestration of a run.
//!
//! Order of operations: semantic validation, input binding, lifecycle
//! events, sequential execution of the top-level steps with
//! stop-on-failure, rollbacks in reverse registration order on failure, a
//! checkpoint after every completed step, and final result assembly. If
//! preflight or binding fails, no step ever starts.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use skein_types::event::WorkflowEvent;
use skein_types::result::{StepResult, WorkflowResult};
use skein_types::workflow::{StepRecord, Workflow};

use crate::checkpoint::{Checkpoint, CheckpointStore, LoopProgress};
use crate::config::ValidationConfig;
use crate::context::WorkflowContext;
use crate::error::EngineError;
use crate::events::EventCallback;
use crate::executor::{LoopResume, ProgressHook, StepExecutor, emit};
use crate::preflight;
use crate::registry::ComponentRegistry;

/// Top-level workflow orchestrator.
pub struct WorkflowRunner {
    registry: Arc<ComponentRegistry>,
    config: Option<Arc<dyn ValidationConfig>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl WorkflowRunner {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry, config: None, checkpoint_store: None }
    }

    /// Attach the validation config handed to Validate steps.
    pub fn with_config(mut self, config: Arc<dyn ValidationConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub(crate) fn with_config_option(mut self, config: Option<Arc<dyn ValidationConfig>>) -> Self {
        self.config = config;
        self
    }

    /// Attach a checkpoint store; a checkpoint is saved after each
    /// completed top-level step and cleared on success.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Execute a workflow from the beginning.
    pub async fn run(
        &self,
        workflow: &Workflow,
        caller_inputs: serde_json::Map<String, Value>,
        callback: Option<EventCallback>,
    ) -> Result<WorkflowResult, EngineError> {
        let run_id = Uuid::now_v7();
        let started = std::time::Instant::now();

        // Semantic validation: unknown references, expression syntax,
        // subworkflow cycles.
        emit(
            &callback,
            WorkflowEvent::ValidationStarted {
                workflow_name: workflow.name.clone(),
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;
        let validation = preflight::validate_workflow(workflow, &self.registry);
        emit(
            &callback,
            WorkflowEvent::ValidationCompleted {
                workflow_name: workflow.name.clone(),
                success: validation.is_ok(),
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;
        validation?;

        // Input binding: defaults, required checks, type checks.
        emit(
            &callback,
            WorkflowEvent::PreflightStarted {
                workflow_name: workflow.name.clone(),
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;
        let binding = bind_inputs(workflow, caller_inputs);
        emit(
            &callback,
            WorkflowEvent::PreflightCompleted {
                workflow_name: workflow.name.clone(),
                success: binding.is_ok(),
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;
        let bound_inputs = binding?;

        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            steps = workflow.steps.len(),
            "starting workflow execution"
        );

        let mut ctx = WorkflowContext::new(bound_inputs.clone(), self.config.clone());
        let state = self
            .drive_steps(workflow, &mut ctx, bound_inputs, 0, Vec::new(), None, callback.clone())
            .await;
        self.finish(workflow, state, callback, started).await
    }

    /// Resume a workflow from a checkpoint: completed steps are restored
    /// into the context and skipped; an interrupted loop picks up from its
    /// recorded iteration.
    pub async fn resume(
        &self,
        workflow: &Workflow,
        checkpoint: Checkpoint,
        callback: Option<EventCallback>,
    ) -> Result<WorkflowResult, EngineError> {
        let started = std::time::Instant::now();

        emit(
            &callback,
            WorkflowEvent::ValidationStarted {
                workflow_name: workflow.name.clone(),
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;
        let validation = preflight::validate_workflow(workflow, &self.registry);
        emit(
            &callback,
            WorkflowEvent::ValidationCompleted {
                workflow_name: workflow.name.clone(),
                success: validation.is_ok(),
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;
        validation?;

        tracing::info!(
            workflow = workflow.name.as_str(),
            step_index = checkpoint.step_index,
            completed = checkpoint.completed.len(),
            "resuming workflow from checkpoint"
        );

        let mut ctx = WorkflowContext::new(checkpoint.inputs.clone(), self.config.clone());
        for result in &checkpoint.completed {
            ctx.store_result(result.clone());
        }

        let resume = checkpoint.loop_progress.map(|progress| LoopResume {
            iteration_index: progress.iteration_index,
            after_nested_step_index: progress.nested_step_index,
        });

        let runner_state = self
            .drive_steps(
                workflow,
                &mut ctx,
                checkpoint.inputs.clone(),
                checkpoint.step_index,
                checkpoint.completed,
                resume,
                callback.clone(),
            )
            .await;

        self.finish(workflow, runner_state, callback, started).await
    }

    /// Walk the top-level steps from `start_index`, seeded with the results
    /// completed before a resume point so checkpoints written along the way
    /// stay complete.
    #[allow(clippy::too_many_arguments)]
    async fn drive_steps(
        &self,
        workflow: &Workflow,
        ctx: &mut WorkflowContext,
        inputs: serde_json::Map<String, Value>,
        start_index: usize,
        prior_results: Vec<StepResult>,
        resume: Option<LoopResume>,
        callback: Option<EventCallback>,
    ) -> RunState {
        emit(
            &callback,
            WorkflowEvent::WorkflowStarted {
                workflow_name: workflow.name.clone(),
                total_steps: workflow.steps.len(),
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;

        let executor = Arc::new(StepExecutor::new(
            Arc::clone(&self.registry),
            workflow.validation_stages.clone(),
        ));

        let mut step_results = prior_results;
        let mut success = true;

        for (index, step) in workflow.steps.iter().enumerate().skip(start_index) {
            let step_resume = if index == start_index { resume } else { None };
            // Loop steps get a hook that checkpoints partial iteration
            // progress, so a crash mid-loop resumes at the first
            // incomplete iteration instead of restarting the loop.
            let progress_hook = if matches!(step, StepRecord::Loop { .. }) {
                self.loop_progress_hook(workflow, index, &step_results, &inputs)
            } else {
                None
            };
            let result = executor
                .execute_with_resume(step, ctx, callback.clone(), step_resume, progress_hook)
                .await;
            let step_succeeded = result.success;
            step_results.push(result);

            if step_succeeded {
                self.save_checkpoint(workflow, index + 1, &step_results, &inputs).await;
            } else {
                // Stop-on-failure: siblings after a failed step never run.
                tracing::warn!(
                    workflow = workflow.name.as_str(),
                    step = step.name(),
                    "step failed; stopping workflow and running rollbacks"
                );
                run_rollbacks(ctx).await;
                success = false;
                break;
            }
        }

        RunState { step_results, success }
    }

    async fn finish(
        &self,
        workflow: &Workflow,
        state: RunState,
        callback: Option<EventCallback>,
        started: std::time::Instant,
    ) -> Result<WorkflowResult, EngineError> {
        let duration_ms = started.elapsed().as_millis() as u64;

        if state.success {
            if let Some(store) = &self.checkpoint_store {
                if let Err(e) = store.clear(&workflow.name).await {
                    tracing::warn!(
                        workflow = workflow.name.as_str(),
                        error = %e,
                        "failed to clear checkpoint after successful run"
                    );
                }
            }
        }

        emit(
            &callback,
            WorkflowEvent::WorkflowCompleted {
                workflow_name: workflow.name.clone(),
                success: state.success,
                total_duration_ms: duration_ms,
                step_path: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;

        tracing::info!(
            workflow = workflow.name.as_str(),
            success = state.success,
            duration_ms,
            "workflow completed"
        );

        let final_output = state
            .step_results
            .last()
            .map(|result| result.output.clone())
            .unwrap_or(Value::Null);

        Ok(WorkflowResult {
            workflow_name: workflow.name.clone(),
            success: state.success,
            step_results: state.step_results,
            final_output,
            duration_ms,
        })
    }

    /// Build the progress hook for an in-progress loop step: every report
    /// persists a checkpoint pointing at that step with the loop's partial
    /// progress attached.
    fn loop_progress_hook(
        &self,
        workflow: &Workflow,
        step_index: usize,
        completed: &[StepResult],
        inputs: &serde_json::Map<String, Value>,
    ) -> Option<ProgressHook> {
        let store = Arc::clone(self.checkpoint_store.as_ref()?);
        let workflow_name = workflow.name.clone();
        let completed = completed.to_vec();
        let inputs = inputs.clone();
        Some(Arc::new(move |progress: LoopProgress| {
            let checkpoint = Checkpoint {
                workflow_name: workflow_name.clone(),
                step_index,
                completed: completed.clone(),
                inputs: inputs.clone(),
                loop_progress: Some(progress),
                created_at: Utc::now(),
            };
            let store = Arc::clone(&store);
            Box::pin(async move {
                if let Err(e) = store.save(&checkpoint).await {
                    tracing::warn!(
                        workflow = checkpoint.workflow_name.as_str(),
                        error = %e,
                        "failed to save loop progress checkpoint; continuing"
                    );
                }
            })
        }))
    }

    async fn save_checkpoint(
        &self,
        workflow: &Workflow,
        next_step_index: usize,
        completed: &[StepResult],
        inputs: &serde_json::Map<String, Value>,
    ) {
        let Some(store) = &self.checkpoint_store else {
            return;
        };
        let checkpoint = Checkpoint {
            workflow_name: workflow.name.clone(),
            step_index: next_step_index,
            completed: completed.to_vec(),
            inputs: inputs.clone(),
            loop_progress: None,
            created_at: Utc::now(),
        };
        if let Err(e) = store.save(&checkpoint).await {
            tracing::warn!(
                workflow = workflow.name.as_str(),
                error = %e,
                "failed to save checkpoint; continuing"
            );
        }
    }
}

struct RunState {
    step_results: Vec<StepResult>,
    success: bool,
}

/// Execute registered rollbacks in reverse registration order. Rollback
/// errors are logged and suppressed; teardown always proceeds.
async fn run_rollbacks(ctx: &mut WorkflowContext) {
    let rollbacks = ctx.take_rollbacks();
    for registration in rollbacks.into_iter().rev() {
        tracing::info!(step = registration.step_name.as_str(), "running rollback");
        if let Err(e) = (registration.action)().await {
            tracing::warn!(
                step = registration.step_name.as_str(),
                error = %e,
                "rollback failed; continuing with remaining rollbacks"
            );
        }
    }
}

/// Bind caller inputs against the workflow's declarations: apply defaults,
/// enforce `required`, type-check every value, and reject undeclared
/// inputs. An optional input with no default stays absent (distinct from
/// null).
fn bind_inputs(
    workflow: &Workflow,
    caller_inputs: serde_json::Map<String, Value>,
) -> Result<serde_json::Map<String, Value>, EngineError> {
    for key in caller_inputs.keys() {
        if !workflow.inputs.contains_key(key) {
            return Err(EngineError::InputBinding(format!(
                "unknown input '{key}' (not declared by workflow '{}')",
                workflow.name
            )));
        }
    }

    let mut bound = serde_json::Map::new();
    for (name, decl) in &workflow.inputs {
        match caller_inputs.get(name) {
            Some(value) => {
                if !decl.input_type.matches(value) {
                    return Err(EngineError::InputBinding(format!(
                        "input '{name}' expected {}, got {}",
                        decl.input_type.as_str(),
                        json_type_name(value)
                    )));
                }
                bound.insert(name.clone(), value.clone());
            }
            None => match &decl.default {
                Some(default) => {
                    bound.insert(name.clone(), default.clone());
                }
                None if decl.required => {
                    return Err(EngineError::InputBinding(format!(
                        "missing required input '{name}'"
                    )));
                }
                None => {}
            },
        }
    }
    Ok(bound)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skein_types::workflow::{InputDecl, InputType};
    use std::collections::HashMap;

    fn workflow_with_inputs(inputs: HashMap<String, InputDecl>) -> Workflow {
        let mut workflow: Workflow = serde_json::from_value(json!({
            "version": "1.0",
            "name": "bind-test",
            "steps": [{"name": "only", "type": "python", "action": "noop"}]
        }))
        .unwrap();
        workflow.inputs = inputs;
        workflow
    }

    fn decl(input_type: InputType, required: bool, default: Option<Value>) -> InputDecl {
        InputDecl { input_type, required, default, description: None }
    }

    #[test]
    fn binds_with_defaults_and_absent_optionals() {
        let workflow = workflow_with_inputs(HashMap::from([
            ("given".to_string(), decl(InputType::String, true, None)),
            ("defaulted".to_string(), decl(InputType::Integer, false, Some(json!(5)))),
            ("absent".to_string(), decl(InputType::Boolean, false, None)),
        ]));

        let bound = bind_inputs(
            &workflow,
            [("given".to_string(), json!("x"))].into_iter().collect(),
        )
        .unwrap();

        assert_eq!(bound.get("given"), Some(&json!("x")));
        assert_eq!(bound.get("defaulted"), Some(&json!(5)));
        // Absent, not null: the key simply does not exist.
        assert!(!bound.contains_key("absent"));
    }

    #[test]
    fn missing_required_input_is_rejected() {
        let workflow = workflow_with_inputs(HashMap::from([(
            "branch".to_string(),
            decl(InputType::String, true, None),
        )]));
        let err = bind_inputs(&workflow, serde_json::Map::new()).unwrap_err();
        assert!(err.to_string().contains("missing required input 'branch'"));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let workflow = workflow_with_inputs(HashMap::from([(
            "count".to_string(),
            decl(InputType::Integer, true, None),
        )]));
        let err = bind_inputs(
            &workflow,
            [("count".to_string(), json!("three"))].into_iter().collect(),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expected integer"), "got: {msg}");
        assert!(msg.contains("got string"), "got: {msg}");
    }

    #[test]
    fn undeclared_input_is_rejected() {
        let workflow = workflow_with_inputs(HashMap::new());
        let err = bind_inputs(
            &workflow,
            [("typo".to_string(), json!(1))].into_iter().collect(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown input 'typo'"));
    }

    #[tokio::test]
    async fn rollbacks_execute_in_reverse_order_and_swallow_errors() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ctx = WorkflowContext::new(serde_json::Map::new(), None);

        for name in ["allocate", "configure", "publish"] {
            let order = Arc::clone(&order);
            ctx.register_rollback(
                name,
                Box::new(move || {
                    Box::pin(async move {
                        order.lock().unwrap().push(name.to_string());
                        if name == "configure" {
                            anyhow::bail!("rollback '{name}' broke");
                        }
                        Ok(())
                    })
                }),
            );
        }

        run_rollbacks(&mut ctx).await;

        // Last registered runs first; the failing one does not stop the rest.
        assert_eq!(
            *order.lock().unwrap(),
            vec!["publish", "configure", "allocate"]
        );
    }

    #[test]
    fn float_is_not_an_integer() {
        let workflow = workflow_with_inputs(HashMap::from([(
            "count".to_string(),
            decl(InputType::Integer, true, None),
        )]));
        let err = bind_inputs(
            &workflow,
            [("count".to_string(), json!(1.5))].into_iter().collect(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected integer"));
    }
}
