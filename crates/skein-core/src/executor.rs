//! Step executor: dispatch from a step record to its concrete execution.
//!
//! The executor owns the per-step lifecycle: evaluate the `when` gate,
//! measure wall-clock duration, emit the `StepStarted`/`StepCompleted`
//! event pair, dispatch on the step variant, and insert the finished
//! `StepResult` into the context before the next sibling runs. Every
//! failure mode is folded into a failed `StepResult`; the executor itself
//! never returns an error.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::Value;

use skein_types::event::WorkflowEvent;
use skein_types::result::StepResult;
use skein_types::workflow::{ContextSpec, StepRecord, effective_concurrency};

use crate::checkpoint::LoopProgress;
use crate::context::WorkflowContext;
use crate::events::EventCallback;
use crate::expression::{self, parse_expression};
use crate::handlers;
use crate::registry::ComponentRegistry;

/// Resume coordinates for a loop step restored from a checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct LoopResume {
    /// Iterations below this index are pre-marked as skipped.
    pub iteration_index: usize,
    /// Within the resume iteration, nested steps at or below this index are
    /// skipped (their result slots receive null placeholders).
    pub after_nested_step_index: Option<usize>,
}

/// Hook the loop handler invokes as iterations complete. The runner wires
/// this to its checkpoint store so partial loop progress is persisted and
/// a crash mid-loop can resume at the first incomplete iteration.
pub type ProgressHook = Arc<dyn Fn(LoopProgress) -> BoxFuture<'static, ()> + Send + Sync>;

/// Outcome of a variant handler, before the executor wraps it into a
/// `StepResult`.
pub(crate) struct HandlerResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub nested: Option<Vec<StepResult>>,
}

impl HandlerResult {
    pub(crate) fn ok(output: Value) -> Self {
        Self { success: true, output, error: None, nested: None }
    }

    pub(crate) fn ok_with_nested(output: Value, nested: Vec<StepResult>) -> Self {
        Self { success: true, output, error: None, nested: Some(nested) }
    }

    pub(crate) fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            nested: None,
        }
    }
}

/// Invoke the callback if one is present.
pub(crate) async fn emit(callback: &Option<EventCallback>, event: WorkflowEvent) {
    if let Some(callback) = callback {
        callback(event).await;
    }
}

/// Dispatches step records to their handlers.
///
/// Shared behind `Arc` so loop handlers can clone it into spawned
/// iteration tasks.
pub struct StepExecutor {
    registry: Arc<ComponentRegistry>,
    /// Workflow-level default validation stages (the document's
    /// `validation_stages` field).
    default_stages: Option<Vec<String>>,
}

impl StepExecutor {
    pub fn new(registry: Arc<ComponentRegistry>, default_stages: Option<Vec<String>>) -> Self {
        Self { registry, default_stages }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub(crate) fn default_stages(&self) -> Option<&[String]> {
        self.default_stages.as_deref()
    }

    /// Execute one step against the context.
    pub fn execute<'a>(
        self: &'a Arc<Self>,
        step: &'a StepRecord,
        ctx: &'a mut WorkflowContext,
        callback: Option<EventCallback>,
    ) -> BoxFuture<'a, StepResult> {
        self.execute_with_resume(step, ctx, callback, None, None)
    }

    /// Execute one step, threading loop-resume coordinates restored from a
    /// checkpoint and a progress hook invoked as loop iterations complete.
    /// Non-loop steps ignore both.
    pub fn execute_with_resume<'a>(
        self: &'a Arc<Self>,
        step: &'a StepRecord,
        ctx: &'a mut WorkflowContext,
        callback: Option<EventCallback>,
        resume: Option<LoopResume>,
        progress: Option<ProgressHook>,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let name = step.name().to_string();
            let step_type = step.step_type();

            // The `when` gate runs before any event is emitted: a skipped
            // step produces no StepStarted/StepCompleted pair.
            if let Some(when) = step.when() {
                match evaluate_condition(when, ctx) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(step = name.as_str(), "step skipped by when condition");
                        let result = StepResult::skipped(&name, step_type);
                        ctx.store_result(result.clone());
                        return result;
                    }
                    Err(message) => {
                        let result = StepResult::failure(&name, step_type, message, 0);
                        ctx.store_result(result.clone());
                        return result;
                    }
                }
            }

            let started = Instant::now();
            emit(
                &callback,
                WorkflowEvent::StepStarted {
                    step_name: name.clone(),
                    step_type,
                    step_path: name.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await;

            let dispatched = match step {
                StepRecord::Python { action, kwargs, .. } => {
                    self.run_action(action, kwargs, ctx).await
                }
                StepRecord::Agent { agent, context, .. } => {
                    self.run_agent(agent, context, ctx).await
                }
                StepRecord::Generate { generator, context, .. } => {
                    self.run_generate(generator, context, ctx).await
                }
                StepRecord::Validate { stages, retry, on_failure, .. } => {
                    handlers::validate::execute(
                        self,
                        &name,
                        stages.as_ref(),
                        *retry,
                        on_failure.as_deref(),
                        ctx,
                        callback.clone(),
                    )
                    .await
                }
                StepRecord::Branch { options, .. } => {
                    handlers::branch::execute(self, options, ctx, callback.clone()).await
                }
                StepRecord::Loop { steps, for_each, max_concurrency, parallel, .. } => {
                    handlers::loop_step::execute(
                        self,
                        &name,
                        steps,
                        for_each.as_deref(),
                        effective_concurrency(*parallel, *max_concurrency),
                        ctx,
                        callback.clone(),
                        resume,
                        progress,
                    )
                    .await
                }
                StepRecord::Subworkflow { workflow, inputs, .. } => {
                    handlers::subworkflow::execute(
                        self,
                        &name,
                        workflow,
                        inputs,
                        ctx,
                        callback.clone(),
                    )
                    .await
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            emit(
                &callback,
                WorkflowEvent::StepCompleted {
                    step_name: name.clone(),
                    step_type,
                    success: dispatched.success,
                    duration_ms,
                    error: dispatched.error.clone(),
                    step_path: name.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await;

            tracing::debug!(
                step = name.as_str(),
                step_type = %step_type,
                success = dispatched.success,
                duration_ms,
                "step completed"
            );

            let result = StepResult {
                name,
                step_type,
                success: dispatched.success,
                output: dispatched.output,
                error: dispatched.error,
                duration_ms,
                nested: dispatched.nested,
            };
            ctx.store_result(result.clone());
            result
        })
    }

    // -- leaf steps ---------------------------------------------------------

    async fn run_action(
        &self,
        action: &str,
        kwargs: &serde_json::Map<String, Value>,
        ctx: &WorkflowContext,
    ) -> HandlerResult {
        let resolved = match expression::resolve_map(kwargs, ctx) {
            Ok(resolved) => resolved,
            Err(e) => return HandlerResult::fail(e.to_string()),
        };
        let Some(action_fn) = self.registry.action(action) else {
            return HandlerResult::fail(format!("unknown action '{action}'"));
        };
        match action_fn(resolved).await {
            Ok(output) => HandlerResult::ok(output),
            Err(e) => HandlerResult::fail(e.to_string()),
        }
    }

    async fn run_agent(
        &self,
        agent: &str,
        context: &ContextSpec,
        ctx: &WorkflowContext,
    ) -> HandlerResult {
        let resolved = match self.resolve_context(context, ctx) {
            Ok(resolved) => resolved,
            Err(message) => return HandlerResult::fail(message),
        };
        let Some(agent_obj) = self.registry.agent(agent) else {
            return HandlerResult::fail(format!("unknown agent '{agent}'"));
        };
        match agent_obj.execute(resolved).await {
            Ok(output) => HandlerResult::ok(output),
            Err(e) => HandlerResult::fail(e.to_string()),
        }
    }

    async fn run_generate(
        &self,
        generator: &str,
        context: &ContextSpec,
        ctx: &WorkflowContext,
    ) -> HandlerResult {
        let resolved = match self.resolve_context(context, ctx) {
            Ok(resolved) => resolved,
            Err(message) => return HandlerResult::fail(message),
        };
        let Some(generator_obj) = self.registry.generator(generator) else {
            return HandlerResult::fail(format!("unknown generator '{generator}'"));
        };
        match generator_obj.generate(resolved).await {
            Ok(text) => HandlerResult::ok(Value::String(text)),
            Err(e) => HandlerResult::fail(e.to_string()),
        }
    }

    /// Resolve an agent/generator context specification: a static map goes
    /// through the template resolver, a builder key is invoked with
    /// `(inputs, step_results)`.
    fn resolve_context(
        &self,
        spec: &ContextSpec,
        ctx: &WorkflowContext,
    ) -> Result<serde_json::Map<String, Value>, String> {
        match spec {
            ContextSpec::Static(map) => {
                expression::resolve_map(map, ctx).map_err(|e| e.to_string())
            }
            ContextSpec::Builder(name) => {
                let Some(builder) = self.registry.context_builder(name) else {
                    return Err(format!("unknown context builder '{name}'"));
                };
                builder(&ctx.inputs, &ctx.results)
                    .map_err(|e| format!("context builder '{name}' failed: {e}"))
            }
        }
    }
}

/// Evaluate a `when` condition to a boolean. Errors are rendered into the
/// message that fails the enclosing step.
pub(crate) fn evaluate_condition(when: &str, ctx: &WorkflowContext) -> Result<bool, String> {
    let parsed = match expression::is_single_template(when) {
        Some(inner) => parse_expression(inner),
        None => parse_expression(when),
    }
    .map_err(|e| format!("invalid when condition: {e}"))?;
    let value = expression::evaluate(&parsed, ctx)
        .map_err(|e| format!("when condition failed: {e}"))?;
    Ok(expression::truthy(&value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
