//! Loop step handler: iteration with bounded concurrency and fail-fast.
//!
//! Two modes share one machinery:
//! - **task-set** (no `for_each`): the loop's inner steps are the tasks,
//!   one per step, each against its own derived context;
//! - **for-each**: the `for_each` expression yields an array; each item
//!   gets a derived context with `item`/`index` and a private results view,
//!   and the inner steps run sequentially within that iteration.
//!
//! Concurrency is a semaphore sized to the effective value (0 means
//! unbounded). Sequential loops (effective concurrency 1) run inline so
//! index order is exact. Fail-fast is a shared cancellation token: a
//! failing iteration cancels it, not-yet-started iterations observe it and
//! short-circuit, in-flight iterations are left to finish naturally.
//!
//! Result slots are pre-allocated and keyed by iteration index, so the
//! loop's output preserves input order no matter the completion order.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use skein_types::event::WorkflowEvent;
use skein_types::result::StepResult;
use skein_types::workflow::StepRecord;

use crate::checkpoint::LoopProgress;
use crate::context::WorkflowContext;
use crate::error::LoopStepError;
use crate::events::{EventCallback, EventCollector, prefix_callback};
use crate::executor::{HandlerResult, LoopResume, ProgressHook, StepExecutor};
use crate::expression::{self, parse_for_each};

/// Outcome of one iteration, stored in its pre-allocated slot.
enum IterationOutcome {
    /// All nested steps ran; `outputs[i]` is nested step i's output (with
    /// null placeholders for steps skipped on resume).
    Completed { outputs: Vec<Value>, results: Vec<StepResult> },
    /// A nested step failed; the iteration stopped there.
    Failed { error: String, results: Vec<StepResult> },
    /// Short-circuited by the fail-fast signal before starting.
    Skipped,
    /// Pre-marked as completed-before-checkpoint; emits no events.
    ResumeSkipped,
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn execute(
    executor: &Arc<StepExecutor>,
    step_name: &str,
    steps: &[StepRecord],
    for_each: Option<&str>,
    concurrency: u32,
    ctx: &mut WorkflowContext,
    callback: Option<EventCallback>,
    resume: Option<LoopResume>,
    progress: Option<ProgressHook>,
) -> HandlerResult {
    // Iteration events always have somewhere to go: the caller's callback,
    // or the engine's lock-guarded in-memory accumulator.
    let local_events = EventCollector::new();
    let had_callback = callback.is_some();
    let sink = callback.unwrap_or_else(|| local_events.callback());
    // Events emitted by iterations carry paths under this loop's name.
    let loop_cb = prefix_callback(step_name, sink);

    let outcome = if let Some(spec) = for_each {
        run_for_each(
            executor,
            step_name,
            steps,
            spec,
            concurrency,
            ctx,
            &loop_cb,
            resume,
            progress.as_ref(),
        )
        .await
    } else {
        run_task_set(executor, step_name, steps, concurrency, ctx, &loop_cb).await
    };

    if !had_callback && !local_events.is_empty() {
        tracing::debug!(
            step = step_name,
            events = local_events.len(),
            "loop ran without an event sink; iteration events were accumulated locally"
        );
    }

    match outcome {
        Ok((results, step_results)) => {
            HandlerResult::ok_with_nested(Value::Array(results), step_results)
        }
        Err(message) => HandlerResult::fail(message),
    }
}

/// Derive a human-readable label from a for_each item.
///
/// Map items are probed for the common label keys in preference order;
/// string items label themselves; anything else falls back to a 1-based
/// generic label.
fn extract_item_label(item: &Value, index: usize) -> String {
    if let Some(map) = item.as_object() {
        for key in ["label", "name", "title", "phase", "id"] {
            if let Some(value) = map.get(key) {
                return expression::canonical_string(value);
            }
        }
    }
    if let Some(text) = item.as_str() {
        return text.to_string();
    }
    format!("Item {}", index + 1)
}

// ---------------------------------------------------------------------------
// for_each mode
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn run_for_each(
    executor: &Arc<StepExecutor>,
    step_name: &str,
    steps: &[StepRecord],
    spec: &str,
    concurrency: u32,
    ctx: &mut WorkflowContext,
    loop_cb: &EventCallback,
    resume: Option<LoopResume>,
    progress: Option<&ProgressHook>,
) -> Result<(Vec<Value>, Vec<StepResult>), String> {
    let expr = parse_for_each(spec).map_err(|e| format!("invalid for_each expression: {e}"))?;
    let value = expression::evaluate(&expr, ctx)
        .map_err(|e| format!("for_each expression failed: {e}"))?;
    let Value::Array(items) = value else {
        return Err(format!(
            "for_each expression must evaluate to an array, got {}",
            type_name(&value)
        ));
    };

    if items.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let total = items.len();
    if let Some(r) = &resume {
        tracing::info!(
            step = step_name,
            iteration = r.iteration_index,
            nested_step = ?r.after_nested_step_index,
            "resuming loop from checkpoint"
        );
    }

    // Nested loops read the enclosing loop's name from the context; save
    // and restore around the whole loop body.
    let parent_loop = ctx.current_loop.replace(step_name.to_string());

    let failure = CancellationToken::new();
    let steps_shared: Arc<Vec<StepRecord>> = Arc::new(steps.to_vec());
    let mut slots: Vec<Option<IterationOutcome>> = (0..total).map(|_| None).collect();
    // Checkpointable progress: the contiguous prefix of completed
    // iterations, reported each time it advances.
    let mut reported_prefix = 0usize;

    if concurrency == 1 {
        // Sequential mode runs inline so iteration order is exactly input
        // order and fail-fast short-circuits every later index.
        for (index, item) in items.into_iter().enumerate() {
            if let Some(outcome) = resume_skip(&resume, index) {
                slots[index] = Some(outcome);
                continue;
            }
            let label = extract_item_label(&item, index);
            let iter_ctx = ctx.for_iteration(item, index, step_name);
            let outcome = run_one_iteration(
                Arc::clone(executor),
                Arc::clone(&steps_shared),
                iter_ctx,
                index,
                total,
                label,
                parent_loop.clone(),
                step_name.to_string(),
                loop_cb.clone(),
                failure.clone(),
                skip_through(&resume, index),
            )
            .await;
            slots[index] = Some(outcome);
            report_progress(progress, &slots, &mut reported_prefix).await;
        }
    } else {
        let semaphore = (concurrency > 0).then(|| Arc::new(Semaphore::new(concurrency as usize)));
        let mut join_set: JoinSet<(usize, IterationOutcome)> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            if let Some(outcome) = resume_skip(&resume, index) {
                slots[index] = Some(outcome);
                continue;
            }
            let label = extract_item_label(&item, index);
            let iter_ctx = ctx.for_iteration(item, index, step_name);
            let executor = Arc::clone(executor);
            let steps = Arc::clone(&steps_shared);
            let loop_cb = loop_cb.clone();
            let failure = failure.clone();
            let semaphore = semaphore.clone();
            let parent_loop = parent_loop.clone();
            let step_name = step_name.to_string();
            let skip = skip_through(&resume, index);

            join_set.spawn(async move {
                let _permit = match &semaphore {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                let outcome = run_one_iteration(
                    executor, steps, iter_ctx, index, total, label, parent_loop, step_name,
                    loop_cb, failure, skip,
                )
                .await;
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    slots[index] = Some(outcome);
                    report_progress(progress, &slots, &mut reported_prefix).await;
                }
                Err(e) => {
                    ctx.current_loop = parent_loop;
                    return Err(format!("loop iteration task failed to join: {e}"));
                }
            }
        }
    }

    ctx.current_loop = parent_loop;
    collect(step_name, slots, total, |outputs| Value::Array(outputs))
}

// ---------------------------------------------------------------------------
// task-set mode
// ---------------------------------------------------------------------------

async fn run_task_set(
    executor: &Arc<StepExecutor>,
    step_name: &str,
    steps: &[StepRecord],
    concurrency: u32,
    ctx: &mut WorkflowContext,
    loop_cb: &EventCallback,
) -> Result<(Vec<Value>, Vec<StepResult>), String> {
    if steps.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let total = steps.len();
    let parent_loop = ctx.current_loop.replace(step_name.to_string());
    let failure = CancellationToken::new();
    let mut slots: Vec<Option<IterationOutcome>> = (0..total).map(|_| None).collect();

    if concurrency == 1 {
        for (index, step) in steps.iter().enumerate() {
            let task_ctx = ctx.for_task(step_name);
            let outcome = run_one_task(
                Arc::clone(executor),
                step.clone(),
                task_ctx,
                index,
                total,
                parent_loop.clone(),
                step_name.to_string(),
                loop_cb.clone(),
                failure.clone(),
            )
            .await;
            slots[index] = Some(outcome);
        }
    } else {
        let semaphore = (concurrency > 0).then(|| Arc::new(Semaphore::new(concurrency as usize)));
        let mut join_set: JoinSet<(usize, IterationOutcome)> = JoinSet::new();

        for (index, step) in steps.iter().enumerate() {
            let task_ctx = ctx.for_task(step_name);
            let executor = Arc::clone(executor);
            let step = step.clone();
            let loop_cb = loop_cb.clone();
            let failure = failure.clone();
            let semaphore = semaphore.clone();
            let parent_loop = parent_loop.clone();
            let step_name = step_name.to_string();

            join_set.spawn(async move {
                let _permit = match &semaphore {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                let outcome = run_one_task(
                    executor, step, task_ctx, index, total, parent_loop, step_name, loop_cb,
                    failure,
                )
                .await;
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => {
                    ctx.current_loop = parent_loop;
                    return Err(format!("loop task failed to join: {e}"));
                }
            }
        }
    }

    ctx.current_loop = parent_loop;
    // Task-set results are the bare task outputs, one per task.
    collect(step_name, slots, total, |outputs| {
        outputs.into_iter().next().unwrap_or(Value::Null)
    })
}

// ---------------------------------------------------------------------------
// Shared machinery
// ---------------------------------------------------------------------------

fn resume_skip(resume: &Option<LoopResume>, index: usize) -> Option<IterationOutcome> {
    match resume {
        Some(r) if index < r.iteration_index => Some(IterationOutcome::ResumeSkipped),
        _ => None,
    }
}

/// Length of the contiguous prefix of finished iterations. Iterations
/// skipped at resume time count: they were completed before the
/// checkpoint being resumed from.
fn completed_prefix(slots: &[Option<IterationOutcome>]) -> usize {
    slots
        .iter()
        .take_while(|slot| {
            matches!(
                slot,
                Some(IterationOutcome::Completed { .. }) | Some(IterationOutcome::ResumeSkipped)
            )
        })
        .count()
}

/// Report the completed-iteration prefix through the progress hook when it
/// has advanced. The recorded index is the next iteration to run, which is
/// exactly the resume coordinate a later run needs.
async fn report_progress(
    progress: Option<&ProgressHook>,
    slots: &[Option<IterationOutcome>],
    reported_prefix: &mut usize,
) {
    let Some(hook) = progress else {
        return;
    };
    let prefix = completed_prefix(slots);
    if prefix > *reported_prefix {
        *reported_prefix = prefix;
        hook(LoopProgress { iteration_index: prefix, nested_step_index: None }).await;
    }
}

fn skip_through(resume: &Option<LoopResume>, index: usize) -> Option<usize> {
    resume
        .as_ref()
        .filter(|r| r.iteration_index == index)
        .and_then(|r| r.after_nested_step_index)
}

/// Run all nested steps for one for_each iteration, sequentially, emitting
/// the iteration event pair.
#[allow(clippy::too_many_arguments)]
async fn run_one_iteration(
    executor: Arc<StepExecutor>,
    steps: Arc<Vec<StepRecord>>,
    mut iter_ctx: WorkflowContext,
    index: usize,
    total: usize,
    label: String,
    parent_loop: Option<String>,
    step_name: String,
    loop_cb: EventCallback,
    failure: CancellationToken,
    skip_steps_through: Option<usize>,
) -> IterationOutcome {
    if failure.is_cancelled() {
        tracing::debug!(
            step = step_name.as_str(),
            index,
            "loop iteration skipped after earlier failure"
        );
        return IterationOutcome::Skipped;
    }

    loop_cb(WorkflowEvent::LoopIterationStarted {
        step_name: step_name.clone(),
        iteration_index: index,
        total_iterations: total,
        item_label: label,
        parent_step_name: parent_loop,
        step_path: format!("[{index}]"),
        timestamp: Utc::now(),
    })
    .await;

    let started = Instant::now();
    let iter_cb = prefix_callback(format!("[{index}]"), loop_cb.clone());

    let mut outputs = Vec::with_capacity(steps.len());
    let mut results = Vec::new();
    let mut error: Option<String> = None;

    for (step_index, nested) in steps.iter().enumerate() {
        if let Some(limit) = skip_steps_through {
            if step_index <= limit {
                tracing::debug!(
                    step = step_name.as_str(),
                    index,
                    nested_step = step_index,
                    "skipping nested step before resume point"
                );
                outputs.push(Value::Null);
                continue;
            }
        }

        let result = executor.execute(nested, &mut iter_ctx, Some(iter_cb.clone())).await;
        outputs.push(result.output.clone());
        let failed = !result.success;
        let message = result.error.clone();
        results.push(result);
        if failed {
            error = Some(message.unwrap_or_else(|| "step failed".to_string()));
            failure.cancel();
            break;
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    loop_cb(WorkflowEvent::LoopIterationCompleted {
        step_name: step_name.clone(),
        iteration_index: index,
        success: error.is_none(),
        duration_ms,
        error: error.clone(),
        step_path: format!("[{index}]"),
        timestamp: Utc::now(),
    })
    .await;

    match error {
        None => IterationOutcome::Completed { outputs, results },
        Some(error) => IterationOutcome::Failed { error, results },
    }
}

/// Run one task of a task-set loop, emitting the iteration event pair.
#[allow(clippy::too_many_arguments)]
async fn run_one_task(
    executor: Arc<StepExecutor>,
    step: StepRecord,
    mut task_ctx: WorkflowContext,
    index: usize,
    total: usize,
    parent_loop: Option<String>,
    step_name: String,
    loop_cb: EventCallback,
    failure: CancellationToken,
) -> IterationOutcome {
    if failure.is_cancelled() {
        tracing::debug!(
            step = step_name.as_str(),
            index,
            "loop task skipped after earlier failure"
        );
        return IterationOutcome::Skipped;
    }

    loop_cb(WorkflowEvent::LoopIterationStarted {
        step_name: step_name.clone(),
        iteration_index: index,
        total_iterations: total,
        item_label: step.name().to_string(),
        parent_step_name: parent_loop,
        step_path: format!("[{index}]"),
        timestamp: Utc::now(),
    })
    .await;

    let started = Instant::now();
    let iter_cb = prefix_callback(format!("[{index}]"), loop_cb.clone());
    let result = executor.execute(&step, &mut task_ctx, Some(iter_cb)).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let error = if result.success { None } else { result.error.clone() };
    loop_cb(WorkflowEvent::LoopIterationCompleted {
        step_name: step_name.clone(),
        iteration_index: index,
        success: result.success,
        duration_ms,
        error: error.clone(),
        step_path: format!("[{index}]"),
        timestamp: Utc::now(),
    })
    .await;

    if result.success {
        IterationOutcome::Completed {
            outputs: vec![result.output.clone()],
            results: vec![result],
        }
    } else {
        failure.cancel();
        IterationOutcome::Failed {
            error: error.unwrap_or_else(|| "step failed".to_string()),
            results: vec![result],
        }
    }
}

/// Inspect the filled slots: aggregate failures into a `LoopStepError`, or
/// assemble the input-ordered results and flattened nested step results.
fn collect(
    step_name: &str,
    slots: Vec<Option<IterationOutcome>>,
    total: usize,
    shape: impl Fn(Vec<Value>) -> Value,
) -> Result<(Vec<Value>, Vec<StepResult>), String> {
    let mut failed: Vec<(usize, String)> = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        if let Some(IterationOutcome::Failed { error, .. }) = slot {
            failed.push((index, error.clone()));
        }
    }
    if !failed.is_empty() {
        let error = LoopStepError {
            step_name: step_name.to_string(),
            failed_iterations: failed,
            total_iterations: total,
        };
        return Err(error.to_string());
    }

    let mut values = Vec::with_capacity(total);
    let mut step_results = Vec::new();
    for slot in slots {
        match slot {
            Some(IterationOutcome::Completed { outputs, results }) => {
                values.push(shape(outputs));
                step_results.extend(results);
            }
            Some(IterationOutcome::ResumeSkipped) | Some(IterationOutcome::Skipped) | None => {
                values.push(Value::Null);
            }
            Some(IterationOutcome::Failed { .. }) => unreachable!("failures returned above"),
        }
    }
    Ok((values, step_results))
}

fn type_name(value: &Value) -> &'static str {
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
