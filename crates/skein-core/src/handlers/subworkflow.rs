//! Subworkflow step handler: run another workflow as a single step.
//!
//! The target is resolved from the registry by name or taken inline. The
//! child gets a fresh context whose inputs are the parent's bindings
//! resolved through the expression resolver, and an event callback wrapped
//! with the subworkflow step's name so the child's events appear at a
//! hierarchical path under the parent.

use std::sync::Arc;

use skein_types::workflow::SubworkflowRef;

use crate::context::WorkflowContext;
use crate::events::{EventCallback, prefix_callback};
use crate::executor::{HandlerResult, StepExecutor};
use crate::expression;
use crate::runner::WorkflowRunner;

pub(crate) async fn execute(
    executor: &Arc<StepExecutor>,
    step_name: &str,
    target: &SubworkflowRef,
    bindings: &serde_json::Map<String, serde_json::Value>,
    ctx: &mut WorkflowContext,
    callback: Option<EventCallback>,
) -> HandlerResult {
    let workflow = match target {
        SubworkflowRef::Name(name) => match executor.registry().subworkflow(name) {
            Some(workflow) => workflow.clone(),
            None => return HandlerResult::fail(format!("unknown subworkflow '{name}'")),
        },
        SubworkflowRef::Inline(workflow) => (**workflow).clone(),
    };

    let child_inputs = match expression::resolve_map(bindings, ctx) {
        Ok(inputs) => inputs,
        Err(e) => {
            return HandlerResult::fail(format!("subworkflow input binding failed: {e}"));
        }
    };

    tracing::debug!(
        step = step_name,
        subworkflow = workflow.name.as_str(),
        "running subworkflow"
    );

    let child_callback = callback.map(|cb| prefix_callback(step_name, cb));
    let runner = WorkflowRunner::new(Arc::clone(executor.registry()))
        .with_config_option(ctx.config());

    match runner.run(&workflow, child_inputs, child_callback).await {
        Ok(child) => {
            let success = child.success;
            let error = child.first_failure().map(|failure| {
                format!(
                    "subworkflow '{}' failed at step '{}': {}",
                    workflow.name,
                    failure.name,
                    failure.error.as_deref().unwrap_or("unknown error")
                )
            });
            let nested = child.step_results.clone();
            let output = match serde_json::to_value(&child) {
                Ok(output) => output,
                Err(e) => {
                    return HandlerResult::fail(format!(
                        "failed to serialize subworkflow result: {e}"
                    ));
                }
            };
            HandlerResult { success, output, error, nested: Some(nested) }
        }
        Err(e) => HandlerResult::fail(format!(
            "subworkflow '{}' failed before execution: {e}",
            workflow.name
        )),
    }
}
