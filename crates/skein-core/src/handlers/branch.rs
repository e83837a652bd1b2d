//! Branch step handler: first-truthy-wins option selection.
//!
//! Conditions are evaluated in declared order; the first truthy one wins
//! and its inner step runs. Conditions after the winner are never
//! evaluated. No match means the branch is a no-op: a success result with
//! the skip-marker output.

use std::sync::Arc;

use skein_types::result::skip_marker;
use skein_types::workflow::BranchOption;

use crate::context::WorkflowContext;
use crate::events::EventCallback;
use crate::executor::{HandlerResult, StepExecutor, evaluate_condition};

pub(crate) async fn execute(
    executor: &Arc<StepExecutor>,
    options: &[BranchOption],
    ctx: &mut WorkflowContext,
    callback: Option<EventCallback>,
) -> HandlerResult {
    for option in options {
        match evaluate_condition(&option.when, ctx) {
            Ok(false) => continue,
            Ok(true) => {
                tracing::debug!(
                    selected = option.step.name(),
                    "branch condition matched"
                );
                let inner = executor.execute(&option.step, ctx, callback).await;
                return HandlerResult {
                    success: inner.success,
                    output: inner.output.clone(),
                    error: inner.error.clone(),
                    nested: Some(vec![inner]),
                };
            }
            Err(message) => return HandlerResult::fail(message),
        }
    }

    tracing::debug!("no branch condition matched; branch is a no-op");
    HandlerResult::ok(skip_marker())
}
