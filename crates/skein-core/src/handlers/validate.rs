//! Validate step handler: run validation stages with retry and an optional
//! on-failure hook.
//!
//! Attempt accounting: the stages run once plus `retry` additional times,
//! so `1 + retry` attempts total. The `on_failure` step runs before each
//! retry attempt (at most `retry` times); its failures are logged and
//! swallowed so the retry loop always proceeds.

use std::sync::Arc;

use serde_json::json;

use skein_types::workflow::{StagesSpec, StepRecord};

use crate::context::WorkflowContext;
use crate::events::EventCallback;
use crate::executor::{HandlerResult, StepExecutor};

pub(crate) async fn execute(
    executor: &Arc<StepExecutor>,
    step_name: &str,
    stages: Option<&StagesSpec>,
    retry: u32,
    on_failure: Option<&StepRecord>,
    ctx: &mut WorkflowContext,
    callback: Option<EventCallback>,
) -> HandlerResult {
    let config = ctx.config();

    // Resolve the stage list: explicit list as-is, string key through the
    // config's named-stage table, absent through the workflow's defaults
    // and then the config's defaults.
    let stage_list: Vec<String> = match stages {
        Some(StagesSpec::List(list)) => list.clone(),
        Some(StagesSpec::Key(key)) => match config.as_ref().and_then(|c| c.stage_set(key)) {
            Some(list) => list,
            None => {
                return HandlerResult::fail(format!(
                    "stage key '{key}' not found in configuration"
                ));
            }
        },
        None => executor
            .default_stages()
            .map(|stages| stages.to_vec())
            .or_else(|| config.as_ref().and_then(|c| c.validation_stages()))
            .unwrap_or_default(),
    };

    // Without a config there is nothing to run; an empty stage set passes.
    let Some(config) = config else {
        tracing::debug!(step = step_name, "no validation config; treating as success");
        return HandlerResult::ok(json!({
            "success": true,
            "stages": stage_list,
            "attempts": 0,
        }));
    };

    let total_attempts = retry + 1;
    let mut last_error = String::new();

    for attempt in 1..=total_attempts {
        if attempt > 1 {
            if let Some(fix_step) = on_failure {
                let fix = executor.execute(fix_step, ctx, callback.clone()).await;
                if !fix.success {
                    // on_failure errors never abort the retry loop.
                    tracing::warn!(
                        step = step_name,
                        on_failure = fix_step.name(),
                        error = fix.error.as_deref().unwrap_or("unknown"),
                        "on_failure step failed; retrying validation anyway"
                    );
                }
            }
        }

        match config.run_validation_stages(&stage_list).await {
            Ok(outcome) if outcome.success => {
                tracing::debug!(step = step_name, attempt, "validation passed");
                return HandlerResult::ok(json!({
                    "success": true,
                    "stages": stage_list,
                    "attempts": attempt,
                }));
            }
            Ok(outcome) => {
                last_error = outcome
                    .detail
                    .unwrap_or_else(|| "validation stages failed".to_string());
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }
        tracing::debug!(
            step = step_name,
            attempt,
            total_attempts,
            error = last_error.as_str(),
            "validation attempt failed"
        );
    }

    HandlerResult::fail(format!(
        "validation failed after {retry} retries: {last_error}"
    ))
}
