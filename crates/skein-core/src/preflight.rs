//! Semantic validation: static checks run before any step executes.
//!
//! One traversal of the workflow tree checks that every referenced
//! component is registered, every embedded template parses, loop
//! concurrency specifiers are consistent, and the subworkflow reference
//! graph is acyclic (DFS with an in-progress set). Runtime recursion is
//! impossible once preflight passes.

use std::collections::HashSet;

use serde_json::Value;

use skein_types::workflow::{ContextSpec, StepRecord, SubworkflowRef, Workflow};

use crate::error::EngineError;
use crate::expression::{self, parse_expression};
use crate::loader::validate_structure;
use crate::registry::ComponentRegistry;

/// Validate a workflow against a registry. Fails preflight; aborts a run
/// before any step executes.
pub fn validate_workflow(
    workflow: &Workflow,
    registry: &ComponentRegistry,
) -> Result<(), EngineError> {
    validate_structure(workflow)?;
    let mut in_progress = HashSet::new();
    check_workflow(workflow, Some(registry), &mut in_progress)
}

/// Validate everything that does not need a registry: structure, embedded
/// expression syntax, and concurrency specifiers. Used by tooling that
/// inspects workflow documents without a component library at hand.
pub fn validate_expressions(workflow: &Workflow) -> Result<(), EngineError> {
    validate_structure(workflow)?;
    let mut in_progress = HashSet::new();
    check_workflow(workflow, None, &mut in_progress)
}

fn check_workflow(
    workflow: &Workflow,
    registry: Option<&ComponentRegistry>,
    in_progress: &mut HashSet<String>,
) -> Result<(), EngineError> {
    if !in_progress.insert(workflow.name.clone()) {
        return Err(EngineError::Semantic(format!(
            "subworkflow cycle detected involving '{}'",
            workflow.name
        )));
    }
    check_steps(&workflow.steps, registry, in_progress)?;
    in_progress.remove(&workflow.name);
    Ok(())
}

fn check_steps(
    steps: &[StepRecord],
    registry: Option<&ComponentRegistry>,
    in_progress: &mut HashSet<String>,
) -> Result<(), EngineError> {
    for step in steps {
        check_step(step, registry, in_progress)?;
    }
    Ok(())
}

fn check_step(
    step: &StepRecord,
    registry: Option<&ComponentRegistry>,
    in_progress: &mut HashSet<String>,
) -> Result<(), EngineError> {
    if let Some(when) = step.when() {
        check_condition(when, step.name())?;
    }

    match step {
        StepRecord::Python { name, action, kwargs, .. } => {
            if let Some(registry) = registry {
                if !registry.has_action(action) {
                    return Err(EngineError::UnknownComponent {
                        kind: "action",
                        name: action.clone(),
                    });
                }
            }
            check_templates_in_map(kwargs, name)?;
        }
        StepRecord::Agent { name, agent, context, .. } => {
            if let Some(registry) = registry {
                if !registry.has_agent(agent) {
                    return Err(EngineError::UnknownComponent {
                        kind: "agent",
                        name: agent.clone(),
                    });
                }
            }
            check_context_spec(context, registry, name)?;
        }
        StepRecord::Generate { name, generator, context, .. } => {
            if let Some(registry) = registry {
                if !registry.has_generator(generator) {
                    return Err(EngineError::UnknownComponent {
                        kind: "generator",
                        name: generator.clone(),
                    });
                }
            }
            check_context_spec(context, registry, name)?;
        }
        StepRecord::Validate { on_failure, .. } => {
            if let Some(on_failure) = on_failure {
                check_step(on_failure, registry, in_progress)?;
            }
        }
        StepRecord::Branch { options, .. } => {
            for option in options {
                check_condition(&option.when, step.name())?;
                check_step(&option.step, registry, in_progress)?;
            }
        }
        StepRecord::Loop { name, steps, for_each, max_concurrency, parallel, .. } => {
            if let Some(for_each) = for_each {
                expression::parse_for_each(for_each).map_err(|e| {
                    EngineError::Semantic(format!(
                        "invalid for_each expression in step '{name}': {e}"
                    ))
                })?;
            }
            // `parallel` overrides the bound entirely, so an explicit
            // non-default bound alongside it is contradictory.
            if parallel.is_some() && *max_concurrency > 1 {
                return Err(EngineError::Semantic(format!(
                    "loop step '{name}' sets both 'parallel' and 'max_concurrency'; use one"
                )));
            }
            check_steps(steps, registry, in_progress)?;
        }
        StepRecord::Subworkflow { name, workflow, inputs, .. } => {
            check_templates_in_map(inputs, name)?;
            match workflow {
                SubworkflowRef::Name(target) => {
                    if let Some(registry) = registry {
                        let Some(sub) = registry.subworkflow(target) else {
                            return Err(EngineError::UnknownComponent {
                                kind: "subworkflow",
                                name: target.clone(),
                            });
                        };
                        check_workflow(sub, Some(registry), in_progress)?;
                    }
                }
                SubworkflowRef::Inline(sub) => {
                    validate_structure(sub)?;
                    check_workflow(sub, registry, in_progress)?;
                }
            }
        }
    }
    Ok(())
}

fn check_condition(condition: &str, step_name: &str) -> Result<(), EngineError> {
    let result = match expression::is_single_template(condition) {
        Some(inner) => parse_expression(inner),
        None => parse_expression(condition),
    };
    result.map(|_| ()).map_err(|e| {
        EngineError::Semantic(format!("invalid condition in step '{step_name}': {e}"))
    })
}

fn check_context_spec(
    context: &ContextSpec,
    registry: Option<&ComponentRegistry>,
    step_name: &str,
) -> Result<(), EngineError> {
    match context {
        ContextSpec::Builder(builder) => {
            if let Some(registry) = registry {
                if !registry.has_context_builder(builder) {
                    return Err(EngineError::UnknownComponent {
                        kind: "context builder",
                        name: builder.clone(),
                    });
                }
            }
            Ok(())
        }
        ContextSpec::Static(map) => check_templates_in_map(map, step_name),
    }
}

fn check_templates_in_map(
    map: &serde_json::Map<String, Value>,
    step_name: &str,
) -> Result<(), EngineError> {
    for value in map.values() {
        check_templates_in_value(value, step_name)?;
    }
    Ok(())
}

fn check_templates_in_value(value: &Value, step_name: &str) -> Result<(), EngineError> {
    match value {
        Value::String(text) => expression::extract_all(text).map(|_| ()).map_err(|e| {
            EngineError::Semantic(format!("invalid expression in step '{step_name}': {e}"))
        }),
        Value::Array(items) => {
            for item in items {
                check_templates_in_value(item, step_name)?;
            }
            Ok(())
        }
        Value::Object(map) => check_templates_in_map(map, step_name),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_noop() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register_sync_action("noop", |_| Ok(Value::Null));
        registry
    }

    fn workflow(value: Value) -> Workflow {
        serde_json::from_value(value).expect("workflow literal")
    }

    #[test]
    fn accepts_valid_workflow() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "ok",
            "steps": [
                {"name": "a", "type": "python", "action": "noop",
                 "kwargs": {"v": "${{ inputs.x }}"}, "when": "${{ inputs.x }}"}
            ]
        }));
        assert!(validate_workflow(&wf, &registry_with_noop()).is_ok());
    }

    #[test]
    fn validate_expressions_skips_component_checks() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "tooling",
            "steps": [
                {"name": "a", "type": "python", "action": "unregistered",
                 "kwargs": {"v": "${{ inputs.x }}"}}
            ]
        }));
        // No registry involved, so the unknown action passes...
        assert!(validate_expressions(&wf).is_ok());

        // ...but broken expressions still fail.
        let wf = workflow(json!({
            "version": "1.0",
            "name": "tooling",
            "steps": [
                {"name": "a", "type": "python", "action": "unregistered",
                 "kwargs": {"v": "${{ inputs }}"}}
            ]
        }));
        assert!(validate_expressions(&wf).is_err());
    }

    #[test]
    fn rejects_unknown_action() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [{"name": "a", "type": "python", "action": "missing"}]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponent { kind: "action", .. }));
    }

    #[test]
    fn rejects_unknown_agent_and_builder() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [{"name": "a", "type": "agent", "agent": "ghost"}]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponent { kind: "agent", .. }));

        let mut registry = registry_with_noop();
        registry.register_agent(
            "real",
            std::sync::Arc::new(crate::registry::FnAgent::new(
                |_: serde_json::Map<String, Value>| Box::pin(async { Ok(Value::Null) }),
            )),
        );
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [{"name": "a", "type": "agent", "agent": "real", "context": "no_builder"}]
        }));
        let err = validate_workflow(&wf, &registry).unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponent { kind: "context builder", .. }));
    }

    #[test]
    fn rejects_bad_template_in_kwargs() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [
                {"name": "a", "type": "python", "action": "noop",
                 "kwargs": {"v": "${{ inputs }}"}}
            ]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(err.to_string().contains("invalid expression"), "got: {err}");
    }

    #[test]
    fn rejects_bad_for_each_syntax_without_checking_existence() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [
                {"name": "l", "type": "loop", "for_each": "${{ bogus.items }}",
                 "steps": [{"name": "inner", "type": "python", "action": "noop"}]}
            ]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(err.to_string().contains("invalid for_each"), "got: {err}");

        // Syntactically valid references pass even if nothing will exist at
        // runtime.
        let wf = workflow(json!({
            "version": "1.0",
            "name": "ok",
            "steps": [
                {"name": "l", "type": "loop", "for_each": "${{ inputs.never_declared }}",
                 "steps": [{"name": "inner", "type": "python", "action": "noop"}]}
            ]
        }));
        assert!(validate_workflow(&wf, &registry_with_noop()).is_ok());
    }

    #[test]
    fn rejects_conflicting_concurrency_specifiers() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [
                {"name": "l", "type": "loop", "parallel": true, "max_concurrency": 4,
                 "steps": [{"name": "inner", "type": "python", "action": "noop"}]}
            ]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(err.to_string().contains("'parallel' and 'max_concurrency'"), "got: {err}");
    }

    #[test]
    fn detects_subworkflow_cycles() {
        let mut registry = registry_with_noop();
        registry.register_subworkflow(workflow(json!({
            "version": "1.0",
            "name": "a",
            "steps": [{"name": "call_b", "type": "subworkflow", "workflow": "b"}]
        })));
        registry.register_subworkflow(workflow(json!({
            "version": "1.0",
            "name": "b",
            "steps": [{"name": "call_a", "type": "subworkflow", "workflow": "a"}]
        })));

        let root = workflow(json!({
            "version": "1.0",
            "name": "root",
            "steps": [{"name": "start", "type": "subworkflow", "workflow": "a"}]
        }));
        let err = validate_workflow(&root, &registry).unwrap_err();
        assert!(err.to_string().contains("cycle"), "got: {err}");
    }

    #[test]
    fn accepts_diamond_subworkflow_references() {
        let mut registry = registry_with_noop();
        registry.register_subworkflow(workflow(json!({
            "version": "1.0",
            "name": "shared",
            "steps": [{"name": "leaf", "type": "python", "action": "noop"}]
        })));

        let root = workflow(json!({
            "version": "1.0",
            "name": "root",
            "steps": [
                {"name": "first", "type": "subworkflow", "workflow": "shared"},
                {"name": "second", "type": "subworkflow", "workflow": "shared"}
            ]
        }));
        assert!(validate_workflow(&root, &registry).is_ok());
    }

    #[test]
    fn rejects_unknown_subworkflow() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [{"name": "s", "type": "subworkflow", "workflow": "ghost"}]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponent { kind: "subworkflow", .. }));
    }

    #[test]
    fn validates_inline_subworkflows_recursively() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "outer",
            "steps": [
                {"name": "s", "type": "subworkflow", "workflow": {
                    "version": "1.0",
                    "name": "inner",
                    "steps": [{"name": "x", "type": "python", "action": "missing"}]
                }}
            ]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponent { kind: "action", .. }));
    }

    #[test]
    fn rejects_invalid_branch_condition() {
        let wf = workflow(json!({
            "version": "1.0",
            "name": "bad",
            "steps": [
                {"name": "route", "type": "branch", "options": [
                    {"when": "${{ steps.x }}", "step": {"name": "inner", "type": "python", "action": "noop"}}
                ]}
            ]
        }));
        let err = validate_workflow(&wf, &registry_with_noop()).unwrap_err();
        assert!(err.to_string().contains("invalid condition"), "got: {err}");
    }
}
