//! Workflow document parsing, serialization, and filesystem operations.
//!
//! Parsing is strict: unknown `type` values and unexpected extra fields are
//! rejected. Serde's internally tagged enums ignore unknown fields, so the
//! raw YAML value is key-checked against the per-variant field sets before
//! deserialization.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_yaml_ng::Value as YamlValue;

use skein_types::workflow::{StepRecord, Workflow};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

const WORKFLOW_KEYS: &[&str] = &[
    "version",
    "name",
    "description",
    "inputs",
    "steps",
    "validation_stages",
];

const INPUT_KEYS: &[&str] = &["type", "required", "default", "description"];

/// Allowed fields per step `type`.
fn step_keys(step_type: &str) -> Option<&'static [&'static str]> {
    match step_type {
        "python" => Some(&["name", "type", "action", "kwargs", "when"]),
        "agent" => Some(&["name", "type", "agent", "context", "when"]),
        "generate" => Some(&["name", "type", "generator", "context", "when"]),
        "validate" => Some(&["name", "type", "stages", "retry", "on_failure", "when"]),
        "branch" => Some(&["name", "type", "options"]),
        "loop" => Some(&[
            "name",
            "type",
            "steps",
            "for_each",
            "max_concurrency",
            "parallel",
            "when",
        ]),
        "subworkflow" => Some(&["name", "type", "workflow", "inputs", "when"]),
        _ => None,
    }
}

/// Parse a YAML string into a structurally validated `Workflow`.
pub fn parse_workflow(yaml: &str) -> Result<Workflow, EngineError> {
    let raw: YamlValue =
        serde_yaml_ng::from_str(yaml).map_err(|e| EngineError::Parse(e.to_string()))?;
    check_workflow_keys(&raw)?;
    let workflow: Workflow =
        serde_yaml_ng::from_value(raw).map_err(|e| EngineError::Parse(e.to_string()))?;
    validate_structure(&workflow)?;
    Ok(workflow)
}

/// Serialize a `Workflow` to YAML.
pub fn serialize_workflow(workflow: &Workflow) -> Result<String, EngineError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| EngineError::Parse(e.to_string()))
}

fn check_workflow_keys(raw: &YamlValue) -> Result<(), EngineError> {
    let Some(map) = raw.as_mapping() else {
        return Err(EngineError::Parse("workflow document must be a mapping".to_string()));
    };
    check_keys(map, WORKFLOW_KEYS, "workflow")?;

    if let Some(inputs) = raw.get("inputs").and_then(YamlValue::as_mapping) {
        for (name, decl) in inputs {
            if let Some(decl) = decl.as_mapping() {
                check_keys(
                    decl,
                    INPUT_KEYS,
                    &format!("input '{}'", yaml_str(name)),
                )?;
            }
        }
    }

    if let Some(steps) = raw.get("steps").and_then(YamlValue::as_sequence) {
        for step in steps {
            check_step_keys(step)?;
        }
    }
    Ok(())
}

fn check_step_keys(raw: &YamlValue) -> Result<(), EngineError> {
    let Some(map) = raw.as_mapping() else {
        return Err(EngineError::Parse("step record must be a mapping".to_string()));
    };
    let step_type = raw
        .get("type")
        .and_then(YamlValue::as_str)
        .ok_or_else(|| EngineError::Parse("step record is missing a 'type' field".to_string()))?;
    let name = raw.get("name").and_then(YamlValue::as_str).unwrap_or("<unnamed>");

    let Some(allowed) = step_keys(step_type) else {
        return Err(EngineError::Parse(format!(
            "step '{name}' has unknown type '{step_type}'"
        )));
    };
    check_keys(map, allowed, &format!("step '{name}'"))?;

    // Recurse into nested step structures.
    if let Some(nested) = raw.get("steps").and_then(YamlValue::as_sequence) {
        for step in nested {
            check_step_keys(step)?;
        }
    }
    if let Some(on_failure) = raw.get("on_failure") {
        if !on_failure.is_null() {
            check_step_keys(on_failure)?;
        }
    }
    if let Some(options) = raw.get("options").and_then(YamlValue::as_sequence) {
        for option in options {
            let Some(option_map) = option.as_mapping() else {
                return Err(EngineError::Parse(format!(
                    "branch option in step '{name}' must be a mapping"
                )));
            };
            check_keys(
                option_map,
                &["when", "step"],
                &format!("branch option in step '{name}'"),
            )?;
            if let Some(inner) = option.get("step") {
                check_step_keys(inner)?;
            }
        }
    }
    // Inline subworkflow documents get the full workflow key check.
    if step_type == "subworkflow" {
        if let Some(target) = raw.get("workflow") {
            if target.is_mapping() {
                check_workflow_keys(target)?;
            }
        }
    }
    Ok(())
}

fn check_keys(
    map: &serde_yaml_ng::Mapping,
    allowed: &[&str],
    what: &str,
) -> Result<(), EngineError> {
    for key in map.keys() {
        let key = yaml_str(key);
        if !allowed.contains(&key.as_str()) {
            return Err(EngineError::Parse(format!(
                "unexpected field '{key}' in {what}"
            )));
        }
    }
    Ok(())
}

fn yaml_str(value: &YamlValue) -> String {
    value.as_str().map(String::from).unwrap_or_else(|| format!("{value:?}"))
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Validate structural constraints: workflow name format, at least one
/// step, and unique step names within every step sequence.
pub fn validate_structure(workflow: &Workflow) -> Result<(), EngineError> {
    if workflow.name.is_empty() {
        return Err(EngineError::Semantic("workflow name must not be empty".to_string()));
    }
    if !workflow
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::Semantic(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric, hyphens, and underscores allowed)",
            workflow.name
        )));
    }
    if workflow.steps.is_empty() {
        return Err(EngineError::Semantic(
            "workflow must have at least one step".to_string(),
        ));
    }
    check_unique_names(&workflow.steps)
}

fn check_unique_names(steps: &[StepRecord]) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.name()) {
            return Err(EngineError::Semantic(format!(
                "duplicate step name: '{}'",
                step.name()
            )));
        }
        match step {
            StepRecord::Loop { steps, .. } => check_unique_names(steps)?,
            StepRecord::Validate { on_failure: Some(on_failure), .. } => {
                check_unique_names(std::slice::from_ref(on_failure))?
            }
            StepRecord::Branch { options, .. } => {
                for option in options {
                    check_unique_names(std::slice::from_ref(&option.step))?;
                }
            }
            StepRecord::Subworkflow {
                workflow: skein_types::workflow::SubworkflowRef::Inline(workflow),
                ..
            } => validate_structure(workflow)?,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, EngineError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow(&content)
}

/// Save a workflow to a YAML file, creating parent directories as needed.
pub fn save_workflow_file(path: &Path, workflow: &Workflow) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serialize_workflow(workflow)?)?;
    Ok(())
}

/// Discover workflow YAML files under `base_dir`, recursively.
///
/// Files that fail to parse are skipped with a warning; they may not be
/// workflow documents at all.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, Workflow)>, EngineError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, Workflow)>,
) -> Result<(), EngineError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            match load_workflow_file(&path) {
                Ok(workflow) => results.push((path, workflow)),
                Err(_) => {
                    tracing::warn!(?path, "skipping unparseable workflow file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "1.0"
name: parallel-processing
description: Process items in parallel using for_each

inputs:
  items:
    type: array
    description: Items to process

steps:
  - name: process_all_items
    type: loop
    for_each: ${{ inputs.items }}
    parallel: true
    steps:
      - name: process_item
        type: python
        action: process_item
        kwargs:
          value: ${{ item }}
  - name: summarize
    type: generate
    generator: summary
    context:
      results: ${{ steps.process_all_items.output }}
"#;

    #[test]
    fn parses_realistic_document() {
        let workflow = parse_workflow(SAMPLE).expect("should parse");
        assert_eq!(workflow.name, "parallel-processing");
        assert_eq!(workflow.version, "1.0");
        assert_eq!(workflow.steps.len(), 2);
        match &workflow.steps[0] {
            StepRecord::Loop { for_each, parallel, steps, .. } => {
                assert_eq!(for_each.as_deref(), Some("${{ inputs.items }}"));
                assert_eq!(*parallel, Some(true));
                assert_eq!(steps.len(), 1);
            }
            other => panic!("expected loop, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_parse_serialize_parse_is_equal() {
        let first = parse_workflow(SAMPLE).expect("first parse");
        let yaml = serialize_workflow(&first).expect("serialize");
        let second = parse_workflow(&yaml).expect("second parse");

        // Structural equality via canonical JSON
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn rejects_unknown_step_type() {
        let yaml = r#"
version: "1.0"
name: bad
steps:
  - name: x
    type: shell
    command: ls
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown type 'shell'"), "got: {err}");
    }

    #[test]
    fn rejects_unexpected_step_field() {
        let yaml = r#"
version: "1.0"
name: bad
steps:
  - name: x
    type: python
    action: noop
    timeout: 5
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("unexpected field 'timeout'"), "got: {err}");
    }

    #[test]
    fn rejects_unexpected_workflow_field() {
        let yaml = r#"
version: "1.0"
name: bad
owner: me
steps:
  - name: x
    type: python
    action: noop
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("unexpected field 'owner'"), "got: {err}");
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let yaml = r#"
version: "1.0"
name: dupes
steps:
  - name: same
    type: python
    action: a
  - name: same
    type: python
    action: b
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate step name"), "got: {err}");
    }

    #[test]
    fn rejects_duplicate_names_inside_loop() {
        let yaml = r#"
version: "1.0"
name: dupes
steps:
  - name: looper
    type: loop
    steps:
      - name: inner
        type: python
        action: a
      - name: inner
        type: python
        action: b
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate step name"), "got: {err}");
    }

    #[test]
    fn rejects_empty_workflow_and_bad_names() {
        let empty = r#"
version: "1.0"
name: no-steps
steps: []
"#;
        assert!(parse_workflow(empty).unwrap_err().to_string().contains("at least one step"));

        let bad_name = r#"
version: "1.0"
name: "has spaces!"
steps:
  - name: x
    type: python
    action: noop
"#;
        assert!(
            parse_workflow(bad_name)
                .unwrap_err()
                .to_string()
                .contains("invalid characters")
        );
    }

    #[test]
    fn checks_nested_branch_and_on_failure_steps() {
        let yaml = r#"
version: "1.0"
name: nested
steps:
  - name: route
    type: branch
    options:
      - when: ${{ inputs.go }}
        step:
          name: inner
          type: python
          action: a
          bogus: true
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("unexpected field 'bogus'"), "got: {err}");
    }

    #[test]
    fn save_load_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = parse_workflow(SAMPLE).unwrap();

        save_workflow_file(&dir.path().join("flows/one.yaml"), &workflow).unwrap();
        save_workflow_file(&dir.path().join("two.yml"), &workflow).unwrap();
        std::fs::write(dir.path().join("not-a-workflow.yaml"), "key: value").unwrap();

        let found = discover_workflows(dir.path()).expect("discover");
        assert_eq!(found.len(), 2, "should find exactly 2 valid workflows");

        let loaded = load_workflow_file(&dir.path().join("two.yml")).expect("load");
        assert_eq!(loaded.name, "parallel-processing");
    }

    #[test]
    fn discover_nonexistent_dir_is_empty() {
        let found = discover_workflows(Path::new("/nonexistent/path")).unwrap();
        assert!(found.is_empty());
    }
}
