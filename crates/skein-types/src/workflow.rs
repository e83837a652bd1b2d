//! Workflow document types for skein.
//!
//! Defines the canonical intermediate representation for workflows: the
//! YAML document format and the programmatic builder API both convert to
//! and from `Workflow`. Step records are a closed tagged union; they are
//! immutable after parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::StepType;

// ---------------------------------------------------------------------------
// Workflow (canonical IR)
// ---------------------------------------------------------------------------

/// A named, versioned workflow document.
///
/// The single source of truth for a workflow's shape. Step names must be
/// unique within a step sequence; input names are unique by construction
/// (YAML mapping keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Document format version (currently "1.0").
    pub version: String,
    /// Identifier-like workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input declarations keyed by input name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, InputDecl>,
    /// Ordered sequence of step records (at least one).
    pub steps: Vec<StepRecord>,
    /// Default validation stage names for Validate steps with no `stages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_stages: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Input declarations
// ---------------------------------------------------------------------------

/// Declared type of a workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl InputType {
    /// Check whether a JSON value conforms to this declared type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            InputType::String => value.is_string(),
            InputType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            InputType::Boolean => value.is_boolean(),
            InputType::Array => value.is_array(),
            InputType::Object => value.is_object(),
        }
    }

    /// Human-readable name used in binding error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::String => "string",
            InputType::Integer => "integer",
            InputType::Boolean => "boolean",
            InputType::Array => "array",
            InputType::Object => "object",
        }
    }
}

/// Declaration of a single workflow input.
///
/// If `required` is false and no default is given, the input is simply
/// absent at runtime (distinct from null). If `required` is true, binding
/// must supply a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    /// Declared value type.
    #[serde(rename = "type")]
    pub input_type: InputType,
    /// Whether binding must supply a value.
    #[serde(default)]
    pub required: bool,
    /// Default applied when the caller omits the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Step records
// ---------------------------------------------------------------------------

/// A single step in a workflow.
///
/// Internally tagged by `type` to match the document structure:
/// ```yaml
/// - name: process_item
///   type: python
///   action: process_item
///   kwargs:
///     value: ${{ item }}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepRecord {
    /// Invoke a registered native action with keyword arguments.
    Python {
        name: String,
        /// Registry key of the action to call.
        action: String,
        /// Keyword arguments; values may contain template expressions.
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        kwargs: serde_json::Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    /// Invoke a registered agent with a resolved context.
    Agent {
        name: String,
        /// Registry key of the agent.
        agent: String,
        #[serde(default)]
        context: ContextSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    /// Invoke a registered generator with a resolved context.
    Generate {
        name: String,
        /// Registry key of the generator.
        generator: String,
        #[serde(default)]
        context: ContextSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    /// Run validation stages with retry and an optional on-failure hook.
    Validate {
        name: String,
        /// Explicit stage list, a config key, or absent (use defaults).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stages: Option<StagesSpec>,
        /// Additional attempts after the first (total attempts = 1 + retry).
        #[serde(default = "default_retry")]
        retry: u32,
        /// Step executed before each retry attempt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_failure: Option<Box<StepRecord>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    /// Select one of several inner steps by evaluating conditions in order.
    Branch {
        name: String,
        /// Ordered options; the first truthy condition wins.
        options: Vec<BranchOption>,
    },
    /// Execute inner steps, optionally per item, with bounded concurrency.
    Loop {
        name: String,
        /// Inner step records, run sequentially within an iteration.
        steps: Vec<StepRecord>,
        /// Expression yielding the array to iterate over.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        for_each: Option<String>,
        /// Maximum concurrent iterations (ignored when `parallel` is set).
        #[serde(default = "default_max_concurrency")]
        max_concurrency: u32,
        /// Shorthand: true = unbounded, false = sequential.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
    /// Run another workflow as a single step.
    Subworkflow {
        name: String,
        /// Registered workflow name or an inline workflow document.
        workflow: SubworkflowRef,
        /// Input bindings (values may contain template expressions).
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        inputs: serde_json::Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
    },
}

fn default_retry() -> u32 {
    3
}

fn default_max_concurrency() -> u32 {
    1
}

impl StepRecord {
    /// The step's unique name.
    pub fn name(&self) -> &str {
        match self {
            StepRecord::Python { name, .. }
            | StepRecord::Agent { name, .. }
            | StepRecord::Generate { name, .. }
            | StepRecord::Validate { name, .. }
            | StepRecord::Branch { name, .. }
            | StepRecord::Loop { name, .. }
            | StepRecord::Subworkflow { name, .. } => name,
        }
    }

    /// The step's variant tag.
    pub fn step_type(&self) -> StepType {
        match self {
            StepRecord::Python { .. } => StepType::Python,
            StepRecord::Agent { .. } => StepType::Agent,
            StepRecord::Generate { .. } => StepType::Generate,
            StepRecord::Validate { .. } => StepType::Validate,
            StepRecord::Branch { .. } => StepType::Branch,
            StepRecord::Loop { .. } => StepType::Loop,
            StepRecord::Subworkflow { .. } => StepType::Subworkflow,
        }
    }

    /// The step's `when` condition, if any. Branch steps have none; their
    /// options carry the conditions instead.
    pub fn when(&self) -> Option<&str> {
        match self {
            StepRecord::Python { when, .. }
            | StepRecord::Agent { when, .. }
            | StepRecord::Generate { when, .. }
            | StepRecord::Validate { when, .. }
            | StepRecord::Loop { when, .. }
            | StepRecord::Subworkflow { when, .. } => when.as_deref(),
            StepRecord::Branch { .. } => None,
        }
    }
}

/// Resolve a loop's effective concurrency.
///
/// Resolution order: explicit `parallel: true` means unbounded (0 sentinel),
/// explicit `parallel: false` means sequential, otherwise `max_concurrency`
/// applies.
pub fn effective_concurrency(parallel: Option<bool>, max_concurrency: u32) -> u32 {
    match parallel {
        Some(true) => 0,
        Some(false) => 1,
        None => max_concurrency,
    }
}

// ---------------------------------------------------------------------------
// Step sub-structures
// ---------------------------------------------------------------------------

/// Context specification for Agent and Generate steps: either a static map
/// (values may contain template expressions) or the key of a registered
/// context builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextSpec {
    /// Name of a registered context builder.
    Builder(String),
    /// Static context map, resolved through the expression resolver.
    Static(serde_json::Map<String, Value>),
}

impl Default for ContextSpec {
    fn default() -> Self {
        ContextSpec::Static(serde_json::Map::new())
    }
}

/// Stage specification for Validate steps: an explicit list of stage names
/// or a string key looked up in the configuration's named-stage table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StagesSpec {
    List(Vec<String>),
    Key(String),
}

/// One option of a Branch step: a condition expression and the inner step
/// executed when the condition is the first to evaluate truthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchOption {
    /// Condition expression (template syntax).
    pub when: String,
    /// Step executed when this option wins.
    pub step: Box<StepRecord>,
}

/// Target of a Subworkflow step: a registered workflow name or an inline
/// workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubworkflowRef {
    Name(String),
    Inline(Box<Workflow>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
