//! Workflow execution engine for skein.
//!
//! The engine interprets declarative workflow documents: a tree-structured
//! interpreter with structured concurrency, fail-fast loops, hierarchical
//! step paths, checkpoint/resume, and a small template expression language
//! threading data from inputs and prior step results forward.
//!
//! Module map:
//! - `expression` -- `${{ ... }}` lexer, parser, evaluator, and resolver
//! - `registry` -- actions, agents, generators, context builders, subworkflows
//! - `context` -- per-run mutable state and derived iteration contexts
//! - `events` -- async callbacks, path prefixing, broadcast bus, collector
//! - `executor` -- step dispatch, `when` gate, timing, result assembly
//! - `handlers` -- Branch, Validate, Loop, Subworkflow
//! - `runner` -- preflight, input binding, sequential drive, rollbacks
//! - `preflight` -- static semantic validation
//! - `checkpoint` -- durable run snapshots for resume
//! - `loader` -- strict YAML parsing and workflow file discovery

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod expression;
mod handlers;
pub mod loader;
pub mod preflight;
pub mod registry;
pub mod runner;

pub use checkpoint::{Checkpoint, CheckpointStore, JsonFileStore, LoopProgress, MemoryStore};
pub use config::{ValidationConfig, ValidationOutcome};
pub use context::WorkflowContext;
pub use error::{EngineError, LoopStepError};
pub use events::{EventBus, EventCallback, EventCollector, prefix_callback};
pub use executor::{LoopResume, ProgressHook, StepExecutor};
pub use expression::ExpressionError;
pub use registry::{Agent, ComponentRegistry, FnAgent, FnGenerator, Generator};
pub use runner::WorkflowRunner;
