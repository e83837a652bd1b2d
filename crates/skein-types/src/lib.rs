//! Shared domain types for the skein workflow engine.
//!
//! This crate defines the canonical intermediate representation for
//! workflow documents (`Workflow`, `StepRecord`), execution outcomes
//! (`StepResult`, `WorkflowResult`), and the lifecycle event stream
//! (`WorkflowEvent`). It is serde-heavy and IO-free: the engine crate
//! depends on it, never the other way around.

pub mod event;
pub mod result;
pub mod workflow;
