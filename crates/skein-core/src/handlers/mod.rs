//! Control-flow step handlers: Branch, Validate, Loop, Subworkflow.
//!
//! Each handler receives the executor (for recursive step execution), the
//! current context, and the event callback it should wrap before passing
//! down. Handlers report through `HandlerResult`; the executor turns that
//! into the step's `StepResult`.

pub(crate) mod branch;
pub(crate) mod loop_step;
pub(crate) mod subworkflow;
pub(crate) mod validate;
