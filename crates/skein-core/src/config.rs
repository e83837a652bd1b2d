//! Validation configuration contract consumed by Validate steps.
//!
//! The engine treats the configuration as opaque: it only asks for stage
//! lists and delegates stage execution. Implementations typically shell out
//! to formatters, linters, and test runners; all of that lives outside the
//! engine.

use futures_util::future::BoxFuture;

/// Result of running a set of validation stages.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Whether every stage passed.
    pub success: bool,
    /// Optional human-readable detail (first failing stage, tool output).
    pub detail: Option<String>,
}

impl ValidationOutcome {
    pub fn passed() -> Self {
        Self { success: true, detail: None }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self { success: false, detail: Some(detail.into()) }
    }
}

/// Object-safe configuration contract for Validate steps.
///
/// Async methods return boxed futures so the trait can live behind
/// `Arc<dyn ValidationConfig>` on the workflow context.
pub trait ValidationConfig: Send + Sync {
    /// Default stage list used when a Validate step names no stages.
    fn validation_stages(&self) -> Option<Vec<String>>;

    /// Look up a named stage set (Validate steps may reference stages by a
    /// config key instead of listing them inline).
    fn stage_set(&self, key: &str) -> Option<Vec<String>>;

    /// Run the given stages. A failing stage yields `success: false`; an
    /// `Err` means the stage runner itself broke and is treated as a failed
    /// attempt by the Validate handler.
    fn run_validation_stages<'a>(
        &'a self,
        stages: &'a [String],
    ) -> BoxFuture<'a, anyhow::Result<ValidationOutcome>>;
}
