//! Component registry: name-indexed lookup for actions, agents, generators,
//! context builders, and subworkflows.
//!
//! Actions are plain callables over a kwargs map; agents and generators are
//! object-safe traits with boxed-future methods so they can live behind
//! `Arc<dyn ...>` (the same dynamic-dispatch shape the engine uses for every
//! async collaborator). Registering under an existing name replaces the
//! previous entry.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use skein_types::result::StepResult;
use skein_types::workflow::Workflow;

/// A registered action: an async callable over keyword arguments. Failures
/// are reported through the `Err` channel and become the step's error.
pub type ActionFn = Arc<
    dyn Fn(serde_json::Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>>
        + Send
        + Sync,
>;

/// A registered context builder: a synchronous callable from
/// `(inputs, step_results)` to a context map for agents and generators.
pub type ContextBuilderFn = Arc<
    dyn Fn(
            &serde_json::Map<String, Value>,
            &HashMap<String, StepResult>,
        ) -> anyhow::Result<serde_json::Map<String, Value>>
        + Send
        + Sync,
>;

/// An agent: wraps an external reasoning system behind a single canonical
/// async method.
pub trait Agent: Send + Sync {
    fn execute<'a>(
        &'a self,
        context: serde_json::Map<String, Value>,
    ) -> BoxFuture<'a, anyhow::Result<Value>>;
}

/// A generator: produces text from a resolved context.
pub trait Generator: Send + Sync {
    fn generate<'a>(
        &'a self,
        context: serde_json::Map<String, Value>,
    ) -> BoxFuture<'a, anyhow::Result<String>>;
}

/// Adapter turning a closure into an [`Agent`].
pub struct FnAgent<F>(F);

impl<F> FnAgent<F>
where
    F: Fn(serde_json::Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Agent for FnAgent<F>
where
    F: Fn(serde_json::Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>>
        + Send
        + Sync,
{
    fn execute<'a>(
        &'a self,
        context: serde_json::Map<String, Value>,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        (self.0)(context)
    }
}

/// Adapter turning a closure into a [`Generator`].
pub struct FnGenerator<F>(F);

impl<F> FnGenerator<F>
where
    F: Fn(serde_json::Map<String, Value>) -> BoxFuture<'static, anyhow::Result<String>>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Generator for FnGenerator<F>
where
    F: Fn(serde_json::Map<String, Value>) -> BoxFuture<'static, anyhow::Result<String>>
        + Send
        + Sync,
{
    fn generate<'a>(
        &'a self,
        context: serde_json::Map<String, Value>,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        (self.0)(context)
    }
}

/// The five sub-registries the engine resolves string keys against.
#[derive(Default)]
pub struct ComponentRegistry {
    actions: HashMap<String, ActionFn>,
    agents: HashMap<String, Arc<dyn Agent>>,
    generators: HashMap<String, Arc<dyn Generator>>,
    context_builders: HashMap<String, ContextBuilderFn>,
    subworkflows: HashMap<String, Workflow>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- registration -------------------------------------------------------

    /// Register an async action.
    pub fn register_action<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(serde_json::Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
    }

    /// Register a synchronous action; it is lifted into the async callable
    /// shape.
    pub fn register_sync_action<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: Fn(serde_json::Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let action = Arc::new(action);
        self.register_action(name, move |kwargs| {
            let action = Arc::clone(&action);
            Box::pin(async move { action(kwargs) })
        });
    }

    pub fn register_agent(&mut self, name: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(name.into(), agent);
    }

    pub fn register_generator(&mut self, name: impl Into<String>, generator: Arc<dyn Generator>) {
        self.generators.insert(name.into(), generator);
    }

    pub fn register_context_builder<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(
                &serde_json::Map<String, Value>,
                &HashMap<String, StepResult>,
            ) -> anyhow::Result<serde_json::Map<String, Value>>
            + Send
            + Sync
            + 'static,
    {
        self.context_builders.insert(name.into(), Arc::new(builder));
    }

    /// Register a subworkflow under its own document name.
    pub fn register_subworkflow(&mut self, workflow: Workflow) {
        self.subworkflows.insert(workflow.name.clone(), workflow);
    }

    // -- lookup -------------------------------------------------------------

    pub fn action(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).cloned()
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn generator(&self, name: &str) -> Option<Arc<dyn Generator>> {
        self.generators.get(name).cloned()
    }

    pub fn context_builder(&self, name: &str) -> Option<ContextBuilderFn> {
        self.context_builders.get(name).cloned()
    }

    pub fn subworkflow(&self, name: &str) -> Option<&Workflow> {
        self.subworkflows.get(name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn has_generator(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    pub fn has_context_builder(&self, name: &str) -> bool {
        self.context_builders.contains_key(name)
    }

    pub fn has_subworkflow(&self, name: &str) -> bool {
        self.subworkflows.contains_key(name)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("generators", &self.generators.keys().collect::<Vec<_>>())
            .field("context_builders", &self.context_builders.keys().collect::<Vec<_>>())
            .field("subworkflows", &self.subworkflows.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
