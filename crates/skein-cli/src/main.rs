//! skein command-line interface.
//!
//! Thin wrapper over the engine: validate workflow documents, list what a
//! directory contains, and run a workflow with the built-in demo actions.
//! Real deployments embed `skein-core` and register their own component
//! library; the CLI registers just enough (`echo`, `log`, `fail`) to
//! exercise documents end to end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use skein_core::events::EventCollector;
use skein_core::loader::{discover_workflows, load_workflow_file};
use skein_core::preflight;
use skein_core::registry::ComponentRegistry;
use skein_core::runner::WorkflowRunner;
use skein_core::{CheckpointStore, JsonFileStore};

#[derive(Parser)]
#[command(name = "skein", version, about = "Declarative developer-automation workflows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow document: structure, fields, and expressions.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// List workflow documents under a directory.
    List {
        /// Directory to scan recursively.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Run a workflow with the built-in demo actions.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Input binding, repeatable: --input name=value. Values parse as
        /// JSON where possible and fall back to plain strings.
        #[arg(long = "input", value_name = "NAME=VALUE")]
        inputs: Vec<String>,

        /// Directory of sibling workflows to register as subworkflows.
        #[arg(long)]
        workflows_dir: Option<PathBuf>,

        /// Directory for checkpoint files.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Print every lifecycle event as it is collected.
        #[arg(long)]
        events: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { file } => validate(&file),
        Command::List { dir } => list(&dir),
        Command::Run { file, inputs, workflows_dir, checkpoint_dir, events } => {
            run(&file, &inputs, workflows_dir.as_deref(), checkpoint_dir, events).await
        }
    }
}

fn validate(file: &std::path::Path) -> Result<()> {
    let workflow = load_workflow_file(file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    preflight::validate_expressions(&workflow)
        .with_context(|| format!("workflow '{}' failed validation", workflow.name))?;

    println!(
        "{}: ok (version {}, {} steps)",
        workflow.name,
        workflow.version,
        workflow.steps.len()
    );
    Ok(())
}

fn list(dir: &std::path::Path) -> Result<()> {
    let found = discover_workflows(dir)
        .with_context(|| format!("failed to scan {}", dir.display()))?;
    if found.is_empty() {
        println!("no workflow documents found under {}", dir.display());
        return Ok(());
    }
    for (path, workflow) in found {
        println!(
            "{:<32} {:>2} steps  {}",
            workflow.name,
            workflow.steps.len(),
            path.display()
        );
    }
    Ok(())
}

async fn run(
    file: &std::path::Path,
    raw_inputs: &[String],
    workflows_dir: Option<&std::path::Path>,
    checkpoint_dir: Option<PathBuf>,
    print_events: bool,
) -> Result<()> {
    let workflow = load_workflow_file(file)
        .with_context(|| format!("failed to load {}", file.display()))?;

    let mut registry = ComponentRegistry::new();
    register_builtin_actions(&mut registry);
    if let Some(dir) = workflows_dir {
        for (path, sibling) in discover_workflows(dir)? {
            tracing::debug!(?path, name = sibling.name.as_str(), "registered subworkflow");
            registry.register_subworkflow(sibling);
        }
    }

    let mut runner = WorkflowRunner::new(Arc::new(registry));
    if let Some(dir) = checkpoint_dir {
        let store: Arc<dyn CheckpointStore> = Arc::new(JsonFileStore::new(dir));
        runner = runner.with_checkpoint_store(store);
    }

    let collector = EventCollector::new();
    let result = runner
        .run(&workflow, parse_inputs(raw_inputs)?, Some(collector.callback()))
        .await?;

    if print_events {
        for event in collector.events() {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    for step in &result.step_results {
        let status = if step.success { "ok" } else { "FAILED" };
        println!("{:<32} {:>6}  {} ms", step.name, status, step.duration_ms);
        if let Some(error) = &step.error {
            println!("    {error}");
        }
    }
    println!(
        "\n{}: {} in {} ms",
        result.workflow_name,
        if result.success { "success" } else { "failure" },
        result.duration_ms
    );
    println!("final output: {}", serde_json::to_string_pretty(&result.final_output)?);

    if result.success {
        Ok(())
    } else {
        anyhow::bail!("workflow '{}' failed", result.workflow_name)
    }
}

/// Demo actions for exercising documents without a component library.
fn register_builtin_actions(registry: &mut ComponentRegistry) {
    // echo: return the resolved `value` kwarg.
    registry.register_sync_action("echo", |kwargs| {
        Ok(kwargs.get("value").cloned().unwrap_or(Value::Null))
    });
    // log: emit kwargs at info level, return them.
    registry.register_sync_action("log", |kwargs| {
        tracing::info!(kwargs_json = %serde_json::Value::Object(kwargs.clone()), "log action");
        Ok(Value::Object(kwargs))
    });
    // fail: raise with the resolved `message` kwarg, for testing flows.
    registry.register_sync_action("fail", |kwargs| {
        let message = kwargs
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("fail action invoked");
        anyhow::bail!("{message}")
    });
}

/// Parse repeatable `--input name=value` bindings. Values that parse as
/// JSON keep their native type; everything else is a string.
fn parse_inputs(raw: &[String]) -> Result<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    for binding in raw {
        let Some((name, value)) = binding.split_once('=') else {
            anyhow::bail!("invalid --input '{binding}'; expected NAME=VALUE");
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        map.insert(name.to_string(), value);
    }
    Ok(map)
}
