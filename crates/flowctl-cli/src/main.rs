// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thin CLI front end for the flowctl core (spec §1: help text and graph
//! rendering are explicitly out of scope for the core, so they stay out of
//! this binary too). Wires a workflow file, a store URL, and the
//! environment port together and drives one of `submit`/`status`/`resume`/
//! `cancel`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use flowctl_core::ports::{EnvironmentPort, PersistentStorePort, StaticEnvironment, TracingLogger};
use flowctl_core::process_registry::ProcessRegistry;
use flowctl_core::run::Run;
use flowctl_core::steps::StepDeps;
use flowctl_core::value::JsonValue;
use flowctl_core::workflow::WorkflowDescription;
use flowctl_core::{compile, Coordinator};
use flowctl_providers::{AnthropicChat, OpenAiChat};
use flowctl_state::SqlStore;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flowctl")]
#[command(version, about = "Declarative workflow orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Persistent store URL. Defaults to an ephemeral SQLite database.
    #[arg(long, global = true, default_value = "sqlite::memory:")]
    store: String,

    /// Encryption key for secret-classified inputs (spec §6.2). If unset,
    /// secret inputs are stored as plain JSON.
    #[arg(long, global = true, env = "FLOWCTL_ENCRYPTION_KEY")]
    encryption_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a workflow and submit it for execution, driving it to
    /// completion or suspension before returning.
    Submit {
        /// Path to the workflow description (YAML or JSON)
        #[arg(value_name = "FILE")]
        file: String,

        /// Input JSON string, or a path to a JSON file
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Print the current state of a run.
    Status {
        /// Run id
        run_id: Uuid,
    },

    /// Resume a suspended run with a payload.
    Resume {
        /// Path to the workflow description the run was submitted against
        #[arg(value_name = "FILE")]
        file: String,

        /// Run id to resume
        run_id: Uuid,

        /// Resume payload, JSON string or path to a JSON file
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// Mark a run cancelled. Only affects runs this process isn't actively
    /// driving: cancellation of an in-flight run requires reaching the
    /// process that holds it (spec §5's cancellation flag lives in memory).
    Cancel {
        /// Run id
        run_id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("flowctl={log_level}").into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = open_store(&cli.store, cli.encryption_key.as_deref()).await?;

    match cli.command {
        Commands::Submit { file, input } => submit(&file, input.as_deref(), store).await,
        Commands::Status { run_id } => status(run_id, store).await,
        Commands::Resume { file, run_id, payload } => resume(&file, run_id, payload.as_deref(), store).await,
        Commands::Cancel { run_id } => cancel(run_id, store).await,
    }
}

async fn open_store(url: &str, encryption_key: Option<&str>) -> Result<Arc<dyn PersistentStorePort>> {
    let mut store = SqlStore::connect(url).await.with_context(|| format!("connecting to store: {url}"))?;
    if let Some(key) = encryption_key {
        store = store.with_encryption_key(key.as_bytes()).context("configuring secret encryption")?;
    }
    store.init().await.context("initializing store schema")?;
    Ok(Arc::new(store))
}

fn load_workflow(file_path: &str) -> Result<WorkflowDescription> {
    let content = fs::read_to_string(file_path).with_context(|| format!("reading workflow file: {file_path}"))?;
    if file_path.ends_with(".json") {
        serde_json::from_str(&content).with_context(|| format!("parsing workflow JSON: {file_path}"))
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("parsing workflow YAML: {file_path}"))
    }
}

fn load_json_arg(raw: &str) -> Result<JsonValue> {
    if Path::new(raw).exists() {
        let content = fs::read_to_string(raw).with_context(|| format!("reading JSON file: {raw}"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing JSON file: {raw}"))
    } else {
        serde_json::from_str(raw).context("parsing JSON argument")
    }
}

fn build_environment() -> Arc<dyn EnvironmentPort> {
    let mut env = StaticEnvironment::new(Arc::new(TracingLogger));

    if let Ok(chat) = AnthropicChat::from_env("claude-sonnet-4-5") {
        info!("registered Anthropic chat backend");
        env = env.with_chat_backend(Arc::new(chat));
    } else if let Ok(chat) = OpenAiChat::from_env("gpt-4o") {
        info!("registered OpenAI chat backend");
        env = env.with_chat_backend(Arc::new(chat));
    } else {
        info!("no chat backend configured (set ANTHROPIC_API_KEY or OPENAI_API_KEY)");
    }

    Arc::new(env)
}

fn build_deps() -> StepDeps {
    StepDeps {
        environment: build_environment(),
        http_client: reqwest::Client::new(),
        process_registry: Arc::new(ProcessRegistry::new()),
        file_roots: Vec::new(),
    }
}

async fn submit(file: &str, input: Option<&str>, store: Arc<dyn PersistentStorePort>) -> Result<()> {
    let description = load_workflow(file)?;
    if !description.secrets.is_empty() {
        store
            .set_workflow_secrets(&description.id, description.secrets.clone())
            .await
            .context("registering workflow secret names")?;
    }
    let compiled = Arc::new(compile(description).context("compiling workflow")?);

    let inputs: HashMap<String, JsonValue> = match input {
        Some(raw) => serde_json::from_value(load_json_arg(raw)?).context("workflow inputs must be a JSON object")?,
        None => HashMap::new(),
    };

    let coordinator = Coordinator::new(store, build_deps());
    println!("{} {}", "Submitting workflow:".cyan().bold(), compiled.workflow_id());
    let run = coordinator.submit(compiled, inputs).await.context("running workflow")?;
    print_run(&run);
    Ok(())
}

async fn status(run_id: Uuid, store: Arc<dyn PersistentStorePort>) -> Result<()> {
    let run = store.load_run(run_id).await.context("loading run")?;
    match run {
        Some(run) => {
            print_run(&run);
            Ok(())
        }
        None => bail!("no such run: {run_id}"),
    }
}

async fn resume(file: &str, run_id: Uuid, payload: Option<&str>, store: Arc<dyn PersistentStorePort>) -> Result<()> {
    let description = load_workflow(file)?;
    let compiled = Arc::new(compile(description).context("compiling workflow")?);
    let payload = match payload {
        Some(raw) => load_json_arg(raw)?,
        None => JsonValue::Null,
    };

    let coordinator = Coordinator::new(store, build_deps());
    println!("{} {}", "Resuming run:".cyan().bold(), run_id);
    let run = coordinator.resume(run_id, compiled, payload).await.context("resuming workflow")?;
    print_run(&run);
    Ok(())
}

async fn cancel(run_id: Uuid, store: Arc<dyn PersistentStorePort>) -> Result<()> {
    let mut run: Run = store.load_run(run_id).await.context("loading run")?.ok_or_else(|| anyhow::anyhow!("no such run: {run_id}"))?;
    if run.status.is_terminal() {
        println!("{} run is already {:?}", "Note:".yellow().bold(), run.status);
        return Ok(());
    }
    run.mark_terminal(flowctl_core::run::RunStatus::Cancelled, Some("cancelled via CLI".to_string()));
    store.update_run(&run).await.context("persisting cancellation")?;
    println!("{} {}", "Cancelled run:".green().bold(), run_id);
    Ok(())
}

fn print_run(run: &Run) {
    println!("{}", serde_json::to_string_pretty(run).unwrap_or_else(|_| format!("{run:?}")));
}
