// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The external interfaces the core consumes (spec §6): the environment
//! port, the logger port, and the persistent store port. Concrete
//! implementations live in `flowctl-providers` (environment) and
//! `flowctl-state` (persistence); this module only defines the contracts
//! plus small in-memory reference implementations used by the core's own
//! test suite.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::run::Run;
use crate::value::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Logger port (spec §6.1's `log` method, lifted out as its own contract so
/// the coordinator and the eval sandbox's logging facade share one sink).
pub trait LoggerPort: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// `tracing`-backed reference logger: the masked-value rule is enforced by
/// callers before a message reaches this sink, so this implementation is a
/// thin, honest pass-through.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl LoggerPort for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!(target: "flowctl::workflow", "{message}"),
            LogLevel::Warn => warn!(target: "flowctl::workflow", "{message}"),
            LogLevel::Error => error!(target: "flowctl::workflow", "{message}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("tool '{0}' is not registered; available tools: {1:?}")]
    ToolNotFound(String, Vec<String>),
    #[error("agent '{0}' is not registered; available agents: {1:?}")]
    AgentNotFound(String, Vec<String>),
    #[error("environment backend error: {0}")]
    Backend(String),
}

/// A tool the environment port exposes to `tool` steps.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: JsonValue) -> Result<JsonValue, EnvironmentError>;
}

/// A named agent the environment port exposes to `agent` steps.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn invoke(&self, prompt: &str, max_tokens: Option<u32>) -> Result<String, EnvironmentError>;
}

/// A single message in an inline chat request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Backend for inline `llm.chat` calls (spec §6.1).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<String, EnvironmentError>;
}

/// The environment port: the single opaque handle a handler uses to reach
/// tools, agents, the inline LLM, and the logger (spec §6.1).
#[async_trait]
pub trait EnvironmentPort: Send + Sync {
    async fn call_tool(&self, name: &str, args: JsonValue) -> Result<JsonValue, EnvironmentError>;
    fn tool_names(&self) -> Vec<String>;
    async fn invoke_agent(&self, name: &str, prompt: &str, max_tokens: Option<u32>) -> Result<String, EnvironmentError>;
    fn agent_names(&self) -> Vec<String>;
    async fn chat(&self, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<String, EnvironmentError>;
    fn log(&self, level: LogLevel, message: &str);
}

/// A composable environment port built from a registry of tools/agents plus
/// one chat backend. `flowctl-providers` wires real `ChatBackend`/
/// `AgentHandler` implementations into this; tests wire in stubs.
pub struct StaticEnvironment {
    tools: DashMap<String, Arc<dyn ToolHandler>>,
    agents: DashMap<String, Arc<dyn AgentHandler>>,
    chat_backend: Option<Arc<dyn ChatBackend>>,
    logger: Arc<dyn LoggerPort>,
}

impl StaticEnvironment {
    pub fn new(logger: Arc<dyn LoggerPort>) -> Self {
        Self {
            tools: DashMap::new(),
            agents: DashMap::new(),
            chat_backend: None,
            logger,
        }
    }

    pub fn with_tool(self, name: impl Into<String>, tool: Arc<dyn ToolHandler>) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }

    pub fn with_agent(self, name: impl Into<String>, agent: Arc<dyn AgentHandler>) -> Self {
        self.agents.insert(name.into(), agent);
        self
    }

    pub fn with_chat_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.chat_backend = Some(backend);
        self
    }
}

#[async_trait]
impl EnvironmentPort for StaticEnvironment {
    async fn call_tool(&self, name: &str, args: JsonValue) -> Result<JsonValue, EnvironmentError> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args).await,
            None => Err(EnvironmentError::ToolNotFound(name.to_string(), self.tool_names())),
        }
    }

    fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }

    async fn invoke_agent(&self, name: &str, prompt: &str, max_tokens: Option<u32>) -> Result<String, EnvironmentError> {
        match self.agents.get(name) {
            Some(agent) => agent.invoke(prompt, max_tokens).await,
            None => Err(EnvironmentError::AgentNotFound(name.to_string(), self.agent_names())),
        }
    }

    fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    async fn chat(&self, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<String, EnvironmentError> {
        match &self.chat_backend {
            Some(backend) => backend.chat(messages, max_tokens).await,
            None => Err(EnvironmentError::Backend("no chat backend configured".to_string())),
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(level, message);
    }
}

/// The persistent store port (spec §6.2).
#[async_trait]
pub trait PersistentStorePort: Send + Sync {
    async fn init(&self) -> Result<(), crate::error::OrchestratorError>;
    async fn close(&self) -> Result<(), crate::error::OrchestratorError>;
    async fn save_run(&self, run: &Run) -> Result<(), crate::error::OrchestratorError>;
    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>, crate::error::OrchestratorError>;
    async fn load_all_runs(&self, workflow_id: Option<&str>) -> Result<Vec<Run>, crate::error::OrchestratorError>;
    async fn load_active_runs(&self) -> Result<Vec<Run>, crate::error::OrchestratorError>;
    async fn update_run(&self, run: &Run) -> Result<(), crate::error::OrchestratorError>;
    async fn delete_run(&self, run_id: Uuid) -> Result<(), crate::error::OrchestratorError>;
    async fn set_workflow_secrets(&self, workflow_id: &str, names: HashSet<String>) -> Result<(), crate::error::OrchestratorError>;
}

/// An in-memory `PersistentStorePort`, used by the core's own test suite and
/// as a non-durable default for callers that haven't wired `flowctl-state`.
#[derive(Default)]
pub struct InMemoryStore {
    runs: DashMap<Uuid, Run>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStorePort for InMemoryStore {
    async fn init(&self) -> Result<(), crate::error::OrchestratorError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), crate::error::OrchestratorError> {
        Ok(())
    }

    async fn save_run(&self, run: &Run) -> Result<(), crate::error::OrchestratorError> {
        self.runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>, crate::error::OrchestratorError> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }

    async fn load_all_runs(&self, workflow_id: Option<&str>) -> Result<Vec<Run>, crate::error::OrchestratorError> {
        Ok(self
            .runs
            .iter()
            .filter(|r| workflow_id.map(|w| w == r.workflow_id).unwrap_or(true))
            .map(|r| r.clone())
            .collect())
    }

    async fn load_active_runs(&self) -> Result<Vec<Run>, crate::error::OrchestratorError> {
        use crate::run::RunStatus;
        Ok(self
            .runs
            .iter()
            .filter(|r| matches!(r.status, RunStatus::Pending | RunStatus::Running | RunStatus::Suspended))
            .map(|r| r.clone())
            .collect())
    }

    async fn update_run(&self, run: &Run) -> Result<(), crate::error::OrchestratorError> {
        self.runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<(), crate::error::OrchestratorError> {
        self.runs.remove(&run_id);
        Ok(())
    }

    async fn set_workflow_secrets(&self, _workflow_id: &str, _names: HashSet<String>) -> Result<(), crate::error::OrchestratorError> {
        Ok(())
    }
}
