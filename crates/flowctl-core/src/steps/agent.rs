// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `agent` step: invokes a named agent if `agent` is set, otherwise
//! falls back to an inline chat call against the environment port's LLM
//! backend.

use serde_json::json;

use super::StepDeps;
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::ports::ChatMessage;
use crate::value::JsonValue;
use crate::workflow::AgentConfig;

pub async fn execute(step_id: &str, cfg: &AgentConfig, ctx: &mut ExecutionContext, deps: &StepDeps) -> Result<JsonValue> {
    let prompt = ctx.resolve_string(&cfg.prompt);
    let system = cfg.system.as_ref().map(|t| ctx.resolve_string(t));

    let content = if let Some(agent_name) = &cfg.agent {
        deps.environment
            .invoke_agent(agent_name, &prompt, cfg.max_tokens)
            .await
            .map_err(|e| OrchestratorError::step_failure(step_id, e.to_string(), true))?
    } else {
        let mut messages = Vec::new();
        if let Some(system_prompt) = &system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_prompt.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt,
        });
        deps.environment
            .chat(&messages, cfg.max_tokens)
            .await
            .map_err(|e| OrchestratorError::step_failure(step_id, e.to_string(), true))?
    };

    Ok(json!({ "response": ctx.mask(&content) }))
}
