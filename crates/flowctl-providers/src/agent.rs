// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapts a `ChatBackend` into a named `agent` step target (spec §4.4):
//! a fixed system prompt bound to one backend, registered on the
//! environment port under a name `agent` steps reference.

use std::sync::Arc;

use async_trait::async_trait;
use flowctl_core::ports::{AgentHandler, ChatBackend, ChatMessage, EnvironmentError};

pub struct NamedAgent {
    backend: Arc<dyn ChatBackend>,
    system_prompt: Option<String>,
}

impl NamedAgent {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: Option<String>) -> Self {
        Self { backend, system_prompt }
    }
}

#[async_trait]
impl AgentHandler for NamedAgent {
    async fn invoke(&self, prompt: &str, max_tokens: Option<u32>) -> Result<String, EnvironmentError> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        self.backend.chat(&messages, max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoBackend;

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn chat(&self, messages: &[ChatMessage], _max_tokens: Option<u32>) -> Result<String, EnvironmentError> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn prepends_the_system_prompt() {
        let agent = NamedAgent::new(Arc::new(EchoBackend), Some("be terse".to_string()));
        let out = agent.invoke("hello", None).await.unwrap();
        assert_eq!(out, "hello");
    }
}
