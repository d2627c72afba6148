// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic (Claude) chat backend, implementing `flowctl_core::ports::ChatBackend`.

use std::time::Duration;

use async_trait::async_trait;
use flowctl_core::ports::{ChatBackend, ChatMessage, EnvironmentError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Anthropic messages request.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Chat backend for the Anthropic Messages API.
pub struct AnthropicChat {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    model: String,
}

impl AnthropicChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.anthropic.com/v1", "2023-06-01")
    }

    pub fn with_base_url(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>, api_version: impl Into<String>) -> Self {
        let client = Client::builder().timeout(Duration::from_secs(120)).build().expect("build reqwest client");
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            api_version: api_version.into(),
            model: model.into(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, EnvironmentError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| EnvironmentError::Backend("ANTHROPIC_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key, model))
    }

    fn parse_error(status: StatusCode, body: &str) -> EnvironmentError {
        if let Ok(resp) = serde_json::from_str::<AnthropicErrorResponse>(body) {
            return EnvironmentError::Backend(format!("anthropic [{}] {}: {}", status.as_u16(), resp.error.error_type, resp.error.message));
        }
        EnvironmentError::Backend(format!("anthropic [{}] {}", status.as_u16(), body))
    }
}

#[async_trait]
impl ChatBackend for AnthropicChat {
    async fn chat(&self, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<String, EnvironmentError> {
        let system = messages.iter().find(|m| m.role == "system").map(|m| m.content.clone());
        let wire_messages = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| WireMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let request = MessagesRequest {
            model: self.model.clone(),
            messages: wire_messages,
            max_tokens: max_tokens.unwrap_or(1024),
            system,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EnvironmentError::Backend(format!("anthropic request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| EnvironmentError::Backend(format!("anthropic response parse error: {e}")))?;
        Ok(parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_custom_base_url() {
        let chat = AnthropicChat::with_base_url("key", "claude-3-haiku", "http://localhost:9999", "2023-06-01");
        assert_eq!(chat.base_url, "http://localhost:9999");
        assert_eq!(chat.model, "claude-3-haiku");
    }
}
