// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI chat backend, implementing `flowctl_core::ports::ChatBackend`.

use std::time::Duration;

use async_trait::async_trait;
use flowctl_core::ports::{ChatBackend, ChatMessage, EnvironmentError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Chat backend for the OpenAI (and OpenAI-compatible) chat completions API.
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1")
    }

    pub fn with_base_url(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = Client::builder().timeout(Duration::from_secs(120)).build().expect("build reqwest client");
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, EnvironmentError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| EnvironmentError::Backend("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key, model))
    }

    fn parse_error(status: StatusCode, body: &str) -> EnvironmentError {
        if let Ok(resp) = serde_json::from_str::<OpenAIErrorResponse>(body) {
            return EnvironmentError::Backend(format!("openai [{}] {}: {}", status.as_u16(), resp.error.error_type, resp.error.message));
        }
        EnvironmentError::Backend(format!("openai [{}] {}", status.as_u16(), body))
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn chat(&self, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<String, EnvironmentError> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: wire_messages,
            max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EnvironmentError::Backend(format!("openai request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| EnvironmentError::Backend(format!("openai response parse error: {e}")))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| EnvironmentError::Backend("openai response had no choices".to_string()))?;
        Ok(choice.message.content)
    }
}
