// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `http` step: issues one request, rejecting targets the SSRF policy
//! blocks before anything touches the network.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Method;
use serde_json::json;

use super::StepDeps;
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::security::check_http_target;
use crate::value::JsonValue;
use crate::workflow::HttpConfig;

pub async fn execute(step_id: &str, cfg: &HttpConfig, ctx: &mut ExecutionContext, deps: &StepDeps) -> Result<JsonValue> {
    let url = ctx.resolve_string(&cfg.url);
    check_http_target(&url)?;

    let method = Method::from_str(&cfg.method.to_uppercase())
        .map_err(|_| OrchestratorError::validation(format!("unsupported HTTP method '{}'", cfg.method)))?;

    let mut request = deps.http_client.request(method, &url).timeout(Duration::from_secs(cfg.timeout));

    for (key, template) in &cfg.headers {
        request = request.header(key, ctx.resolve_string(template));
    }

    if let Some(body_template) = &cfg.body {
        let resolved_body = resolve_body(body_template, ctx);
        request = request.json(&resolved_body);
    }

    let response = request.send().await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            let message = ctx.mask(&e.to_string());
            return Err(OrchestratorError::step_failure(step_id, format!("request failed: {message}"), cfg.fail_on_error));
        }
    };

    let status = response.status().as_u16();
    let headers: serde_json::Map<String, JsonValue> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
        .collect();

    let body_text = response.text().await.unwrap_or_default();
    let body: JsonValue = serde_json::from_str(&body_text).unwrap_or(JsonValue::Null);
    let masked_body = mask_json(&body, ctx);
    let masked_text = ctx.mask(&body_text);

    if status >= 400 && cfg.fail_on_error {
        return Err(OrchestratorError::step_failure(step_id, format!("HTTP {status} response"), true));
    }

    Ok(json!({
        "status": status,
        "headers": headers,
        "body": masked_body,
        "text": masked_text,
    }))
}

/// Templates inside a JSON body can appear at any depth; walk the value and
/// resolve string leaves through the interpolation engine, matching spec
/// §4.2's rule that interpolation isn't limited to top-level string fields.
fn resolve_body(value: &JsonValue, ctx: &mut ExecutionContext) -> JsonValue {
    match value {
        JsonValue::String(s) => ctx.resolve(s),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(|v| resolve_body(v, ctx)).collect()),
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_body(v, ctx));
            }
            JsonValue::Object(out)
        }
        other => other.clone(),
    }
}

fn mask_json(value: &JsonValue, ctx: &ExecutionContext) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(ctx.mask(s)),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(|v| mask_json(v, ctx)).collect()),
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), mask_json(v, ctx));
            }
            JsonValue::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_registry::ProcessRegistry;
    use crate::run::Run;
    use crate::workflow::WorkflowDescription;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn deps() -> StepDeps {
        StepDeps {
            environment: Arc::new(crate::ports::StaticEnvironment::new(Arc::new(crate::ports::TracingLogger))),
            http_client: reqwest::Client::new(),
            process_registry: Arc::new(ProcessRegistry::new()),
            file_roots: vec![],
        }
    }

    fn ctx() -> ExecutionContext {
        let run = Run::new("wf", HashMap::new());
        let wf = WorkflowDescription {
            id: "wf".to_string(),
            inputs: HashMap::new(),
            secrets: Default::default(),
            steps: vec![],
            on_failure: vec![],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        };
        ExecutionContext::new(&run, &wf, HashMap::new())
    }

    #[tokio::test]
    async fn fetches_a_mocked_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let cfg = HttpConfig {
            method: "GET".to_string(),
            url: format!("{}/ping", server.url()),
            headers: HashMap::new(),
            body: None,
            timeout: 5,
            fail_on_error: true,
        };
        let mut c = ctx();
        let out = execute("ping", &cfg, &mut c, &deps()).await.unwrap();
        assert_eq!(out["status"], json!(200));
        assert_eq!(out["body"]["ok"], json!(true));
        assert_eq!(out["text"], json!(r#"{"ok":true}"#));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_json_body_leaves_body_null_but_keeps_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/plain").with_status(200).with_body("not json").create_async().await;

        let cfg = HttpConfig {
            method: "GET".to_string(),
            url: format!("{}/plain", server.url()),
            headers: HashMap::new(),
            body: None,
            timeout: 5,
            fail_on_error: true,
        };
        let mut c = ctx();
        let out = execute("plain", &cfg, &mut c, &deps()).await.unwrap();
        assert_eq!(out["body"], JsonValue::Null);
        assert_eq!(out["text"], json!("not json"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejects_ssrf_target_before_sending() {
        let cfg = HttpConfig {
            method: "GET".to_string(),
            url: "http://169.254.169.254/latest/meta-data/".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: 5,
            fail_on_error: true,
        };
        let mut c = ctx();
        let err = execute("ssrf", &cfg, &mut c, &deps()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::SecurityPolicyViolation(_)));
    }
}
