// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `tool` step: dispatches to a named tool on the environment port.

use super::StepDeps;
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::value::JsonValue;
use crate::workflow::ToolConfig;

pub async fn execute(step_id: &str, cfg: &ToolConfig, ctx: &mut ExecutionContext, deps: &StepDeps) -> Result<JsonValue> {
    let args = resolve_args(&cfg.args, ctx);
    let result = deps
        .environment
        .call_tool(&cfg.tool, args)
        .await
        .map_err(|e| OrchestratorError::step_failure(step_id, e.to_string(), true))?;
    Ok(serde_json::json!({ "result": result }))
}

fn resolve_args(value: &JsonValue, ctx: &mut ExecutionContext) -> JsonValue {
    match value {
        JsonValue::String(s) => ctx.resolve(s),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(|v| resolve_args(v, ctx)).collect()),
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_args(v, ctx));
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
    use crate::ports::{EnvironmentError, StaticEnvironment, ToolHandler, TracingLogger};
    use crate::run::Run;
    use crate::workflow::WorkflowDescription;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct UppercaseTool;

    #[async_trait]
    impl ToolHandler for UppercaseTool {
        async fn execute(&self, args: JsonValue) -> std::result::Result<JsonValue, EnvironmentError> {
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn calls_the_registered_tool() {
        let env = Arc::new(StaticEnvironment::new(Arc::new(TracingLogger)).with_tool("uppercase", Arc::new(UppercaseTool)));
        let deps = StepDeps {
            environment: env,
            http_client: reqwest::Client::new(),
            process_registry: Arc::new(ProcessRegistry::new()),
            file_roots: vec![],
        };

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
        let mut ctx = ExecutionContext::new(&run, &wf, HashMap::new());

        let cfg = ToolConfig {
            tool: "uppercase".to_string(),
            args: json!({ "text": "hi" }),
        };
        let out = execute("shout", &cfg, &mut ctx, &deps).await.unwrap();
        assert_eq!(out["result"], json!("HI"));
    }
}
