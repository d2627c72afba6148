// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `eval` step: runs a sandboxed `rhai` script (spec §4.4) against a
//! read-only snapshot of the run's `inputs` and `steps` scopes.

use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::sandbox;
use crate::value::JsonValue;
use crate::workflow::EvalConfig;

pub async fn execute(step_id: &str, cfg: &EvalConfig, ctx: &mut ExecutionContext) -> Result<JsonValue> {
    let inputs: serde_json::Map<String, JsonValue> = ctx.inputs().clone().into_iter().collect();
    let steps: serde_json::Map<String, JsonValue> = ctx.steps_snapshot().into_iter().collect();

    let outcome = sandbox::run_eval(
        step_id,
        &cfg.script,
        Duration::from_secs(cfg.script_timeout),
        JsonValue::Object(inputs),
        JsonValue::Object(steps),
        JsonValue::Object(Default::default()),
    )
    .await?;

    for line in &outcome.logs {
        tracing::info!(step_id, "{}", ctx.mask(line));
    }

    // A script result shaped like `{workflow: <...>}` is a dynamic
    // sub-workflow request (spec §4.1/§4.4/§4.5 point 7) and passes through
    // unwrapped so the coordinator's bridge can recognize it; everything
    // else is an ordinary result wrapped per the `eval` row's `{result}`
    // output shape.
    let is_subworkflow_request = outcome.value.as_object().is_some_and(|o| o.contains_key("workflow"));
    if is_subworkflow_request {
        Ok(outcome.value)
    } else {
        Ok(serde_json::json!({ "result": outcome.value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::Run;
    use crate::workflow::WorkflowDescription;
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn evaluates_a_script_against_inputs() {
        let mut inputs = HashMap::new();
        inputs.insert("count".to_string(), json!(2));
        let run = Run::new("wf", inputs);
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

        let cfg = EvalConfig {
            script: "inputs.count * 10".to_string(),
            script_timeout: 5,
        };
        let out = execute("double", &cfg, &mut ctx).await.unwrap();
        assert_eq!(out, json!({"result": 20}));
    }

    #[tokio::test]
    async fn dynamic_workflow_request_passes_through_unwrapped() {
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

        let cfg = EvalConfig {
            script: r#"#{ workflow: #{ id: "child" }, inputs: #{} }"#.to_string(),
            script_timeout: 5,
        };
        let out = execute("spawn", &cfg, &mut ctx).await.unwrap();
        assert!(out.as_object().unwrap().contains_key("workflow"));
        assert!(!out.as_object().unwrap().contains_key("result"));
    }
}
