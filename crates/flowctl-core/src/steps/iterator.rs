// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `iterator` step: runs its inner step (or steps) once per item of a
//! resolved sequence. Each iteration gets a nested context (spec §4.1) where
//! `inputs.item`/`inputs.index` are injected; inner step outputs are visible
//! to sibling inner steps within the same iteration via `steps.<id>`. Per
//! spec §9's open question, none of this leaks into the outer run's
//! `inputs`/`steps` scopes once the iterator step itself completes.

use serde_json::json;

use super::{StepDeps, StepResult};
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::value::JsonValue;
use crate::workflow::IteratorConfig;

pub async fn execute(step_id: &str, cfg: &IteratorConfig, ctx: &mut ExecutionContext, deps: &StepDeps) -> Result<JsonValue> {
    let items_value = ctx.resolve(&cfg.items);
    let items = items_value
        .as_array()
        .cloned()
        .ok_or_else(|| OrchestratorError::step_failure(step_id, "iterator 'items' did not resolve to an array", true))?;

    let single = cfg.run_step.is_some();
    let mut results = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let steps_snapshot = ctx.steps_snapshot();
        let inputs_snapshot = ctx.inputs_snapshot();
        ctx.set_input("item", item);
        ctx.set_input("index", json!(index));

        let mut iteration_output = if single { JsonValue::Null } else { JsonValue::Object(Default::default()) };

        for inner in cfg.inner_steps() {
            if !ctx.evaluate_condition(inner.condition.as_deref()) {
                continue;
            }
            let outcome = Box::pin(super::execute(inner, ctx, deps)).await;
            let value = match outcome {
                Ok(StepResult::Output(value)) => value,
                Ok(StepResult::Suspend(_)) => {
                    ctx.restore_steps_snapshot(steps_snapshot);
                    ctx.restore_inputs_snapshot(inputs_snapshot);
                    return Err(OrchestratorError::step_failure(
                        step_id,
                        format!("inner step '{}' attempted to suspend; suspend is not allowed inside an iterator", inner.id),
                        true,
                    ));
                }
                Err(e) => {
                    ctx.restore_steps_snapshot(steps_snapshot);
                    ctx.restore_inputs_snapshot(inputs_snapshot);
                    return Err(e);
                }
            };
            ctx.set_output(&inner.id, value.clone());
            if single {
                iteration_output = value;
            } else if let Some(map) = iteration_output.as_object_mut() {
                map.insert(inner.id.clone(), value);
            }
        }

        results.push(iteration_output);
        ctx.restore_steps_snapshot(steps_snapshot);
        ctx.restore_inputs_snapshot(inputs_snapshot);
    }

    let count = results.len();
    Ok(json!({ "results": results, "count": count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_registry::ProcessRegistry;
    use crate::run::Run;
    use crate::workflow::{StepDefinition, StepKind, WorkflowDescription};
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

    fn ctx_with_inputs(items: JsonValue) -> ExecutionContext {
        let mut inputs = HashMap::new();
        inputs.insert("items".to_string(), items);
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
        ExecutionContext::new(&run, &wf, HashMap::new())
    }

    #[tokio::test]
    async fn single_run_step_produces_one_output_per_item() {
        let mut c = ctx_with_inputs(json!([1, 2, 3]));
        let inner = StepDefinition {
            id: "double".to_string(),
            after: vec![],
            condition: None,
            timeout: None,
            description: None,
            kind: StepKind::Eval(crate::workflow::EvalConfig {
                script: "inputs.item * 2".to_string(),
                script_timeout: 5,
            }),
        };
        let cfg = IteratorConfig {
            items: "{{inputs.items}}".to_string(),
            run_step: Some(Box::new(inner)),
            run_steps: None,
        };
        let out = execute("double_all", &cfg, &mut c, &deps()).await.unwrap();
        assert_eq!(out["count"], json!(3));
        let results = out["results"].as_array().unwrap();
        // Each item is wrapped by the eval step's own `{result}` output shape.
        assert_eq!(results[0]["result"], json!(2));
        assert_eq!(results[1]["result"], json!(4));
        assert_eq!(results[2]["result"], json!(6));
    }

    #[tokio::test]
    async fn iteration_outputs_do_not_leak_into_outer_scope() {
        let mut c = ctx_with_inputs(json!([1]));
        let inner = StepDefinition {
            id: "inner_only".to_string(),
            after: vec![],
            condition: None,
            timeout: None,
            description: None,
            kind: StepKind::Wait(crate::workflow::WaitConfig { duration_ms: 1 }),
        };
        let cfg = IteratorConfig {
            items: "{{inputs.items}}".to_string(),
            run_step: Some(Box::new(inner)),
            run_steps: None,
        };
        execute("each", &cfg, &mut c, &deps()).await.unwrap();
        assert!(c.step_output("inner_only").is_none());
        assert!(!c.inputs().contains_key("item"));
        assert!(!c.inputs().contains_key("index"));
    }

    #[tokio::test]
    async fn empty_collection_yields_empty_results_and_zero_count() {
        let mut c = ctx_with_inputs(json!([]));
        let inner = StepDefinition {
            id: "noop".to_string(),
            after: vec![],
            condition: None,
            timeout: None,
            description: None,
            kind: StepKind::Wait(crate::workflow::WaitConfig { duration_ms: 1 }),
        };
        let cfg = IteratorConfig {
            items: "{{inputs.items}}".to_string(),
            run_step: Some(Box::new(inner)),
            run_steps: None,
        };
        let out = execute("none", &cfg, &mut c, &deps()).await.unwrap();
        assert_eq!(out, json!({"results": [], "count": 0}));
    }
}
