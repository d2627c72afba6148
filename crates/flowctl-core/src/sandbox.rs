// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `eval` step's sandbox (spec §4.4): runs a short script against a
//! read-only snapshot of `inputs`/`steps`/`env` and returns a JSON value.
//!
//! `rhai` has no file or network facility in its standard library and none
//! is registered here, so the sandbox is allow-list-first by construction:
//! a script can only do what the handful of bound globals and rhai's own
//! expression language let it do. Operation and depth limits turn a runaway
//! script into a `SandboxViolation` instead of a hung worker; the wall-clock
//! timeout is enforced a layer up, around the blocking task this module runs on.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rhai::Engine;

use crate::error::{OrchestratorError, Result};
use crate::value::JsonValue;

/// A completed eval script's result: the script's final expression value,
/// plus anything it wrote with `print`/`log`, in order.
#[derive(Debug)]
pub struct EvalOutcome {
    pub value: JsonValue,
    pub logs: Vec<String>,
}

fn build_engine(log_sink: Arc<Mutex<Vec<String>>>) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(2_000_000);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_string_size(1 << 20);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);

    let sink = log_sink.clone();
    engine.on_print(move |s| sink.lock().push(s.to_string()));
    let sink = log_sink;
    engine.on_debug(move |s, _src, _pos| sink.lock().push(s.to_string()));

    engine
}

/// Runs `script` on a blocking thread (rhai evaluation is synchronous) and
/// races it against `timeout`. A script that exceeds the operation/depth
/// limits, references an unbound symbol, or returns a value that doesn't
/// round-trip through JSON surfaces as `OrchestratorError::SandboxViolation`,
/// matching spec §4.4's "blocked facility or malformed output" contract.
pub async fn run_eval(
    step_id: &str,
    script: &str,
    timeout: Duration,
    inputs: JsonValue,
    steps: JsonValue,
    env: JsonValue,
) -> Result<EvalOutcome> {
    let script = script.to_string();
    let step_id_owned = step_id.to_string();
    let step_id_for_timeout = step_id.to_string();
    let logs = Arc::new(Mutex::new(Vec::new()));
    let logs_for_task = logs.clone();

    let task = tokio::task::spawn_blocking(move || -> Result<JsonValue> {
        let engine = build_engine(logs_for_task);
        let mut scope = rhai::Scope::new();
        scope.push_constant(
            "inputs",
            rhai::serde::to_dynamic(&inputs).map_err(|e| sandbox_err(&step_id_owned, format!("inputs binding: {e}")))?,
        );
        scope.push_constant(
            "steps",
            rhai::serde::to_dynamic(&steps).map_err(|e| sandbox_err(&step_id_owned, format!("steps binding: {e}")))?,
        );
        scope.push_constant(
            "env",
            rhai::serde::to_dynamic(&env).map_err(|e| sandbox_err(&step_id_owned, format!("env binding: {e}")))?,
        );

        let result: rhai::Dynamic = engine
            .eval_with_scope(&mut scope, &script)
            .map_err(|e| sandbox_err(&step_id_owned, e.to_string()))?;

        rhai::serde::from_dynamic::<JsonValue>(&result)
            .map_err(|e| sandbox_err(&step_id_owned, format!("script result is not JSON-representable: {e}")))
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(inner)) => inner.map(|value| EvalOutcome {
            value,
            logs: Arc::try_unwrap(logs).map(|m| m.into_inner()).unwrap_or_default(),
        }),
        Ok(Err(join_err)) => Err(sandbox_err(&step_id_for_timeout, format!("eval task panicked: {join_err}"))),
        Err(_) => Err(sandbox_err(&step_id_for_timeout, format!("eval exceeded {timeout:?} timeout"))),
    }
}

fn sandbox_err(step_id: &str, message: String) -> OrchestratorError {
    OrchestratorError::SandboxViolation {
        step_id: step_id.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn evaluates_a_simple_expression() {
        let outcome = run_eval(
            "calc",
            "inputs.x + inputs.y",
            Duration::from_secs(1),
            json!({"x": 2, "y": 3}),
            json!({}),
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, json!(5));
    }

    #[tokio::test]
    async fn captures_print_output_as_logs() {
        let outcome = run_eval(
            "logger",
            r#"print("hello from script"); 1"#,
            Duration::from_secs(1),
            json!({}),
            json!({}),
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(outcome.logs, vec!["hello from script".to_string()]);
    }

    #[tokio::test]
    async fn unbound_symbol_is_a_sandbox_violation() {
        let err = run_eval("bad", "std::fs::read(\"/etc/passwd\")", Duration::from_secs(1), json!({}), json!({}), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SandboxViolation { .. }));
    }

    #[tokio::test]
    async fn runaway_loop_trips_the_operation_limit() {
        let err = run_eval("loop", "let x = 0; loop { x += 1; }", Duration::from_secs(5), json!({}), json!({}), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SandboxViolation { .. }));
    }
}
