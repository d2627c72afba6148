// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution context (spec §4.1): threads `inputs`, `steps`, `env`, and
//! `run` through interpolation and condition evaluation for one run, and
//! accumulates the secret values seen along the way for later masking.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::interpolation::{resolve_template, resolve_template_string, TemplateScope};
use crate::run::Run;
use crate::value::{JsonValue, SecretValues};
use crate::workflow::WorkflowDescription;

/// Per-run interpolation state. Not `Send`-shared: the coordinator owns one
/// per in-flight run and threads it through step dispatch sequentially
/// within a layer's join point (spec §9, "arena-free ownership").
pub struct ExecutionContext {
    run_id: Uuid,
    run_id_str: String,
    workflow_id: String,
    started_at_str: String,
    inputs: HashMap<String, JsonValue>,
    steps: HashMap<String, JsonValue>,
    env: HashMap<String, String>,
    secret_input_names: HashSet<String>,
    secrets: SecretValues,
}

impl ExecutionContext {
    pub fn new(run: &Run, workflow: &WorkflowDescription, env: HashMap<String, String>) -> Self {
        let mut steps = HashMap::new();
        for (id, result) in &run.step_results {
            if let Some(output) = &result.output {
                steps.insert(id.clone(), output.clone());
            }
        }
        Self {
            run_id: run.run_id,
            run_id_str: run.run_id.to_string(),
            workflow_id: workflow.id.clone(),
            started_at_str: run.started_at.to_rfc3339(),
            inputs: run.inputs.clone(),
            steps,
            env,
            secret_input_names: workflow.secrets.clone(),
            secrets: SecretValues::new(),
        }
    }

    /// Injects the triggering failure as `{{inputs.error.message}}` /
    /// `{{inputs.error.stepId}}` for a cleanup block's steps (spec §4.5:
    /// onFailure/finally "receive ... an `error` substructure `{message,
    /// stepId}` injected into `inputs`").
    pub fn set_error(&mut self, step_id: impl Into<String>, message: impl Into<String>) {
        self.inputs.insert(
            "error".to_string(),
            serde_json::json!({
                "message": message.into(),
                "stepId": step_id.into(),
            }),
        );
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn scope(&self) -> TemplateScope<'_> {
        TemplateScope {
            inputs: &self.inputs,
            steps: &self.steps,
            env: &self.env,
            run_id: &self.run_id_str,
            workflow_id: &self.workflow_id,
            started_at: &self.started_at_str,
            secret_input_names: &self.secret_input_names,
        }
    }

    /// Resolves `template`, preserving its type if it is a single bare
    /// expression (spec §4.1), and folds any secret values it touched into
    /// the run-wide mask set.
    pub fn resolve(&mut self, template: &str) -> JsonValue {
        let resolved = {
            let scope = self.scope();
            resolve_template(template, &scope)
        };
        self.secrets.extend(&resolved.secrets);
        resolved.value
    }

    /// Resolves `template` to a string, for fields that are always textual
    /// (shell commands, URLs, file paths).
    pub fn resolve_string(&mut self, template: &str) -> String {
        let (value, secrets) = {
            let scope = self.scope();
            resolve_template_string(template, &scope)
        };
        self.secrets.extend(&secrets);
        value
    }

    /// Evaluates a step's `condition` field. Absent conditions are always
    /// true (spec §4.1: a step with no condition always runs).
    pub fn evaluate_condition(&mut self, condition: Option<&str>) -> bool {
        match condition {
            None => true,
            Some(expr) => is_truthy(&self.resolve(expr)),
        }
    }

    pub fn set_output(&mut self, step_id: &str, value: JsonValue) {
        self.steps.insert(step_id.to_string(), value);
    }

    /// Injects a per-iteration binding into `inputs` (spec §4.1: an
    /// iterator's nested context injects `inputs.item`/`inputs.index`).
    pub fn set_input(&mut self, name: &str, value: JsonValue) {
        self.inputs.insert(name.to_string(), value);
    }

    /// Snapshots `inputs` so an iterator step can restore the outer scope's
    /// bindings once an iteration's `item`/`index` go out of scope.
    pub fn inputs_snapshot(&self) -> HashMap<String, JsonValue> {
        self.inputs.clone()
    }

    pub fn restore_inputs_snapshot(&mut self, snapshot: HashMap<String, JsonValue>) {
        self.inputs = snapshot;
    }

    pub fn step_output(&self, step_id: &str) -> Option<&JsonValue> {
        self.steps.get(step_id)
    }

    /// Snapshots the current `steps` scope so an iterator step can bind a
    /// per-iteration `item`/`index` and run its inner steps without leaking
    /// them into the outer scope (spec §9 open question: inner `runSteps`
    /// outputs stay scoped to the iteration).
    pub fn steps_snapshot(&self) -> HashMap<String, JsonValue> {
        self.steps.clone()
    }

    pub fn restore_steps_snapshot(&mut self, snapshot: HashMap<String, JsonValue>) {
        self.steps = snapshot;
    }

    pub fn inputs(&self) -> &HashMap<String, JsonValue> {
        &self.inputs
    }

    pub fn secrets(&self) -> &SecretValues {
        &self.secrets
    }

    /// Masks every secret value accumulated so far out of `text`, for
    /// anything about to reach a log sink (spec §6.3).
    pub fn mask(&self, text: &str) -> String {
        self.secrets.mask(text)
    }
}

/// Truthiness for condition expressions (spec §4.1/§8): the resolved value
/// is stringified via the same rules used for string-context interpolation,
/// and only an exact match against `"false"`, `"0"`, or `""` skips the step
/// — every other string form, including `"[]"`/`"{}"`, proceeds.
pub fn is_truthy(value: &JsonValue) -> bool {
    !matches!(crate::value::format_for_string_context(value).as_str(), "false" | "0" | "")
}

/// Convenience used by the coordinator when it needs `run.started_at` as an
/// RFC 3339 string outside of a full `ExecutionContext` (e.g. persistence).
pub fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet as Set;

    fn workflow() -> WorkflowDescription {
        WorkflowDescription {
            id: "wf".to_string(),
            inputs: HashMap::new(),
            secrets: Set::from(["password".to_string()]),
            steps: vec![],
            on_failure: vec![],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn resolves_input_and_tracks_secret() {
        let mut inputs = HashMap::new();
        inputs.insert("password".to_string(), json!("hunter2"));
        let run = Run::new("wf", inputs);
        let mut ctx = ExecutionContext::new(&run, &workflow(), HashMap::new());

        let value = ctx.resolve_string("token={{inputs.password}}");
        assert_eq!(value, "token=hunter2");
        assert_eq!(ctx.mask(&value), "token=h***REDACTED***");
    }

    #[test]
    fn condition_defaults_to_true() {
        let run = Run::new("wf", HashMap::new());
        let mut ctx = ExecutionContext::new(&run, &workflow(), HashMap::new());
        assert!(ctx.evaluate_condition(None));
    }

    #[test]
    fn condition_evaluates_step_output_truthiness() {
        let run = Run::new("wf", HashMap::new());
        let mut ctx = ExecutionContext::new(&run, &workflow(), HashMap::new());
        ctx.set_output("check", json!(false));
        assert!(!ctx.evaluate_condition(Some("{{steps.check}}")));
        ctx.set_output("check", json!(true));
        assert!(ctx.evaluate_condition(Some("{{steps.check}}")));
    }

    #[test]
    fn set_error_injects_into_inputs() {
        let run = Run::new("wf", HashMap::new());
        let mut ctx = ExecutionContext::new(&run, &workflow(), HashMap::new());
        assert_eq!(ctx.resolve("{{inputs.error.message}}"), JsonValue::Null);

        ctx.set_error("build", "boom");
        assert_eq!(ctx.resolve("{{inputs.error.message}}"), json!("boom"));
        assert_eq!(ctx.resolve("{{inputs.error.stepId}}"), json!("build"));
    }

    #[test]
    fn truthy_rules_match_spec() {
        // Exact-string skip literals.
        assert!(!is_truthy(&JsonValue::Null));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("false")));
        assert!(!is_truthy(&json!("0")));

        // Everything else proceeds, including empty composites: their JSON
        // text form ("[]"/"{}") doesn't match any skip literal.
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!(true)));
    }
}
