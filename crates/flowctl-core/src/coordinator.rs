// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run coordinator (spec §4.5): submits, drives, suspends, resumes,
//! cancels, and cleans up runs of a compiled workflow, including the
//! sub-workflow bridge for dynamically generated child workflows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use uuid::Uuid;

use crate::compiler::{self, CompiledWorkflow};
use crate::context::ExecutionContext;
use crate::error::{MissingInput, OrchestratorError, Result};
use crate::ports::PersistentStorePort;
use crate::run::{Run, RunStatus, StepResultEntry};
use crate::steps::{self, StepDeps, StepResult};
use crate::value::{is_present, JsonValue};
use crate::workflow::{StepKind, WorkflowDescription};
use crate::{metrics, retry};

/// The outcome of running one step within a layer, before it's folded back
/// into the shared `Run`.
enum LayerStepOutcome {
    AlreadyRecorded,
    Skipped(JsonValue, chrono::DateTime<Utc>, chrono::DateTime<Utc>),
    Completed(JsonValue, chrono::DateTime<Utc>, chrono::DateTime<Utc>),
    Suspended(JsonValue, chrono::DateTime<Utc>, chrono::DateTime<Utc>),
    Failed(OrchestratorError, chrono::DateTime<Utc>, chrono::DateTime<Utc>),
}

pub struct Coordinator {
    store: Arc<dyn PersistentStorePort>,
    deps: StepDeps,
    cancellations: DashMap<Uuid, Arc<AtomicBool>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn PersistentStorePort>, deps: StepDeps) -> Self {
        Self {
            store,
            deps,
            cancellations: DashMap::new(),
        }
    }

    /// Validates inputs, creates and persists a `Pending` run, then drives it
    /// to completion or suspension (spec §4.5). Driving synchronously keeps
    /// the coordinator's state machine in one place rather than splitting it
    /// across a submit call and a detached worker loop; callers that want
    /// fire-and-forget semantics spawn this themselves.
    pub async fn submit(&self, workflow: Arc<CompiledWorkflow>, inputs: HashMap<String, JsonValue>) -> Result<Run> {
        validate_inputs(&workflow.description, &inputs)?;
        let mut run = Run::new(workflow.workflow_id(), inputs);
        self.persist_save(&run).await;
        run.mark_running();
        self.persist_update(&run).await;
        self.cancellations.insert(run.run_id, Arc::new(AtomicBool::new(false)));
        self.drive(run, workflow).await
    }

    /// Reattaches a suspended run's resume payload as the suspended step's
    /// output and drives it onward (spec §4.5).
    pub async fn resume(&self, run_id: Uuid, workflow: Arc<CompiledWorkflow>, payload: JsonValue) -> Result<Run> {
        let mut run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(run_id.to_string()))?;

        if run.status != RunStatus::Suspended {
            return Err(OrchestratorError::validation(format!("run '{run_id}' is not suspended")));
        }
        let step_id = run
            .current_step_id
            .clone()
            .ok_or_else(|| OrchestratorError::other("suspended run is missing its current_step_id"))?;
        let step = workflow
            .step(&step_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("step '{step_id}'")))?;

        if let StepKind::Suspend(cfg) = &step.kind {
            if let Err(missing) = steps::suspend::validate_resume_payload(cfg, &payload) {
                return Err(OrchestratorError::validation(format!(
                    "resume payload is missing required keys: {missing:?}"
                )));
            }
        }

        let now = Utc::now();
        run.step_results
            .insert(step_id, StepResultEntry::success(json!({"resumed": true, "data": payload}), now, now));
        run.mark_resuming();
        self.persist_update(&run).await;
        self.cancellations.entry(run.run_id).or_insert_with(|| Arc::new(AtomicBool::new(false)));
        self.drive(run, workflow).await
    }

    /// Requests cancellation. Checked between layers; a step already
    /// in-flight on this layer still runs to completion (spec §5 notes the
    /// process registry's `terminate_all` as the hard stop for shell
    /// children specifically, used here too).
    pub fn cancel(&self, run_id: Uuid) {
        if let Some(flag) = self.cancellations.get(&run_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn cancel_flag(&self, run_id: Uuid) -> Arc<AtomicBool> {
        self.cancellations.entry(run_id).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone()
    }

    /// Persists a run write with the spec §5/§7 busy-retry policy. A write
    /// that still fails after retries is logged and swallowed rather than
    /// aborting the drive: a transient store outage shouldn't destroy a live
    /// run that's otherwise progressing correctly in memory.
    async fn persist_save(&self, run: &Run) {
        if let Err(e) = with_store_retry(|| self.store.save_run(run)).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "failed to persist new run after retries; continuing in-memory");
        }
    }

    async fn persist_update(&self, run: &Run) {
        if let Err(e) = with_store_retry(|| self.store.update_run(run)).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "failed to persist run update after retries; continuing in-memory");
        }
    }

    async fn drive(&self, mut run: Run, workflow: Arc<CompiledWorkflow>) -> Result<Run> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let cancel_flag = self.cancel_flag(run.run_id);

        for layer in &workflow.plan.layers {
            if cancel_flag.load(Ordering::SeqCst) {
                return self.finish(run, &workflow, &env, RunStatus::Cancelled, Some("run cancelled".to_string()), None).await;
            }

            let outcomes = self.execute_layer(&run, &workflow, layer, &env).await;

            let mut suspend: Option<(String, JsonValue)> = None;
            let mut failure: Option<(String, OrchestratorError)> = None;

            for (step_id, outcome) in outcomes {
                match outcome {
                    LayerStepOutcome::AlreadyRecorded => {}
                    LayerStepOutcome::Skipped(output, started, completed) => {
                        run.step_results.insert(step_id, StepResultEntry::skipped(output, started, completed));
                    }
                    LayerStepOutcome::Completed(value, started, completed) => {
                        run.step_results.insert(step_id, StepResultEntry::success(value, started, completed));
                    }
                    LayerStepOutcome::Suspended(data, started, completed) => {
                        run.step_results
                            .insert(step_id.clone(), StepResultEntry::success(json!({"suspended": true}), started, completed));
                        if suspend.is_none() {
                            suspend = Some((step_id, data));
                        }
                    }
                    LayerStepOutcome::Failed(err, started, completed) => {
                        run.step_results.insert(step_id.clone(), StepResultEntry::failed(err.to_string(), started, completed));
                        if failure.is_none() {
                            failure = Some((step_id, err));
                        }
                    }
                }
            }

            self.persist_update(&run).await;

            if let Some((step_id, data)) = suspend {
                run.mark_suspended(step_id, data);
                self.persist_update(&run).await;
                return Ok(run);
            }

            if let Some((step_id, err)) = failure {
                return self.finish(run, &workflow, &env, RunStatus::Failed, Some(err.to_string()), Some(step_id)).await;
            }
        }

        if let Err((step_id, err)) = self.bridge_subworkflows(&mut run, &workflow).await {
            return self.finish(run, &workflow, &env, RunStatus::Failed, Some(err.to_string()), Some(step_id)).await;
        }

        self.finish(run, &workflow, &env, RunStatus::Completed, None, None).await
    }

    async fn execute_layer(
        &self,
        run: &Run,
        workflow: &Arc<CompiledWorkflow>,
        layer: &[String],
        env: &HashMap<String, String>,
    ) -> Vec<(String, LayerStepOutcome)> {
        let mut handles = Vec::with_capacity(layer.len());

        for step_id in layer {
            let Some(step) = workflow.step(step_id) else { continue };
            let step = step.clone();
            let run_snapshot = run.clone();
            let description = workflow.description.clone();
            let env = env.clone();
            let deps = self.deps.clone();
            let prior = run.prior_result(step_id).cloned();

            handles.push(tokio::spawn(async move {
                let started_at = Utc::now();
                if prior.is_some() {
                    return (step.id.clone(), LayerStepOutcome::AlreadyRecorded);
                }

                let mut ctx = ExecutionContext::new(&run_snapshot, &description, env);
                if !ctx.evaluate_condition(step.condition.as_deref()) {
                    return (step.id.clone(), LayerStepOutcome::Skipped(step.kind.skipped_output(), started_at, Utc::now()));
                }

                let dispatch = steps::execute(&step, &mut ctx, &deps);
                let result = match step.timeout {
                    Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), dispatch).await {
                        Ok(r) => r,
                        Err(_) => Err(OrchestratorError::Timeout(Duration::from_secs(secs))),
                    },
                    None => dispatch.await,
                };
                let completed_at = Utc::now();

                let outcome = match result {
                    Ok(StepResult::Output(value)) => LayerStepOutcome::Completed(value, started_at, completed_at),
                    Ok(StepResult::Suspend(data)) => LayerStepOutcome::Suspended(data, started_at, completed_at),
                    Err(e) => LayerStepOutcome::Failed(e, started_at, completed_at),
                };
                (step.id, outcome)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(pair) => results.push(pair),
                Err(join_err) => results.push((
                    "<unknown>".to_string(),
                    LayerStepOutcome::Failed(OrchestratorError::other(format!("step task panicked: {join_err}")), Utc::now(), Utc::now()),
                )),
            }
        }
        results
    }

    /// Scans the finished main plan's results once, after its final layer
    /// (spec §4.5 point 7), for `eval` steps whose output is shaped like a
    /// sub-workflow request (`{"workflow": <description>, "inputs": {...}}`),
    /// and drives each to completion in place before the run is handed to
    /// `finish` (spec §9: child cleanup runs before parent cleanup,
    /// satisfied here because `run_sub_workflow` fully drives the child,
    /// including its own `finish`, before returning). A bridged child's
    /// failure fails the parent run at that step, same as any other step.
    async fn bridge_subworkflows(&self, run: &mut Run, workflow: &Arc<CompiledWorkflow>) -> std::result::Result<(), (String, OrchestratorError)> {
        let step_ids: Vec<String> = run.step_results.keys().cloned().collect();
        for step_id in step_ids {
            let Some(step) = workflow.step(&step_id) else { continue };
            if !matches!(step.kind, StepKind::Eval(_)) {
                continue;
            }
            let Some(entry) = run.step_results.get(&step_id) else { continue };
            let Some(value) = entry.output.clone() else { continue };
            let Some((description, inputs)) = as_subworkflow_request(&value) else { continue };
            let started_at = entry.started_at;

            match self.run_sub_workflow(run.run_id, description, inputs).await {
                Ok(bridged) => {
                    run.step_results.insert(step_id, StepResultEntry::success(bridged, started_at, Utc::now()));
                }
                Err(e) => {
                    run.step_results.insert(step_id.clone(), StepResultEntry::failed(e.to_string(), started_at, Utc::now()));
                    return Err((step_id, e));
                }
            }
        }
        Ok(())
    }

    async fn run_sub_workflow(&self, parent_run_id: Uuid, description: WorkflowDescription, inputs: HashMap<String, JsonValue>) -> Result<JsonValue> {
        let compiled = Arc::new(compiler::compile(description)?);
        validate_inputs(&compiled.description, &inputs)?;

        let mut child = Run::new(compiled.workflow_id(), inputs);
        child.parent_run_id = Some(parent_run_id);
        child.mark_running();
        self.persist_save(&child).await;
        self.cancellations.entry(child.run_id).or_insert_with(|| Arc::new(AtomicBool::new(false)));

        let finished = Box::pin(self.drive(child, compiled)).await?;

        match finished.status {
            RunStatus::Completed => {
                let step_results: serde_json::Map<String, JsonValue> = finished
                    .step_results
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.output.clone().unwrap_or(JsonValue::Null)))
                    .collect();
                Ok(json!({
                    "runId": finished.run_id,
                    "status": "completed",
                    "stepResults": step_results,
                }))
            }
            other => Err(OrchestratorError::other(format!(
                "sub-workflow '{}' ended in status {:?}: {}",
                finished.workflow_id,
                other,
                finished.error.unwrap_or_default()
            ))),
        }
    }

    async fn finish(
        &self,
        mut run: Run,
        workflow: &Arc<CompiledWorkflow>,
        env: &HashMap<String, String>,
        status: RunStatus,
        error: Option<String>,
        failed_step_id: Option<String>,
    ) -> Result<Run> {
        // Visible to onFailure/finally templates as `{{inputs.error.message}}`
        // / `{{inputs.error.stepId}}` (spec §4.5); absent on a clean run.
        let error_ctx = match (&error, &failed_step_id) {
            (Some(message), Some(step_id)) => Some((step_id.clone(), message.clone())),
            _ => None,
        };

        if status == RunStatus::Failed {
            self.run_cleanup_block(&mut run, workflow, env, &workflow.description.on_failure, error_ctx.clone()).await;
        }
        self.run_cleanup_block(&mut run, workflow, env, &workflow.description.finally, error_ctx).await;

        run.mark_terminal(status, error);
        self.persist_update(&run).await;

        if let Some(completed_at) = run.completed_at {
            let seconds = (completed_at - run.started_at).num_milliseconds().max(0) as f64 / 1000.0;
            metrics::record_run_duration(seconds);
        }

        Ok(run)
    }

    async fn run_cleanup_block(
        &self,
        run: &mut Run,
        workflow: &Arc<CompiledWorkflow>,
        env: &HashMap<String, String>,
        block: &[crate::workflow::StepDefinition],
        error_ctx: Option<(String, String)>,
    ) {
        let mut ctx = ExecutionContext::new(run, &workflow.description, env.clone());
        if let Some((step_id, message)) = error_ctx {
            ctx.set_error(step_id, message);
        }
        for step in block {
            if !ctx.evaluate_condition(step.condition.as_deref()) {
                continue;
            }
            // Stored under a `cleanup:` prefix (spec §8 scenario 4) so a
            // cleanup step can't silently collide with a main-DAG step that
            // happens to share an id in the run's flat step_results map.
            let result_key = format!("cleanup:{}", step.id);
            metrics::record_step_started(step.kind.name());
            let now = Utc::now();
            match steps::execute(step, &mut ctx, &self.deps).await {
                Ok(StepResult::Output(value)) => {
                    // `eval`-with-dynamic-workflow is excluded from cleanup
                    // blocks (spec §4.5): only a script's return shape
                    // reveals this, so the check lives here rather than in
                    // `allowed_in_cleanup`, and it never reaches the
                    // sub-workflow bridge.
                    if matches!(step.kind, StepKind::Eval(_)) && as_subworkflow_request(&value).is_some() {
                        metrics::record_step_completed(step.kind.name(), "failed");
                        let message = format!("eval step '{}' returned a dynamic sub-workflow request, which is not permitted inside a cleanup block", step.id);
                        tracing::warn!(step_id = %step.id, "{}", message);
                        run.step_results.insert(result_key, StepResultEntry::failed(message, now, Utc::now()));
                        continue;
                    }
                    metrics::record_step_completed(step.kind.name(), "success");
                    ctx.set_output(&step.id, value.clone());
                    run.step_results.insert(result_key, StepResultEntry::success(value, now, Utc::now()));
                }
                Ok(StepResult::Suspend(_)) => {
                    // Unreachable: the compiler rejects `suspend` inside
                    // onFailure/finally blocks (spec §4.5).
                }
                Err(e) => {
                    metrics::record_step_completed(step.kind.name(), "failed");
                    tracing::warn!(step_id = %step.id, error = %e, "cleanup step failed");
                    run.step_results.insert(result_key, StepResultEntry::failed(e.to_string(), now, Utc::now()));
                }
            }
        }
    }
}

fn as_subworkflow_request(value: &JsonValue) -> Option<(WorkflowDescription, HashMap<String, JsonValue>)> {
    let obj = value.as_object()?;
    let description_value = obj.get("workflow")?;
    let description: WorkflowDescription = serde_json::from_value(description_value.clone()).ok()?;
    let inputs = obj
        .get("inputs")
        .and_then(|v| v.as_object())
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default();
    Some((description, inputs))
}

/// Validates every declared input is present, non-empty, and type-matched
/// (spec §4.5).
fn validate_inputs(description: &WorkflowDescription, inputs: &HashMap<String, JsonValue>) -> Result<()> {
    let mut missing = Vec::new();
    for (name, input_type) in &description.inputs {
        match inputs.get(name) {
            Some(value) if is_present(value) && input_type.matches(value) => {}
            _ => missing.push(MissingInput {
                name: name.clone(),
                input_type: *input_type,
            }),
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::MissingInputs(missing))
    }
}

/// Retries a persistent-store call against the spec §5 busy-error policy.
pub async fn with_store_retry<T, F, Fut>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let policy = retry::RetryPolicy::persistence_busy();
    retry::retry_with_backoff(&policy, |e: &OrchestratorError| matches!(e, OrchestratorError::Persistence(_)), operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{InMemoryStore, StaticEnvironment, TracingLogger};
    use crate::process_registry::ProcessRegistry;
    use crate::value::InputType;
    use crate::workflow::{EvalConfig, StepDefinition, WaitConfig};
    use std::collections::HashSet;

    fn coordinator() -> Coordinator {
        let deps = StepDeps {
            environment: Arc::new(StaticEnvironment::new(Arc::new(TracingLogger))),
            http_client: reqwest::Client::new(),
            process_registry: Arc::new(ProcessRegistry::new()),
            file_roots: vec![],
        };
        Coordinator::new(Arc::new(InMemoryStore::new()), deps)
    }

    fn wait_step(id: &str, after: &[&str]) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            after: after.iter().map(|s| s.to_string()).collect(),
            condition: None,
            timeout: None,
            description: None,
            kind: StepKind::Wait(WaitConfig { duration_ms: 1 }),
        }
    }

    #[tokio::test]
    async fn runs_a_linear_chain_to_completion() {
        let wf = WorkflowDescription {
            id: "chain".to_string(),
            inputs: HashMap::new(),
            secrets: HashSet::new(),
            steps: vec![wait_step("a", &[]), wait_step("b", &["a"]), wait_step("c", &["b"])],
            on_failure: vec![],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let run = coordinator().submit(compiled, HashMap::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results.len(), 3);
    }

    #[tokio::test]
    async fn missing_required_input_is_rejected() {
        let mut inputs = HashMap::new();
        inputs.insert("name".to_string(), InputType::String);
        let wf = WorkflowDescription {
            id: "needs_name".to_string(),
            inputs,
            secrets: HashSet::new(),
            steps: vec![wait_step("a", &[])],
            on_failure: vec![],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let err = coordinator().submit(compiled, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingInputs(_)));
    }

    #[tokio::test]
    async fn suspend_then_resume_completes_the_run() {
        let wf = WorkflowDescription {
            id: "approval".to_string(),
            inputs: HashMap::new(),
            secrets: HashSet::new(),
            steps: vec![
                StepDefinition {
                    id: "wait_for_approval".to_string(),
                    after: vec![],
                    condition: None,
                    timeout: None,
                    description: None,
                    kind: StepKind::Suspend(crate::workflow::SuspendConfig {
                        message: Some("approve?".to_string()),
                        resume_schema: vec!["approved".to_string()],
                    }),
                },
                wait_step("after_approval", &["wait_for_approval"]),
            ],
            on_failure: vec![],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let coord = coordinator();
        let run = coord.submit(compiled.clone(), HashMap::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Suspended);

        let resumed = coord.resume(run.run_id, compiled, json!({"approved": true})).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn failing_step_runs_on_failure_and_finally_blocks() {
        let wf = WorkflowDescription {
            id: "with_cleanup".to_string(),
            inputs: HashMap::new(),
            secrets: HashSet::new(),
            steps: vec![StepDefinition {
                id: "boom".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Eval(EvalConfig {
                    script: "throw \"boom\";".to_string(),
                    script_timeout: 5,
                }),
            }],
            on_failure: vec![wait_step("cleanup_on_failure", &[])],
            finally: vec![wait_step("always_cleanup", &[])],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let run = coordinator().submit(compiled, HashMap::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.step_results.contains_key("cleanup:cleanup_on_failure"));
        assert!(run.step_results.contains_key("cleanup:always_cleanup"));
    }

    #[tokio::test]
    async fn cleanup_blocks_see_the_triggering_error() {
        let wf = WorkflowDescription {
            id: "with_error_context".to_string(),
            inputs: HashMap::new(),
            secrets: HashSet::new(),
            steps: vec![StepDefinition {
                id: "build".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Eval(EvalConfig {
                    script: "throw \"build blew up\";".to_string(),
                    script_timeout: 5,
                }),
            }],
            on_failure: vec![StepDefinition {
                id: "notify".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Shell(crate::workflow::ShellConfig {
                    command: "echo {{inputs.error.stepId}}:{{inputs.error.message}}".to_string(),
                    ..Default::default()
                }),
            }],
            finally: vec![wait_step("cleanup", &[])],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let run = coordinator().submit(compiled, HashMap::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let notify = run.step_results.get("cleanup:notify").unwrap();
        let stdout = notify.output.as_ref().unwrap()["stdout"].as_str().unwrap().to_string();
        assert!(stdout.starts_with("build:"));
        assert!(stdout.contains("build blew up"));
        assert!(run.step_results.contains_key("cleanup:cleanup"));
    }

    #[tokio::test]
    async fn plain_eval_is_allowed_inside_a_cleanup_block() {
        let wf = WorkflowDescription {
            id: "eval_cleanup".to_string(),
            inputs: HashMap::new(),
            secrets: HashSet::new(),
            steps: vec![StepDefinition {
                id: "boom".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Eval(EvalConfig {
                    script: "throw \"boom\";".to_string(),
                    script_timeout: 5,
                }),
            }],
            on_failure: vec![StepDefinition {
                id: "summarize".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Eval(EvalConfig {
                    script: "inputs.error.stepId + \" failed\"".to_string(),
                    script_timeout: 5,
                }),
            }],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let run = coordinator().submit(compiled, HashMap::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let summarize = run.step_results.get("cleanup:summarize").unwrap();
        assert_eq!(summarize.output.as_ref().unwrap(), &json!({"result": "boom failed"}));
    }

    #[tokio::test]
    async fn eval_with_dynamic_workflow_is_rejected_inside_cleanup() {
        let wf = WorkflowDescription {
            id: "eval_cleanup_dynamic".to_string(),
            inputs: HashMap::new(),
            secrets: HashSet::new(),
            steps: vec![StepDefinition {
                id: "boom".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Eval(EvalConfig {
                    script: "throw \"boom\";".to_string(),
                    script_timeout: 5,
                }),
            }],
            on_failure: vec![StepDefinition {
                id: "spawn_child".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Eval(EvalConfig {
                    script: r#"#{ workflow: #{ id: "child", inputs: #{}, secrets: [], steps: [], onFailure: [], finally: [] }, inputs: #{} }"#.to_string(),
                    script_timeout: 5,
                }),
            }],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let run = coordinator().submit(compiled, HashMap::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let spawn_child = run.step_results.get("cleanup:spawn_child").unwrap();
        assert!(spawn_child.output.is_none());
        assert!(spawn_child.error.as_ref().unwrap().contains("dynamic sub-workflow"));
    }

    #[tokio::test]
    async fn main_dag_eval_step_bridges_to_a_child_run_after_the_final_layer() {
        let wf = WorkflowDescription {
            id: "parent".to_string(),
            inputs: HashMap::new(),
            secrets: HashSet::new(),
            steps: vec![
                StepDefinition {
                    id: "spawn".to_string(),
                    after: vec![],
                    condition: None,
                    timeout: None,
                    description: None,
                    kind: StepKind::Eval(EvalConfig {
                        script: r#"#{ workflow: #{ id: "child", steps: [] }, inputs: #{} }"#.to_string(),
                        script_timeout: 5,
                    }),
                },
                wait_step("after_spawn", &["spawn"]),
            ],
            on_failure: vec![],
            finally: vec![],
            trigger: None,
            timeout_seconds: None,
        };
        let compiled = Arc::new(compiler::compile(wf).unwrap());
        let run = coordinator().submit(compiled, HashMap::new()).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let spawn = run.step_results.get("spawn").unwrap();
        let output = spawn.output.as_ref().unwrap();
        assert_eq!(output["status"], json!("completed"));
        assert!(output.get("runId").is_some());
    }
}
