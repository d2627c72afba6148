// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The workflow description types (spec §3): the compiler's input.
//!
//! Step kinds are a tagged variant — one discriminator field (`type`) and
//! per-variant fields — rather than a class hierarchy, so the executor can
//! dispatch on a closed, exhaustively-checkable enum (spec §9, "Sum types
//! over inheritance").

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::value::{InputType, JsonValue};

/// A user-authored workflow description, already schema-validated upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub id: String,
    #[serde(default)]
    pub inputs: HashMap<String, InputType>,
    #[serde(default)]
    pub secrets: HashSet<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default, rename = "onFailure")]
    pub on_failure: Vec<StepDefinition>,
    #[serde(default)]
    pub finally: Vec<StepDefinition>,
    /// Schedule expression or event pattern, carried through but never
    /// interpreted by the core.
    #[serde(default)]
    pub trigger: Option<JsonValue>,
    /// Hard end-to-end timeout for a run, in seconds.
    #[serde(default, rename = "timeoutSeconds")]
    pub timeout_seconds: Option<u64>,
}

impl WorkflowDescription {
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Common fields shared by every step kind, plus the tagged per-kind payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub condition: Option<String>,
    /// Soft per-step timeout, in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The per-variant step payload, discriminated by a `type` field in the
/// serialized representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    Shell(ShellConfig),
    Http(HttpConfig),
    File(FileConfig),
    Tool(ToolConfig),
    Agent(AgentConfig),
    Suspend(SuspendConfig),
    Wait(WaitConfig),
    Iterator(IteratorConfig),
    Eval(EvalConfig),
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Shell(_) => "shell",
            StepKind::Http(_) => "http",
            StepKind::File(_) => "file",
            StepKind::Tool(_) => "tool",
            StepKind::Agent(_) => "agent",
            StepKind::Suspend(_) => "suspend",
            StepKind::Wait(_) => "wait",
            StepKind::Iterator(_) => "iterator",
            StepKind::Eval(_) => "eval",
        }
    }

    /// Cleanup blocks may not use `suspend` or `iterator` (spec §4.5). Plain
    /// `eval` is allowed; an `eval` step whose output requests a dynamic
    /// sub-workflow is rejected at the coordinator layer instead, since
    /// only a script's return value (not its static kind) reveals that.
    pub fn allowed_in_cleanup(&self) -> bool {
        !matches!(self, StepKind::Suspend(_) | StepKind::Iterator(_))
    }

    /// The output a condition-gated step produces when it's skipped (spec
    /// §4.1): `{skipped: true}` plus the kind's own zero-valued fields, so a
    /// downstream template referencing e.g. `{{steps.x.stdout}}` sees an
    /// empty string rather than a missing path.
    pub fn skipped_output(&self) -> JsonValue {
        match self {
            StepKind::Shell(_) => json!({"skipped": true, "stdout": "", "stderr": "", "exitCode": 0}),
            StepKind::Http(_) => json!({"skipped": true, "status": null, "body": null, "text": null, "headers": {}}),
            StepKind::File(cfg) => match cfg.action {
                FileAction::Read => json!({"skipped": true, "content": null}),
                FileAction::Write | FileAction::Delete => json!({"skipped": true, "success": false}),
            },
            StepKind::Tool(_) => json!({"skipped": true, "result": null}),
            StepKind::Agent(_) => json!({"skipped": true, "response": null}),
            StepKind::Suspend(_) => json!({"skipped": true, "resumed": false, "data": null}),
            StepKind::Wait(_) => json!({"skipped": true, "completed": false, "durationMs": 0}),
            StepKind::Iterator(_) => json!({"skipped": true, "results": [], "count": 0}),
            StepKind::Eval(_) => json!({"skipped": true, "result": null}),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShellConfig {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_true", rename = "failOnError")]
    pub fail_on_error: bool,
    /// When true, `command` is executed directly (no shell), with `args`
    /// passed as a literal argument vector.
    #[serde(default)]
    pub safe: bool,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<JsonValue>,
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true", rename = "failOnError")]
    pub fail_on_error: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub action: FileAction,
    pub path: String,
    #[serde(default)]
    pub content: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub tool: String,
    #[serde(default)]
    pub args: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    /// Named-agent reference, looked up on the environment port. When
    /// absent, the step is an inline chat call instead.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default, rename = "maxTokens")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SuspendConfig {
    #[serde(default)]
    pub message: Option<String>,
    /// Key names that must be present in the mapping supplied on resume.
    #[serde(default, rename = "resumeSchema")]
    pub resume_schema: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IteratorConfig {
    /// Template that resolves to a sequence.
    pub items: String,
    #[serde(default, rename = "runStep")]
    pub run_step: Option<Box<StepDefinition>>,
    #[serde(default, rename = "runSteps")]
    pub run_steps: Option<Vec<StepDefinition>>,
}

impl IteratorConfig {
    /// Exactly one of `run_step`/`run_steps` is required; enforced at
    /// compile time by the planner (spec §4.1).
    pub fn inner_steps(&self) -> Vec<&StepDefinition> {
        if let Some(step) = &self.run_step {
            vec![step.as_ref()]
        } else if let Some(steps) = &self.run_steps {
            steps.iter().collect()
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    pub script: String,
    #[serde(default = "default_eval_timeout", rename = "scriptTimeout")]
    pub script_timeout: u64,
}

fn default_eval_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shell_step_with_defaults() {
        let json = serde_json::json!({
            "id": "build",
            "type": "shell",
            "command": "echo hi"
        });
        let step: StepDefinition = serde_json::from_value(json).unwrap();
        match step.kind {
            StepKind::Shell(cfg) => {
                assert_eq!(cfg.command, "echo hi");
                assert!(cfg.fail_on_error);
                assert!(!cfg.safe);
            }
            _ => panic!("expected shell step"),
        }
    }

    #[test]
    fn iterator_requires_exactly_one_of_run_step_run_steps() {
        let with_step = IteratorConfig {
            items: "{{inputs.items}}".to_string(),
            run_step: Some(Box::new(StepDefinition {
                id: "inner".to_string(),
                after: vec![],
                condition: None,
                timeout: None,
                description: None,
                kind: StepKind::Wait(WaitConfig { duration_ms: 1 }),
            })),
            run_steps: None,
        };
        assert_eq!(with_step.inner_steps().len(), 1);
    }

    #[test]
    fn cleanup_disallows_suspend_and_iterator_but_allows_plain_eval() {
        assert!(!StepKind::Suspend(SuspendConfig::default()).allowed_in_cleanup());
        assert!(StepKind::Shell(ShellConfig::default()).allowed_in_cleanup());
        assert!(StepKind::Eval(EvalConfig {
            script: "1".to_string(),
            script_timeout: 5
        })
        .allowed_in_cleanup());
    }

    #[test]
    fn skipped_output_carries_kind_specific_zero_fields() {
        use serde_json::json;

        let shell = StepKind::Shell(ShellConfig::default()).skipped_output();
        assert_eq!(shell, json!({"skipped": true, "stdout": "", "stderr": "", "exitCode": 0}));

        let write = StepKind::File(FileConfig {
            action: FileAction::Write,
            path: "x".to_string(),
            content: None,
        })
        .skipped_output();
        assert_eq!(write, json!({"skipped": true, "success": false}));

        let read = StepKind::File(FileConfig {
            action: FileAction::Read,
            path: "x".to_string(),
            content: None,
        })
        .skipped_output();
        assert_eq!(read, json!({"skipped": true, "content": null}));
    }
}
