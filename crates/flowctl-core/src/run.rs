// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run record (spec §3): owned exclusively by the coordinator while a
//! run is active. Readers of a live run only ever see snapshots (spec §9,
//! "Arena-free ownership").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepExecStatus {
    Success,
    Failed,
    Skipped,
}

/// One entry of `Run::step_results`, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResultEntry {
    pub status: StepExecStatus,
    #[serde(default)]
    pub output: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepResultEntry {
    pub fn success(output: JsonValue, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: StepExecStatus::Success,
            output: Some(output),
            error: None,
            started_at,
            completed_at,
        }
    }

    pub fn failed(error: impl Into<String>, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: StepExecStatus::Failed,
            output: None,
            error: Some(error.into()),
            started_at,
            completed_at,
        }
    }

    /// `output` is the step kind's own zero-valued shape plus `skipped: true`
    /// (spec §4.1), produced by the caller via `StepKind::skipped_output`.
    pub fn skipped(output: JsonValue, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: StepExecStatus::Skipped,
            output: Some(output),
            error: None,
            started_at,
            completed_at,
        }
    }
}

/// A run record: one invocation of a compiled workflow against a concrete
/// input tuple (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    pub inputs: HashMap<String, JsonValue>,
    pub step_results: HashMap<String, StepResultEntry>,
    #[serde(default)]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub suspended_data: Option<JsonValue>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    /// Run id of the parent run, set only for sub-workflow bridge children.
    #[serde(default)]
    pub parent_run_id: Option<Uuid>,
}

impl Run {
    pub fn new(workflow_id: impl Into<String>, inputs: HashMap<String, JsonValue>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            status: RunStatus::Pending,
            inputs,
            step_results: HashMap::new(),
            current_step_id: None,
            suspended_data: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            parent_run_id: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
    }

    pub fn mark_suspended(&mut self, step_id: impl Into<String>, suspended_data: JsonValue) {
        self.status = RunStatus::Suspended;
        self.current_step_id = Some(step_id.into());
        self.suspended_data = Some(suspended_data);
    }

    pub fn mark_resuming(&mut self) {
        self.status = RunStatus::Running;
        self.current_step_id = None;
        self.suspended_data = None;
    }

    pub fn mark_terminal(&mut self, status: RunStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }

    /// Idempotent-skip lookup (spec §3 invariant 5, §4.1).
    pub fn prior_result(&self, step_id: &str) -> Option<&StepResultEntry> {
        self.step_results.get(step_id)
    }
}
