// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step handlers (spec §4.4): one module per step kind, dispatched from a
//! closed match over `StepKind` so adding a new kind is a compile error
//! everywhere it isn't handled yet (spec §9, "sum types over inheritance").

pub mod agent;
pub mod eval;
pub mod file;
pub mod http;
pub mod iterator;
pub mod shell;
pub mod suspend;
pub mod tool;
pub mod wait;

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::ports::EnvironmentPort;
use crate::process_registry::ProcessRegistry;
use crate::value::JsonValue;
use crate::workflow::{StepDefinition, StepKind};

/// What a step handler produced. `Suspend` short-circuits the coordinator's
/// layer loop (spec §4.5): the run stops advancing until it is resumed.
pub enum StepResult {
    Output(JsonValue),
    Suspend(JsonValue),
}

/// Everything a step handler needs beyond the step's own config and the
/// execution context, bundled so `execute`'s signature doesn't grow with
/// every new step kind's dependency.
#[derive(Clone)]
pub struct StepDeps {
    pub environment: Arc<dyn EnvironmentPort>,
    pub http_client: reqwest::Client,
    pub process_registry: Arc<ProcessRegistry>,
    /// Allow-listed base directories for the `file` step. Empty disables
    /// the restriction.
    pub file_roots: Vec<PathBuf>,
}

/// Dispatches one step to its handler. Condition gating and idempotent-skip
/// (spec §3 invariant 5) are the coordinator's responsibility, applied
/// before this is ever called.
pub async fn execute(step: &StepDefinition, ctx: &mut ExecutionContext, deps: &StepDeps) -> Result<StepResult> {
    match &step.kind {
        StepKind::Shell(cfg) => shell::execute(&step.id, cfg, ctx, deps).await.map(StepResult::Output),
        StepKind::Http(cfg) => http::execute(&step.id, cfg, ctx, deps).await.map(StepResult::Output),
        StepKind::File(cfg) => file::execute(&step.id, cfg, ctx, deps).await.map(StepResult::Output),
        StepKind::Tool(cfg) => tool::execute(&step.id, cfg, ctx, deps).await.map(StepResult::Output),
        StepKind::Agent(cfg) => agent::execute(&step.id, cfg, ctx, deps).await.map(StepResult::Output),
        StepKind::Wait(cfg) => wait::execute(cfg).await.map(StepResult::Output),
        StepKind::Suspend(cfg) => Ok(StepResult::Suspend(suspend::build_suspended_data(cfg, ctx))),
        StepKind::Eval(cfg) => eval::execute(&step.id, cfg, ctx).await.map(StepResult::Output),
        StepKind::Iterator(cfg) => iterator::execute(&step.id, cfg, ctx, deps).await.map(StepResult::Output),
    }
}
