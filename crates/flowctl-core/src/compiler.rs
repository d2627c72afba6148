// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The compiler (spec §2, §4.1): binds a `WorkflowDescription` to a bound
//! plan — the description itself plus the layered step order, with the
//! structural checks that only need to run once per workflow rather than
//! once per run.

use std::collections::HashSet;

use crate::dag::{self, LayeredPlan};
use crate::error::{OrchestratorError, Result};
use crate::workflow::{IteratorConfig, StepDefinition, WorkflowDescription};

/// A workflow bound to its layered execution plan. Cheap to clone-share
/// across concurrent runs of the same workflow (spec §9, runs never mutate
/// the compiled workflow they were started from).
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub description: WorkflowDescription,
    pub plan: LayeredPlan,
}

impl CompiledWorkflow {
    pub fn workflow_id(&self) -> &str {
        &self.description.id
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.description.step(id)
    }
}

/// Compiles a `WorkflowDescription` into a `CompiledWorkflow`, rejecting
/// anything the coordinator would otherwise discover mid-run (spec §4.1:
/// "validated once at compile time, never re-checked per run").
pub fn compile(description: WorkflowDescription) -> Result<CompiledWorkflow> {
    validate_unique_ids(&description.steps)?;
    validate_cleanup_kinds("onFailure", &description.on_failure)?;
    validate_cleanup_kinds("finally", &description.finally)?;
    validate_iterator_shapes(&description.steps)?;

    let plan = dag::build_plan(&description.steps)?;

    Ok(CompiledWorkflow { description, plan })
}

fn validate_unique_ids(steps: &[StepDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.id.as_str()) {
            return Err(OrchestratorError::validation(format!("duplicate step id '{}'", step.id)));
        }
    }
    Ok(())
}

/// Cleanup blocks run sequentially in declared order and may not contain
/// `suspend` or `iterator` steps (spec §4.5). A plain `eval` step is fine
/// here; one whose output requests a dynamic sub-workflow is rejected at
/// run time instead, since only the script's return value reveals that.
fn validate_cleanup_kinds(block_name: &str, steps: &[StepDefinition]) -> Result<()> {
    for step in steps {
        if !step.kind.allowed_in_cleanup() {
            return Err(OrchestratorError::InvalidCleanupStep {
                step_id: step.id.clone(),
                kind: step.kind.name().to_string(),
            });
        }
        let _ = block_name;
    }
    Ok(())
}

/// Every `iterator` step (at any nesting depth) must declare exactly one of
/// `runStep`/`runSteps` (spec §4.1), and its inner steps must themselves be
/// structurally valid (unique ids, no disallowed nesting rules beyond what
/// the coordinator enforces at dispatch time).
fn validate_iterator_shapes(steps: &[StepDefinition]) -> Result<()> {
    for step in steps {
        if let crate::workflow::StepKind::Iterator(cfg) = &step.kind {
            check_iterator_config(&step.id, cfg)?;
        }
    }
    Ok(())
}

fn check_iterator_config(step_id: &str, cfg: &IteratorConfig) -> Result<()> {
    match (&cfg.run_step, &cfg.run_steps) {
        (Some(_), Some(_)) => Err(OrchestratorError::validation(format!(
            "iterator step '{step_id}' declares both runStep and runSteps; exactly one is required"
        ))),
        (None, None) => Err(OrchestratorError::validation(format!(
            "iterator step '{step_id}' declares neither runStep nor runSteps; exactly one is required"
        ))),
        _ => {
            validate_unique_ids(
                &cfg.inner_steps().into_iter().cloned().collect::<Vec<_>>(),
            )?;
            for inner in cfg.inner_steps() {
                if let crate::workflow::StepKind::Iterator(inner_cfg) = &inner.kind {
                    check_iterator_config(&inner.id, inner_cfg)?;
                }
            }
            Ok(())
        }
    }
}
