// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `shell` step: runs a command, registered with the process-tree
//! registry so a run timeout or cancellation actually reaches it.

use std::time::Duration;

use serde_json::json;
use tokio::process::Command;
use tracing::warn;

use super::StepDeps;
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::security::scan_shell_command;
use crate::value::JsonValue;
use crate::workflow::ShellConfig;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

pub async fn execute(step_id: &str, cfg: &ShellConfig, ctx: &mut ExecutionContext, deps: &StepDeps) -> Result<JsonValue> {
    let command = ctx.resolve_string(&cfg.command);
    let cwd = cfg.cwd.as_ref().map(|t| ctx.resolve_string(t));
    let mut env = Vec::with_capacity(cfg.env.len());
    for (key, template) in &cfg.env {
        env.push((key.clone(), ctx.resolve_string(template)));
    }
    let args: Vec<String> = cfg.args.iter().map(|a| ctx.resolve_string(a)).collect();

    if !cfg.safe {
        for warning in scan_shell_command(&command) {
            warn!(step_id, warning, "shell-safety advisory");
        }
    }

    let mut command_builder = if cfg.safe {
        let mut c = Command::new(&command);
        c.args(&args);
        c
    } else {
        let mut c = Command::new(if cfg!(windows) { "cmd" } else { "sh" });
        if cfg!(windows) {
            c.arg("/C").arg(&command);
        } else {
            c.arg("-c").arg(&command);
        }
        c
    };

    if let Some(dir) = &cwd {
        command_builder.current_dir(dir);
    }
    for (key, value) in &env {
        command_builder.env(key, value);
    }
    command_builder.stdout(std::process::Stdio::piped());
    command_builder.stderr(std::process::Stdio::piped());

    let child = command_builder
        .spawn()
        .map_err(|e| OrchestratorError::step_failure(step_id, format!("failed to spawn command: {e}"), cfg.fail_on_error))?;

    let timeout = cfg.timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
    let handle = deps.process_registry.register(child);

    // `terminate` removes the handle on timeout; on the happy path we just
    // release it without killing anything.
    let output_result = tokio::time::timeout(timeout, wait_for_output(deps, handle)).await;

    match output_result {
        Ok(result) => {
            let output = result.map_err(|e| OrchestratorError::step_failure(step_id, format!("command I/O error: {e}"), cfg.fail_on_error))?;
            let stdout = ctx.mask(String::from_utf8_lossy(&output.stdout).trim());
            let stderr = ctx.mask(String::from_utf8_lossy(&output.stderr).trim());
            let exit_code = output.status.code().unwrap_or(-1);

            if exit_code != 0 && cfg.fail_on_error {
                return Err(OrchestratorError::step_failure(
                    step_id,
                    format!("command exited with status {exit_code}: {stderr}"),
                    true,
                ));
            }

            Ok(json!({
                "stdout": stdout,
                "stderr": stderr,
                "exitCode": exit_code,
            }))
        }
        Err(_) => {
            deps.process_registry.terminate(handle, TERMINATION_GRACE).await;
            Err(OrchestratorError::Timeout(timeout))
        }
    }
}

async fn wait_for_output(deps: &StepDeps, handle: crate::process_registry::ChildHandle) -> std::io::Result<std::process::Output> {
    // The registry owns the child; take it back out to collect its output,
    // which also consumes stdout/stderr so they don't deadlock on a full pipe.
    deps.process_registry.take_for_output(handle).await
}
