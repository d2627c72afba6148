// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `file` step: read/write/delete, confined to the configured allow-list
//! of base directories.

use serde_json::json;

use super::StepDeps;
use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::security::resolve_within_roots;
use crate::value::{format_for_file_content, JsonValue};
use crate::workflow::{FileAction, FileConfig};

pub async fn execute(step_id: &str, cfg: &FileConfig, ctx: &mut ExecutionContext, deps: &StepDeps) -> Result<JsonValue> {
    let path_str = ctx.resolve_string(&cfg.path);
    let resolved = resolve_within_roots(&path_str, &deps.file_roots)?;

    match cfg.action {
        FileAction::Read => {
            let contents = tokio::fs::read_to_string(&resolved)
                .await
                .map_err(|e| OrchestratorError::step_failure(step_id, format!("failed to read '{path_str}': {e}"), true))?;
            Ok(json!({ "content": contents }))
        }
        FileAction::Write => {
            let content = cfg
                .content
                .as_ref()
                .map(|v| {
                    let resolved = resolve_content(v, ctx);
                    format_for_file_content(&resolved)
                })
                .unwrap_or_default();
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| OrchestratorError::step_failure(step_id, format!("failed to create '{parent:?}': {e}"), true))?;
            }
            tokio::fs::write(&resolved, &content)
                .await
                .map_err(|e| OrchestratorError::step_failure(step_id, format!("failed to write '{path_str}': {e}"), true))?;
            Ok(json!({ "success": true }))
        }
        FileAction::Delete => {
            match tokio::fs::remove_file(&resolved).await {
                Ok(()) => Ok(json!({ "success": true })),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({ "success": false })),
                Err(e) => Err(OrchestratorError::step_failure(step_id, format!("failed to delete '{path_str}': {e}"), true)),
            }
        }
    }
}

fn resolve_content(value: &JsonValue, ctx: &mut ExecutionContext) -> JsonValue {
    match value {
        JsonValue::String(s) => ctx.resolve(s),
        other => other.clone(),
    }
}
