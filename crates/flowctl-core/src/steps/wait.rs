// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `wait` step: sleeps, nothing else.

use std::time::Duration;

use serde_json::json;

use crate::error::Result;
use crate::value::JsonValue;
use crate::workflow::WaitConfig;

pub async fn execute(cfg: &WaitConfig) -> Result<JsonValue> {
    tokio::time::sleep(Duration::from_millis(cfg.duration_ms)).await;
    Ok(json!({ "completed": true, "durationMs": cfg.duration_ms }))
}
