// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `suspend` step: stops the run until an external resume call supplies
//! a mapping satisfying `resumeSchema` (spec §4.5).

use serde_json::json;

use crate::context::ExecutionContext;
use crate::value::JsonValue;
use crate::workflow::SuspendConfig;

pub fn build_suspended_data(cfg: &SuspendConfig, ctx: &mut ExecutionContext) -> JsonValue {
    let message = cfg.message.as_ref().map(|t| ctx.resolve_string(t));
    json!({
        "message": message,
        "resumeSchema": cfg.resume_schema,
    })
}

/// Checks that a resume payload supplies every key `resumeSchema` requires
/// (spec §4.5). The coordinator calls this before accepting a resume.
pub fn validate_resume_payload(cfg: &SuspendConfig, payload: &JsonValue) -> Result<(), Vec<String>> {
    let Some(obj) = payload.as_object() else {
        return Err(cfg.resume_schema.clone());
    };
    let missing: Vec<String> = cfg.resume_schema.iter().filter(|key| !obj.contains_key(key.as_str())).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resume_payload_must_satisfy_every_required_key() {
        let cfg = SuspendConfig {
            message: None,
            resume_schema: vec!["approved".to_string()],
        };
        assert!(validate_resume_payload(&cfg, &json!({"approved": true})).is_ok());
        assert!(validate_resume_payload(&cfg, &json!({})).is_err());
    }
}
