// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error taxonomy surfaced by the core (spec §7).

use std::time::Duration;
use thiserror::Error;

use crate::value::InputType;

/// Top-level error type returned by every fallible core operation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A workflow description failed schema or referential-integrity checks.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A submission omitted a declared input.
    #[error("missing required inputs: {0:?}")]
    MissingInputs(Vec<MissingInput>),

    /// A step handler raised.
    #[error("step '{step_id}' failed: {message}")]
    StepFailure {
        step_id: String,
        message: String,
        fail_on_error: bool,
    },

    /// An eval script touched a blocked facility or exceeded its timeout.
    #[error("sandbox violation in step '{step_id}': {message}")]
    SandboxViolation { step_id: String, message: String },

    /// SSRF target rejected, path traversal rejected, or a weak encryption key.
    #[error("security policy violation: {0}")]
    SecurityPolicyViolation(String),

    /// The persistent store failed after retries.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancellation,

    /// A per-step or per-run timeout expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A workflow or run id referenced by a caller does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A step in a cleanup block tried to use a kind it isn't allowed to.
    #[error("cleanup step '{step_id}' may not be of kind '{kind}'")]
    InvalidCleanupStep { step_id: String, kind: String },

    /// Any other failure that doesn't fit a more specific variant.
    #[error("{0}")]
    Other(String),
}

/// One entry of a `MissingInputs` error: the input's name and declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    pub name: String,
    pub input_type: InputType,
}

impl OrchestratorError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn step_failure(step_id: impl Into<String>, message: impl Into<String>, fail_on_error: bool) -> Self {
        Self::StepFailure {
            step_id: step_id.into(),
            message: message.into(),
            fail_on_error,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("serialization error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
