// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat backend integrations for the flowctl workflow orchestrator: concrete
//! `flowctl_core::ports::ChatBackend`/`AgentHandler` implementations for the
//! `agent` step (spec §4.4, §6.1).

pub mod agent;
pub mod anthropic;
pub mod openai;

pub use agent::NamedAgent;
pub use anthropic::AnthropicChat;
pub use openai::OpenAiChat;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
