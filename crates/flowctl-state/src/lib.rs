// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A `sqlx`-backed reference implementation of `flowctl_core::ports::PersistentStorePort`
//! (spec §6.2), supporting Postgres and SQLite through `sqlx::Any`, plus the
//! AES-256-GCM secret-input envelope used to encrypt persisted inputs that a
//! workflow has declared as secret.

pub mod encryption;
pub mod store;

pub use encryption::SecretCipher;
pub use store::SqlStore;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
