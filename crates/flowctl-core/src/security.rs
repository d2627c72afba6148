// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Target validation for the `http` and `file` steps (spec §5): reject
//! requests aimed at loopback/private/link-local/cloud-metadata addresses,
//! and reject file paths that escape their configured base directories.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::error::OrchestratorError;

const BLOCKED_HOSTNAMES: [&str; 4] = ["localhost", "metadata.google.internal", "metadata", "instance-data"];

/// AWS/GCP/Azure instance metadata endpoint.
const METADATA_IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(169, 254, 169, 254));

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_link_local() || v4.is_private() || v4.is_broadcast() || v4.is_unspecified() || ip == METADATA_IP
        }
        IpAddr::V6(v6) => {
            let is_unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            let is_link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            v6.is_loopback() || v6.is_unspecified() || is_unique_local || is_link_local
        }
    }
}

/// Rejects non-http(s) schemes, blocked hostnames, and literal IP addresses
/// in loopback/private/link-local/metadata ranges (spec §5). Hostnames that
/// merely *resolve* to a blocked range at connect time are out of scope
/// here; that requires a resolve-then-pin HTTP client, noted as a follow-up
/// in `DESIGN.md`.
pub fn check_http_target(url_str: &str) -> Result<(), OrchestratorError> {
    let url = reqwest::Url::parse(url_str)
        .map_err(|e| OrchestratorError::SecurityPolicyViolation(format!("invalid URL '{url_str}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(OrchestratorError::SecurityPolicyViolation(format!("URL scheme '{other}' is not allowed"))),
    }

    let host = url
        .host_str()
        .ok_or_else(|| OrchestratorError::SecurityPolicyViolation(format!("URL '{url_str}' has no host")))?;

    if BLOCKED_HOSTNAMES.iter().any(|blocked| blocked.eq_ignore_ascii_case(host)) {
        return Err(OrchestratorError::SecurityPolicyViolation(format!("target host '{host}' is blocked")));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(OrchestratorError::SecurityPolicyViolation(format!("target address '{ip}' is blocked")));
        }
    }

    Ok(())
}

/// Resolves `path` against `roots`, rejecting anything that canonicalizes
/// outside every configured root (spec §5's path traversal protection). An
/// empty `roots` list disables the restriction, for hosts that intentionally
/// run with full filesystem access.
pub fn resolve_within_roots(path: &str, roots: &[PathBuf]) -> Result<PathBuf, OrchestratorError> {
    let requested = PathBuf::from(path);
    let joined = if requested.is_absolute() {
        requested.clone()
    } else {
        roots.first().cloned().unwrap_or_else(|| PathBuf::from(".")).join(&requested)
    };

    let canonical = canonicalize_best_effort(&joined)
        .map_err(|e| OrchestratorError::SecurityPolicyViolation(format!("cannot resolve path '{path}': {e}")))?;

    if roots.is_empty() {
        return Ok(canonical);
    }

    for root in roots {
        if let Ok(root_canon) = root.canonicalize() {
            if canonical.starts_with(&root_canon) {
                return Ok(canonical);
            }
        }
    }

    Err(OrchestratorError::SecurityPolicyViolation(format!(
        "path '{path}' escapes every allowed root"
    )))
}

/// Patterns commonly seen in shell injection payloads: piping a fetched
/// resource into an interpreter, command substitution, and writes to
/// well-known system paths. Advisory only (spec §6.4) — a match produces a
/// warning string for the caller to log, never a rejection.
const SUSPICIOUS_SHELL_PATTERNS: [&str; 7] = [
    "| sh", "| bash", "curl | sh", "wget | sh", "$(", "`", "> /etc/",
];

/// Scans a fully resolved shell command string for common injection
/// patterns, returning one warning per match. Never blocks execution.
pub fn scan_shell_command(command: &str) -> Vec<String> {
    SUSPICIOUS_SHELL_PATTERNS
        .iter()
        .filter(|pattern| command.contains(*pattern))
        .map(|pattern| format!("shell command matches suspicious pattern '{pattern}'"))
        .collect()
}

/// `Path::canonicalize` requires the path to exist; a `file` write to a new
/// file doesn't. Fall back to canonicalizing the parent directory and
/// rejoining the file name so traversal segments (`..`) still get resolved.
fn canonicalize_best_effort(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"))?;
    Ok(parent.canonicalize()?.join(file_name))
}
