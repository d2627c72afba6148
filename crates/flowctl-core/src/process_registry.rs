// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-tree tracking for the `shell` step (spec §5): a process-wide set
//! of live child processes with a central cleanup entry point, so a run
//! cancellation or timeout actually stops work instead of merely abandoning
//! it. Not present in the teacher's retrieved files (it never shipped a
//! shell step); grounded directly on the spec text and built next to the
//! other `DashMap`-backed registries the teacher's executor already used.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::process::Child;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use uuid::Uuid;

/// Opaque handle returned by `register`, used to terminate or release a
/// tracked child later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildHandle(Uuid);

/// The process-wide live-child registry. Cheap to clone (an `Arc` wrapper is
/// expected at the call site); every run's shell steps register into the
/// same instance so a single `terminate_all` reaches every live descendant.
#[derive(Default)]
pub struct ProcessRegistry {
    children: DashMap<Uuid, Arc<AsyncMutex<Child>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, child: Child) -> ChildHandle {
        let id = Uuid::new_v4();
        self.children.insert(id, Arc::new(AsyncMutex::new(child)));
        ChildHandle(id)
    }

    pub fn deregister(&self, handle: ChildHandle) {
        self.children.remove(&handle.0);
    }

    pub fn live_count(&self) -> usize {
        self.children.len()
    }

    /// Removes `handle` from the registry and waits for it to exit,
    /// collecting its stdout/stderr. Used by the `shell` step's happy path,
    /// where the caller (not a cancellation) owns reaping the child.
    pub async fn take_for_output(&self, handle: ChildHandle) -> std::io::Result<std::process::Output> {
        let Some((_, child)) = self.children.remove(&handle.0) else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "child handle not registered"));
        };
        let child = Arc::try_unwrap(child)
            .unwrap_or_else(|_| unreachable!("registry never shares a child handle's Arc"))
            .into_inner();
        child.wait_with_output().await
    }

    /// Graceful-then-forceful termination: sends `SIGTERM` (unix) and waits
    /// up to `grace`, then falls back to a hard kill if the process is still
    /// alive. Always removes the handle from the registry on return.
    pub async fn terminate(&self, handle: ChildHandle, grace: Duration) {
        let Some((_, child)) = self.children.remove(&handle.0) else {
            return;
        };
        let mut child = child.lock().await;
        request_graceful_shutdown(&child);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "error waiting on terminated child process"),
            Err(_) => {
                if let Err(err) = child.start_kill() {
                    warn!(error = %err, "failed to force-kill child process after grace period");
                }
                let _ = child.wait().await;
            }
        }
    }

    /// The central cleanup entry point (spec §5): terminates every currently
    /// tracked child, used on run cancellation, process shutdown, or an
    /// end-to-end run timeout.
    pub async fn terminate_all(&self, grace: Duration) {
        let handles: Vec<ChildHandle> = self.children.iter().map(|e| ChildHandle(*e.key())).collect();
        for handle in handles {
            self.terminate(handle, grace).await;
        }
    }
}

#[cfg(unix)]
fn request_graceful_shutdown(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(%pid, error = %err, "failed to send SIGTERM to child process");
        }
    }
}

#[cfg(not(unix))]
fn request_graceful_shutdown(_child: &Child) {
    // Windows has no SIGTERM equivalent reachable without extra native
    // bindings; the grace-period wait below still gives the process a
    // chance to exit on its own before the forceful fallback.
}
