// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution metrics. Ambient observability carried over from the teacher's
//! workspace-level `prometheus`/`lazy_static` dependencies; not itself a
//! spec feature, so nothing here gates correctness — every call site is a
//! side-effecting observe/increment, never branched on.

use lazy_static::lazy_static;
use prometheus::{register_histogram, register_int_counter_vec, Histogram, IntCounterVec};

lazy_static! {
    pub static ref STEPS_STARTED: IntCounterVec = register_int_counter_vec!(
        "flowctl_steps_started_total",
        "Steps dispatched by kind",
        &["kind"]
    )
    .expect("metric registration");
    pub static ref STEPS_COMPLETED: IntCounterVec = register_int_counter_vec!(
        "flowctl_steps_completed_total",
        "Steps completed by kind and outcome",
        &["kind", "outcome"]
    )
    .expect("metric registration");
    pub static ref RUN_DURATION_SECONDS: Histogram =
        register_histogram!("flowctl_run_duration_seconds", "End-to-end run duration").expect("metric registration");
}

pub fn record_step_started(kind: &str) {
    STEPS_STARTED.with_label_values(&[kind]).inc();
}

pub fn record_step_completed(kind: &str, outcome: &str) {
    STEPS_COMPLETED.with_label_values(&[kind, outcome]).inc();
}

pub fn record_run_duration(seconds: f64) {
    RUN_DURATION_SECONDS.observe(seconds);
}
