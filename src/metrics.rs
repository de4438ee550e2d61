//! Prometheus metrics for the orchestration core
//!
//! All collectors live in the default registry. `gather_text()` renders them in
//! the text exposition format for whatever scrapes the process.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

use crate::hardware::Tier;

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Task Lifecycle Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tasks accepted by `submit`, including those denied at submission.
    ///
    /// Labels:
    /// - agent: Agent kind (e.g., "file_management")
    pub static ref TASKS_SUBMITTED: CounterVec = register_counter_vec!(
        "overseer_tasks_submitted_total",
        "Tasks submitted per agent",
        &["agent"]
    ).expect("failed to register TASKS_SUBMITTED metric");

    /// Tasks reaching a terminal state.
    ///
    /// Labels:
    /// - agent: Agent kind
    /// - status: succeeded, failed, denied, cancelled
    pub static ref TASKS_FINISHED: CounterVec = register_counter_vec!(
        "overseer_tasks_finished_total",
        "Tasks reaching a terminal state per agent and status",
        &["agent", "status"]
    ).expect("failed to register TASKS_FINISHED metric");

    /// Tasks currently running per agent. Never exceeds the agent's worker count.
    pub static ref TASKS_RUNNING: GaugeVec = register_gauge_vec!(
        "overseer_tasks_running",
        "Tasks currently running per agent",
        &["agent"]
    ).expect("failed to register TASKS_RUNNING metric");

    /// Approved tasks waiting for a worker.
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "overseer_queue_depth",
        "Tasks pending in each agent lane",
        &["agent"]
    ).expect("failed to register QUEUE_DEPTH metric");

    /// Wall time from worker pickup to terminal state.
    pub static ref TASK_DURATION: HistogramVec = register_histogram_vec!(
        "overseer_task_duration_seconds",
        "Task execution duration per agent",
        &["agent"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    ).expect("failed to register TASK_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Permission Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Permission decisions.
    ///
    /// Labels:
    /// - agent: Agent kind
    /// - phase: declared (at submission) or concrete (before effect)
    /// - outcome: allowed or denied
    pub static ref PERMISSION_DECISIONS: CounterVec = register_counter_vec!(
        "overseer_permission_decisions_total",
        "Permission decisions per agent, phase and outcome",
        &["agent", "phase", "outcome"]
    ).expect("failed to register PERMISSION_DECISIONS metric");

    /// 1 while the emergency stop is engaged.
    pub static ref EMERGENCY_STOP: Gauge = register_gauge!(
        "overseer_emergency_stop",
        "Whether the emergency stop is engaged (1) or released (0)"
    ).expect("failed to register EMERGENCY_STOP metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Inference Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Backend consultations.
    ///
    /// Labels:
    /// - agent: Agent kind
    /// - outcome: ok, error, timeout, rate_limited, skipped
    pub static ref INFERENCE_CALLS: CounterVec = register_counter_vec!(
        "overseer_inference_calls_total",
        "Inference backend calls per agent and outcome",
        &["agent", "outcome"]
    ).expect("failed to register INFERENCE_CALLS metric");

    /// Backend call latency per model.
    pub static ref INFERENCE_LATENCY: HistogramVec = register_histogram_vec!(
        "overseer_inference_latency_seconds",
        "Inference backend latency per model",
        &["model"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]
    ).expect("failed to register INFERENCE_LATENCY metric");

    /// Hardware tier detected at startup (0=fallback, 1=low, 2=medium, 3=high).
    pub static ref HARDWARE_TIER: Gauge = register_gauge!(
        "overseer_hardware_tier",
        "Hardware tier detected at startup"
    ).expect("failed to register HARDWARE_TIER metric");
}

/// Touch unlabelled gauges so they appear in the first scrape.
pub fn init() {
    EMERGENCY_STOP.set(0.0);
}

pub fn set_emergency_stop(engaged: bool) {
    EMERGENCY_STOP.set(if engaged { 1.0 } else { 0.0 });
}

pub fn set_hardware_tier(tier: Tier) {
    HARDWARE_TIER.set(tier.rank() as f64);
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_registered_families() {
        TASKS_SUBMITTED.with_label_values(&["system"]).inc();
        set_emergency_stop(false);
        let text = gather_text();
        assert!(text.contains("overseer_tasks_submitted_total"));
        assert!(text.contains("overseer_emergency_stop"));
    }
}
