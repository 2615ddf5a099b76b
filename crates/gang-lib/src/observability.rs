//! Observability infrastructure for the gang tuner
//!
//! Provides:
//! - Prometheus metrics (step duration, horizon decisions, checkpoints, shares)
//! - Structured JSON logging with tracing

use crate::models::ResourceConfiguration;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, register_int_gauge_vec,
    Histogram, IntCounter, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info};

/// Histogram buckets for time step durations (in seconds)
const STEP_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0,
];

/// Histogram buckets for horizon decisions (in time steps)
const HORIZON_BUCKETS: &[f64] = &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 10.0, 16.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GangMetricsInner> = OnceLock::new();

struct GangMetricsInner {
    step_duration_seconds: Histogram,
    horizon_steps: Histogram,
    checkpoints: IntCounter,
    time_step: IntGauge,
    task_shares: IntGaugeVec,
    job_retries: IntCounter,
    gang_stalls: IntCounter,
}

impl GangMetricsInner {
    fn new() -> Self {
        Self {
            step_duration_seconds: register_histogram!(
                "gang_tuner_step_duration_seconds",
                "Duration of one gang time step, measured or modelled",
                STEP_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register step_duration_seconds"),

            horizon_steps: register_histogram!(
                "gang_tuner_horizon_steps",
                "Horizon chosen by the controller at each time step",
                HORIZON_BUCKETS.to_vec()
            )
            .expect("Failed to register horizon_steps"),

            checkpoints: register_int_counter!(
                "gang_tuner_checkpoints_total",
                "Reconfigurations that incurred a checkpoint penalty"
            )
            .expect("Failed to register checkpoints"),

            time_step: register_int_gauge!(
                "gang_tuner_time_step",
                "Time step currently being executed"
            )
            .expect("Failed to register time_step"),

            task_shares: register_int_gauge_vec!(
                "gang_tuner_task_cpu_shares",
                "CPU shares installed for each task",
                &["task"]
            )
            .expect("Failed to register task_cpu_shares"),

            job_retries: register_int_counter!(
                "gang_tuner_job_retries_total",
                "Job create/delete calls retried after a transient failure"
            )
            .expect("Failed to register job_retries"),

            gang_stalls: register_int_counter!(
                "gang_tuner_gang_stalls_total",
                "Barrier waits that expired before the gang assembled"
            )
            .expect("Failed to register gang_stalls"),
        }
    }
}

/// Lightweight handle to the global metrics; clones share the same metrics
#[derive(Clone)]
pub struct GangMetrics {
    _private: (),
}

impl Default for GangMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GangMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GangMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GangMetricsInner {
        GLOBAL_METRICS.get_or_init(GangMetricsInner::new)
    }

    pub fn observe_step_duration(&self, duration_secs: f64) {
        self.inner().step_duration_seconds.observe(duration_secs);
    }

    pub fn observe_horizon(&self, horizon: usize) {
        self.inner().horizon_steps.observe(horizon as f64);
    }

    pub fn inc_checkpoints(&self) {
        self.inner().checkpoints.inc();
    }

    pub fn set_time_step(&self, time_step: usize) {
        self.inner().time_step.set(time_step as i64);
    }

    /// Replace the per-task share gauges with `configuration`
    pub fn set_configuration(&self, configuration: &ResourceConfiguration) {
        let gauges = &self.inner().task_shares;
        gauges.reset();
        for (task, shares) in configuration.iter() {
            gauges.with_label_values(&[task]).set(shares as i64);
        }
    }

    pub fn inc_job_retries(&self) {
        self.inner().job_retries.inc();
    }

    pub fn inc_gang_stalls(&self) {
        self.inner().gang_stalls.inc();
    }
}

/// Structured logger for simulation events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_simulation_started(&self, strategy: &str, mode: &str, tasks: usize, steps: usize) {
        info!(
            event = "simulation_started",
            node = %self.node_name,
            strategy = %strategy,
            mode = %mode,
            tasks = tasks,
            simulation_length = steps,
            "Simulation started"
        );
    }

    /// Log a newly installed configuration
    pub fn log_reconfiguration(
        &self,
        time_step: usize,
        horizon: usize,
        configuration: &ResourceConfiguration,
        checkpoint: bool,
    ) {
        info!(
            event = "reconfiguration",
            node = %self.node_name,
            time_step = time_step,
            horizon = horizon,
            total_shares = configuration.total(),
            shares = ?configuration,
            checkpoint = checkpoint,
            "Installed new resource configuration"
        );
    }

    pub fn log_time_step(&self, time_step: usize, duration_secs: f64, total_secs: f64) {
        info!(
            event = "time_step_completed",
            node = %self.node_name,
            time_step = time_step,
            duration_secs = duration_secs,
            total_secs = total_secs,
            "Time step completed"
        );
    }

    pub fn log_finished(&self, total_duration: f64, checkpoints: u32, penalized_duration: f64) {
        info!(
            event = "simulation_finished",
            node = %self.node_name,
            total_duration = total_duration,
            checkpoints = checkpoints,
            penalized_duration = penalized_duration,
            "Simulation finished"
        );
    }

    pub fn log_aborted(&self, time_step: usize, reason: &str, total_duration: f64, checkpoints: u32) {
        error!(
            event = "simulation_aborted",
            node = %self.node_name,
            time_step = time_step,
            reason = %reason,
            total_duration = total_duration,
            checkpoints = checkpoints,
            "Simulation aborted"
        );
    }
}
