//! Simulator configuration

use anyhow::{Context, Result};
use gang_lib::{AllocationParams, Extrapolation, SimulationError, Task};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "GANG_CONFIG_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Simulated,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    Fixed,
    Dynamic,
    Policy,
    Static,
}

/// What a live-mode worker runs for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Sleep for the modelled duration scaled by `time_scale`
    Model,
    /// Run the stress-ng kernel named after the task
    StressNg,
}

/// Simulator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,

    #[serde(default = "default_controller")]
    pub controller: ControllerKind,

    /// Number of time steps to run
    #[serde(default = "default_simulation_length")]
    pub simulation_length: usize,

    /// Lookahead of the dynamic controller, candidate horizons of the policy
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Period of the fixed controller
    #[serde(default = "default_fixed_window")]
    pub fixed_window: usize,

    #[serde(default = "default_total_shares")]
    pub total_shares: u32,

    #[serde(default = "default_starting_shares")]
    pub starting_shares: u32,

    #[serde(default = "default_share_increment")]
    pub share_increment: u32,

    #[serde(default = "default_total_shares")]
    pub max_task_shares: u32,

    #[serde(default = "default_min_workload")]
    pub min_workload: f64,

    #[serde(default = "default_max_workload")]
    pub max_workload: f64,

    /// Seconds charged per reconfiguration
    #[serde(default = "default_checkpoint_penalty")]
    pub checkpoint_penalty: f64,

    #[serde(default = "default_length_penalty")]
    pub length_penalty: f64,

    #[serde(default = "default_improvement_decay")]
    pub improvement_decay: f64,

    #[serde(default)]
    pub extrapolation: Extrapolation,

    #[serde(default = "default_barrier_timeout")]
    pub barrier_timeout_secs: u64,

    #[serde(default = "default_job_retry_backoff")]
    pub job_retry_backoff_ms: u64,

    /// Unbounded when absent
    #[serde(default)]
    pub job_max_attempts: Option<u32>,

    #[serde(default = "default_tasks")]
    pub tasks: Vec<Task>,

    /// Profiling table, JSON array of samples
    #[serde(default)]
    pub profile_path: Option<PathBuf>,

    /// Predicted workload sizes, JSON object of `[time_step][offset]` tables
    #[serde(default)]
    pub predicted_path: Option<PathBuf>,

    /// Observed workload sizes in the same format; offset 0 is used
    #[serde(default)]
    pub actual_path: Option<PathBuf>,

    #[serde(default)]
    pub policy_model_path: Option<PathBuf>,

    #[serde(default = "default_policy_duration_low")]
    pub policy_duration_low: f64,

    #[serde(default = "default_policy_duration_high")]
    pub policy_duration_high: f64,

    #[serde(default = "default_executor")]
    pub executor: ExecutorKind,

    /// stress-ng instances per worker
    #[serde(default = "default_instances")]
    pub instances: u32,

    /// Seconds of sleep per modelled second for the model executor
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Also evaluate the full step-0 plan of the dynamic controller
    #[serde(default)]
    pub replay_plan: bool,

    #[serde(default = "default_barrier_path")]
    pub barrier_path: String,

    /// Health/metrics server port; no server when absent
    #[serde(default)]
    pub api_port: Option<u16>,

    #[serde(default = "default_node_name")]
    pub node_name: String,
}

fn default_mode() -> Mode {
    Mode::Simulated
}

fn default_controller() -> ControllerKind {
    ControllerKind::Dynamic
}

fn default_simulation_length() -> usize {
    50
}

fn default_window_size() -> usize {
    5
}

fn default_fixed_window() -> usize {
    3
}

fn default_total_shares() -> u32 {
    gang_lib::configurer::DEFAULT_TOTAL_SHARES
}

fn default_starting_shares() -> u32 {
    100
}

fn default_share_increment() -> u32 {
    100
}

fn default_min_workload() -> f64 {
    5.0
}

fn default_max_workload() -> f64 {
    20.0
}

fn default_checkpoint_penalty() -> f64 {
    10.0
}

fn default_length_penalty() -> f64 {
    gang_lib::horizon::DEFAULT_LENGTH_PENALTY
}

fn default_improvement_decay() -> f64 {
    gang_lib::configurer::DEFAULT_IMPROVEMENT_DECAY
}

fn default_barrier_timeout() -> u64 {
    600
}

fn default_job_retry_backoff() -> u64 {
    20_000
}

fn default_tasks() -> Vec<Task> {
    [
        ("aiol", "--aiol-ops"),
        ("atomic", "--atomic-ops"),
        ("branch", "--branch-ops"),
        ("bsearch", "--bsearch-ops"),
        ("cache", "--cache-ops"),
        ("matrix", "--matrix-ops"),
        ("memcpy", "--memcpy-ops"),
        ("mq", "--mq-ops"),
        ("vecmath", "--vecmath-ops"),
    ]
    .into_iter()
    .map(|(name, param)| Task::new(name, param))
    .collect()
}

fn default_policy_duration_low() -> f64 {
    gang_lib::horizon::DEFAULT_DURATION_LOW
}

fn default_policy_duration_high() -> f64 {
    gang_lib::horizon::DEFAULT_DURATION_HIGH
}

fn default_executor() -> ExecutorKind {
    ExecutorKind::Model
}

fn default_instances() -> u32 {
    1
}

fn default_time_scale() -> f64 {
    0.001
}

fn default_barrier_path() -> String {
    "/gang/barrier".to_string()
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

impl SimConfig {
    /// Load configuration from an optional file and `GANG_*` environment variables
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::from(PathBuf::from(path)));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("GANG").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Reject combinations the simulator cannot run with
    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |reason: String| Err(SimulationError::InvalidConfig(reason));

        if self.tasks.is_empty() {
            return invalid("no tasks configured".to_string());
        }
        if self.share_increment == 0 {
            return invalid("share_increment must be positive".to_string());
        }
        let floor = self.starting_shares as u64 * self.tasks.len() as u64;
        if floor > self.total_shares as u64 {
            return invalid(format!(
                "{} tasks at {} starting shares exceed the budget of {}",
                self.tasks.len(),
                self.starting_shares,
                self.total_shares
            ));
        }
        if self.fixed_window == 0 {
            return invalid("fixed_window must be positive".to_string());
        }
        if self.window_size == 0 {
            return invalid("window_size must be positive".to_string());
        }
        if self.simulation_length == 0 {
            return invalid("simulation_length must be positive".to_string());
        }
        if self.min_workload > self.max_workload {
            return invalid("min_workload exceeds max_workload".to_string());
        }
        if self.policy_duration_low >= self.policy_duration_high {
            return invalid("policy duration band is empty".to_string());
        }
        Ok(())
    }

    pub fn allocation_params(&self) -> AllocationParams {
        AllocationParams {
            total_shares: self.total_shares,
            starting_shares: self.starting_shares,
            share_increment: self.share_increment,
            max_task_shares: self.max_task_shares,
            improvement_decay: self.improvement_decay,
            min_workload: self.min_workload,
            max_workload: self.max_workload,
        }
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.barrier_timeout_secs)
    }

    pub fn job_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.job_retry_backoff_ms)
    }
}
