//! Cluster job lifecycle contract
//!
//! One job runs per task and carries its share allocation. Reconfiguring the
//! gang means deleting every job and creating it again; the two calls are
//! separate and not transactional.

mod local;
mod retry;

pub use local::LocalJobClient;
pub use retry::{RetryPolicy, DEFAULT_RETRY_BACKOFF};

use crate::error::ClusterError;
use crate::models::Task;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const ENV_JOB_NAME: &str = "JOB_NAME";
pub const ENV_OP_NAME: &str = "OP_NAME";
pub const ENV_WORKLOAD_MODIFIER: &str = "WORKLOAD_MODIFIER";
pub const ENV_NUM_TASKS: &str = "NUM_TASKS";
pub const ENV_NUM_INSTANCES: &str = "NUM_INSTANCES";
pub const ENV_BARRIER_PATH: &str = "BARRIER_PATH";

/// A job created by a [`JobClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub name: String,
    pub cpu_shares: u32,
    pub created_at: DateTime<Utc>,
}

/// Environment handed to a worker job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    env: HashMap<String, String>,
}

impl JobSpec {
    /// Environment for the worker of `task` in a gang of `num_tasks`
    pub fn env_for(task: &Task, num_tasks: usize, barrier_path: &str, instances: u32) -> Self {
        let env = [
            (ENV_JOB_NAME, task.name.clone()),
            (ENV_OP_NAME, task.workload_param.clone()),
            (ENV_WORKLOAD_MODIFIER, task.workload_modifier.to_string()),
            (ENV_NUM_TASKS, num_tasks.to_string()),
            (ENV_NUM_INSTANCES, instances.to_string()),
            (ENV_BARRIER_PATH, barrier_path.to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
        Self { env }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Required variable, or `MissingEnv`
    pub fn require(env: &HashMap<String, String>, key: &'static str) -> Result<String, ClusterError> {
        env.get(key).cloned().ok_or(ClusterError::MissingEnv(key))
    }

    /// Required variable parsed as a number
    pub fn require_parsed<T: std::str::FromStr>(
        env: &HashMap<String, String>,
        key: &'static str,
    ) -> Result<T, ClusterError> {
        Self::require(env, key)?
            .parse()
            .map_err(|_| ClusterError::Rejected(format!("{key} is not a valid number")))
    }
}

/// Trait for cluster job backends
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Start the worker described by `env` with `cpu_shares`
    async fn create_job(
        &self,
        env: &HashMap<String, String>,
        cpu_shares: u32,
    ) -> Result<JobHandle, ClusterError>;

    /// Stop the worker of `task_name`; deleting an absent job succeeds
    async fn delete_job(&self, task_name: &str) -> Result<(), ClusterError>;
}
