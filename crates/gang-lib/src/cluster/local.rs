//! In-process job backend running gang workers as tokio tasks

use super::{
    JobClient, JobHandle, JobSpec, ENV_BARRIER_PATH, ENV_JOB_NAME, ENV_NUM_TASKS, ENV_OP_NAME,
    ENV_WORKLOAD_MODIFIER,
};
use crate::coordination::{CoordinationHub, GangWorker, WorkExecutor};
use crate::error::ClusterError;
use crate::models::Task;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Job client whose "jobs" are [`GangWorker`]s bound to a shared hub
pub struct LocalJobClient {
    hub: Arc<CoordinationHub>,
    executor: Arc<dyn WorkExecutor>,
    running: DashMap<String, JoinHandle<()>>,
}

impl LocalJobClient {
    pub fn new(hub: Arc<CoordinationHub>, executor: Arc<dyn WorkExecutor>) -> Self {
        Self {
            hub,
            executor,
            running: DashMap::new(),
        }
    }

    /// Names of the jobs currently running
    pub fn running_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl JobClient for LocalJobClient {
    async fn create_job(
        &self,
        env: &HashMap<String, String>,
        cpu_shares: u32,
    ) -> Result<JobHandle, ClusterError> {
        let name = JobSpec::require(env, ENV_JOB_NAME)?;
        let workload_param = JobSpec::require(env, ENV_OP_NAME)?;
        let workload_modifier: u32 = JobSpec::require_parsed(env, ENV_WORKLOAD_MODIFIER)?;
        let num_tasks: usize = JobSpec::require_parsed(env, ENV_NUM_TASKS)?;
        let barrier_path = JobSpec::require(env, ENV_BARRIER_PATH)?;

        let barrier = self.hub.barrier();
        if barrier_path != barrier.name() {
            return Err(ClusterError::Rejected(format!(
                "job {} targets barrier {}, hub serves {}",
                name,
                barrier_path,
                barrier.name()
            )));
        }
        if num_tasks + 1 != barrier.parties() {
            return Err(ClusterError::Rejected(format!(
                "job {} expects a gang of {} tasks, barrier holds {} parties",
                name,
                num_tasks,
                barrier.parties()
            )));
        }
        if self.running.contains_key(&name) {
            return Err(ClusterError::Rejected(format!("job {name} already exists")));
        }

        let task = Task::new(name.clone(), workload_param).with_modifier(workload_modifier);
        let worker = GangWorker::new(
            task,
            cpu_shares,
            self.hub.queue(&name),
            barrier,
            Arc::clone(&self.executor),
        );

        let job = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                warn!(job = %job, error = %e, "Gang worker exited with error");
            }
        });
        self.running.insert(name.clone(), handle);

        info!(job = %name, cpu_shares, "Created job");
        Ok(JobHandle {
            name,
            cpu_shares,
            created_at: Utc::now(),
        })
    }

    async fn delete_job(&self, task_name: &str) -> Result<(), ClusterError> {
        match self.running.remove(task_name) {
            Some((_, handle)) => {
                handle.abort();
                info!(job = %task_name, "Deleted job");
            }
            None => debug!(job = %task_name, "No job to delete"),
        }
        Ok(())
    }
}

impl Drop for LocalJobClient {
    fn drop(&mut self) {
        for entry in self.running.iter() {
            entry.value().abort();
        }
    }
}
