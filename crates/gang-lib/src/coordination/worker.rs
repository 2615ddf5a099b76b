//! Gang worker loop and unit-of-work executors

use super::{DoubleBarrier, WorkQueue};
use crate::error::CoordinationError;
use crate::models::Task;
use crate::performance::PerformanceModels;
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One entry of a task queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkItem {
    /// Work for one time step
    Step { time_step: usize, workload_size: f64 },
    /// Ends the worker loop
    Stop,
}

/// Trait for running one step of a task's work
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, task: &Task, workload_size: f64, cpu_shares: u32) -> anyhow::Result<()>;
}

/// Runs the stress-ng benchmark named after the task
#[derive(Debug, Clone)]
pub struct StressNgExecutor {
    program: String,
    instances: u32,
}

impl StressNgExecutor {
    pub fn new(instances: u32) -> Self {
        Self {
            program: "stress-ng".to_string(),
            instances,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Operation count passed to stress-ng for `workload_size`
    pub fn operations(task: &Task, workload_size: f64) -> u64 {
        (task.workload_modifier as f64 * workload_size).round().max(0.0) as u64
    }

    pub fn args(&self, task: &Task, workload_size: f64) -> Vec<String> {
        vec![
            "--metrics".to_string(),
            format!("--{}", task.name),
            self.instances.to_string(),
            task.workload_param.clone(),
            Self::operations(task, workload_size).to_string(),
        ]
    }
}

#[async_trait]
impl WorkExecutor for StressNgExecutor {
    async fn execute(&self, task: &Task, workload_size: f64, _cpu_shares: u32) -> anyhow::Result<()> {
        let output = Command::new(&self.program)
            .args(self.args(task, workload_size))
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Sleeps for the modelled duration, scaled; for emulating a gang locally
pub struct ModelExecutor {
    models: Arc<PerformanceModels>,
    time_scale: f64,
}

impl ModelExecutor {
    pub fn new(models: Arc<PerformanceModels>, time_scale: f64) -> Self {
        Self {
            models,
            time_scale: time_scale.max(0.0),
        }
    }
}

#[async_trait]
impl WorkExecutor for ModelExecutor {
    async fn execute(&self, task: &Task, workload_size: f64, cpu_shares: u32) -> anyhow::Result<()> {
        let model = self
            .models
            .get(&task.name)
            .with_context(|| format!("no model for task {}", task.name))?;
        let seconds = model.predict(workload_size, cpu_shares) * self.time_scale;
        if seconds.is_finite() && seconds > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        }
        Ok(())
    }
}

/// One member of the gang, bound to its task queue and the shared barrier
pub struct GangWorker {
    task: Task,
    cpu_shares: u32,
    queue: Arc<WorkQueue<WorkItem>>,
    barrier: Arc<DoubleBarrier>,
    executor: Arc<dyn WorkExecutor>,
}

impl GangWorker {
    pub fn new(
        task: Task,
        cpu_shares: u32,
        queue: Arc<WorkQueue<WorkItem>>,
        barrier: Arc<DoubleBarrier>,
        executor: Arc<dyn WorkExecutor>,
    ) -> Self {
        Self {
            task,
            cpu_shares,
            queue,
            barrier,
            executor,
        }
    }

    /// Process one item per time step until a stop item arrives.
    ///
    /// A failing unit of work is logged and the worker still reaches the
    /// barrier so the gang does not stall on it.
    pub async fn run(self) -> Result<(), CoordinationError> {
        info!(task = %self.task.name, cpu_shares = self.cpu_shares, "Gang worker ready");

        loop {
            let item = self.queue.get().await;
            self.queue.consume();

            let (time_step, workload_size) = match item {
                WorkItem::Step {
                    time_step,
                    workload_size,
                } => (time_step, workload_size),
                WorkItem::Stop => {
                    info!(task = %self.task.name, "Gang worker stopping");
                    return Ok(());
                }
            };

            self.barrier.enter().await?;
            let started = Instant::now();
            if let Err(e) = self
                .executor
                .execute(&self.task, workload_size, self.cpu_shares)
                .await
            {
                warn!(task = %self.task.name, time_step, error = %e, "Unit of work failed");
            }
            debug!(
                task = %self.task.name,
                time_step,
                workload_size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Unit of work done"
            );
            self.barrier.leave().await?;
        }
    }
}
