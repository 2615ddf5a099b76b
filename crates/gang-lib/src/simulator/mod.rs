//! Time-step simulation loop
//!
//! Each step the simulator asks the horizon controller whether to reconfigure,
//! installs a fresh allocation when it does, then runs one gang step: either
//! modelled on the actual workload table, or executed by live workers under
//! barrier synchronization.

mod replay;
mod status;

pub use replay::PlanReplay;
pub use status::{RunStatus, StatusHandle};

use crate::cluster::{JobClient, JobSpec, RetryPolicy};
use crate::configurer::ResourceConfigurer;
use crate::coordination::{CoordinationHub, WorkItem};
use crate::error::{CoordinationError, SimulationError};
use crate::horizon::HorizonController;
use crate::models::{ConfigurationWindow, Forecast, ResourceConfiguration};
use crate::observability::{GangMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// How configurations are chosen over a run
pub enum Strategy {
    /// One forecast-independent allocation for the whole run
    Static,
    /// Reconfigure whenever the controller returns a nonzero horizon
    Adaptive(Box<dyn HorizonController>),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Static => "static",
            Strategy::Adaptive(controller) => controller.name(),
        }
    }
}

/// Cluster side of a live run
pub struct LiveBackend {
    pub jobs: Arc<dyn JobClient>,
    pub hub: Arc<CoordinationHub>,
    /// Sizes fed to the workers, offset 0 of each step
    pub actual: Arc<Forecast>,
    pub retry: RetryPolicy,
    pub instances: u32,
}

pub enum SimulationMode {
    /// Step duration modelled against the actual workload table
    Simulated { actual: Arc<ResourceConfigurer> },
    /// Step duration measured across a barrier rendezvous
    Live(LiveBackend),
}

impl SimulationMode {
    pub fn name(&self) -> &'static str {
        match self {
            SimulationMode::Simulated { .. } => "simulated",
            SimulationMode::Live(_) => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Running,
    Finished,
    Aborted,
}

/// Outputs of a run; partial when carried by an aborted run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub strategy: String,
    pub total_duration: f64,
    pub checkpoints: u32,
    pub checkpoint_penalty: f64,
    /// `total_duration + checkpoints * checkpoint_penalty`
    pub penalized_duration: f64,
    pub steps_completed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Mutable state of one run
#[derive(Debug, Clone)]
pub struct SimulationState {
    pub phase: RunPhase,
    pub time_step: usize,
    pub configuration: ResourceConfiguration,
    pub checkpoints: u32,
    pub total_duration: f64,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            time_step: 0,
            configuration: ResourceConfiguration::new(),
            checkpoints: 0,
            total_duration: 0.0,
            started_at: None,
        }
    }
}

pub struct Simulator {
    configurer: Arc<ResourceConfigurer>,
    strategy: Strategy,
    mode: SimulationMode,
    simulation_length: usize,
    checkpoint_penalty: f64,
    metrics: GangMetrics,
    logger: StructuredLogger,
    status: StatusHandle,
    state: SimulationState,
}

impl Simulator {
    /// `configurer` evaluates the predicted workload table
    pub fn new(
        configurer: Arc<ResourceConfigurer>,
        strategy: Strategy,
        mode: SimulationMode,
        simulation_length: usize,
        checkpoint_penalty: f64,
        logger: StructuredLogger,
    ) -> Result<Self, SimulationError> {
        let tasks = configurer.tasks();
        match &mode {
            SimulationMode::Simulated { actual } => {
                if actual.forecast().time_steps() < simulation_length {
                    return Err(SimulationError::InvalidConfig(format!(
                        "actual workload table covers {} steps, simulation needs {}",
                        actual.forecast().time_steps(),
                        simulation_length
                    )));
                }
                actual.forecast().validate(tasks)?;
            }
            SimulationMode::Live(live) => {
                if live.hub.barrier().parties() != tasks.len() + 1 {
                    return Err(SimulationError::InvalidConfig(format!(
                        "barrier holds {} parties, gang needs {}",
                        live.hub.barrier().parties(),
                        tasks.len() + 1
                    )));
                }
                if live.actual.time_steps() < simulation_length {
                    return Err(SimulationError::InvalidConfig(format!(
                        "actual workload table covers {} steps, simulation needs {}",
                        live.actual.time_steps(),
                        simulation_length
                    )));
                }
                live.actual.validate(tasks)?;
            }
        }

        Ok(Self {
            configurer,
            strategy,
            mode,
            simulation_length,
            checkpoint_penalty,
            metrics: GangMetrics::new(),
            logger,
            status: StatusHandle::new(),
            state: SimulationState::default(),
        })
    }

    /// Share a status handle with readers such as the health endpoint
    pub fn with_status(mut self, status: StatusHandle) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Run every time step and report the totals
    pub async fn run(&mut self) -> Result<RunReport, SimulationError> {
        self.state = SimulationState {
            phase: RunPhase::Running,
            started_at: Some(Utc::now()),
            ..SimulationState::default()
        };
        let strategy = self.strategy.name();
        let simulation_length = self.simulation_length;
        self.status
            .update(|status| {
                status.phase = RunPhase::Running;
                status.strategy = strategy.to_string();
                status.simulation_length = simulation_length;
                status.time_step = 0;
                status.checkpoints = 0;
                status.total_duration = 0.0;
            })
            .await;
        self.logger.log_simulation_started(
            strategy,
            self.mode.name(),
            self.configurer.tasks().len(),
            self.simulation_length,
        );

        for time_step in 0..self.simulation_length {
            self.state.time_step = time_step;
            self.metrics.set_time_step(time_step);
            if let Err(e) = self.step(time_step).await {
                return Err(self.abort(time_step, e).await);
            }
        }

        self.state.time_step = self.simulation_length;
        if let Err(e) = self.teardown().await {
            return Err(self.abort(self.simulation_length, e).await);
        }

        self.state.phase = RunPhase::Finished;
        let report = self.report(Some(Utc::now()));
        self.status
            .update(|status| status.phase = RunPhase::Finished)
            .await;
        self.logger.log_finished(
            report.total_duration,
            report.checkpoints,
            report.penalized_duration,
        );
        Ok(report)
    }

    async fn step(&mut self, time_step: usize) -> Result<(), SimulationError> {
        if let Some((horizon, configuration)) = self.decide(time_step) {
            self.install(time_step, horizon, configuration).await?;
        }

        let duration = self.execute(time_step).await?;
        self.state.total_duration += duration;
        self.metrics.observe_step_duration(duration);
        self.logger
            .log_time_step(time_step, duration, self.state.total_duration);

        let (checkpoints, total_duration) = (self.state.checkpoints, self.state.total_duration);
        self.status
            .update(|status| {
                status.time_step = time_step + 1;
                status.checkpoints = checkpoints;
                status.total_duration = total_duration;
            })
            .await;
        Ok(())
    }

    /// New configuration to install at `time_step`, if any
    fn decide(&mut self, time_step: usize) -> Option<(usize, ResourceConfiguration)> {
        match &mut self.strategy {
            Strategy::Static => (time_step == 0).then(|| {
                (
                    self.simulation_length,
                    self.configurer.allocate_static_configuration(),
                )
            }),
            Strategy::Adaptive(controller) => {
                let mut horizon = controller.calculate_horizon(time_step, &self.state.configuration);
                self.metrics.observe_horizon(horizon);

                if horizon == 0 && self.state.configuration.is_empty() {
                    warn!(time_step, "Controller kept an empty configuration, forcing a one-step horizon");
                    horizon = 1;
                }
                if horizon == 0 {
                    debug!(time_step, "Keeping current configuration");
                    return None;
                }

                let window = ConfigurationWindow::new(time_step, horizon);
                Some((horizon, self.configurer.allocate_configuration(&window)))
            }
        }
    }

    async fn install(
        &mut self,
        time_step: usize,
        horizon: usize,
        configuration: ResourceConfiguration,
    ) -> Result<(), SimulationError> {
        let checkpoint = time_step != 0;

        if let SimulationMode::Live(live) = &self.mode {
            let tasks = self.configurer.tasks();
            let barrier = live.hub.barrier();
            for task in tasks {
                live.retry
                    .run("delete_job", || live.jobs.delete_job(&task.name))
                    .await?;
            }
            for task in tasks {
                let spec = JobSpec::env_for(task, tasks.len(), barrier.name(), live.instances);
                let shares = configuration
                    .get(&task.name)
                    .unwrap_or(self.configurer.params().starting_shares);
                live.retry
                    .run("create_job", || live.jobs.create_job(spec.env(), shares))
                    .await?;
            }
        }

        if checkpoint {
            self.state.checkpoints += 1;
            self.metrics.inc_checkpoints();
        }
        self.metrics.set_configuration(&configuration);
        self.logger
            .log_reconfiguration(time_step, horizon, &configuration, checkpoint);
        self.state.configuration = configuration;
        Ok(())
    }

    async fn execute(&self, time_step: usize) -> Result<f64, SimulationError> {
        match &self.mode {
            SimulationMode::Simulated { actual } => actual
                .estimate_window_runtime(
                    &self.state.configuration,
                    &ConfigurationWindow::new(time_step, 1),
                )
                .ok_or_else(|| {
                    SimulationError::InvalidConfig(format!(
                        "actual workload table does not cover time step {time_step}"
                    ))
                }),
            SimulationMode::Live(live) => {
                for task in self.configurer.tasks() {
                    let workload_size = live.actual.size(&task.name, time_step, 0).ok_or_else(|| {
                        SimulationError::InvalidConfig(format!(
                            "no actual size for task {} at time step {time_step}",
                            task.name
                        ))
                    })?;
                    live.hub.queue(&task.name).put(WorkItem::Step {
                        time_step,
                        workload_size,
                    });
                }

                let barrier = live.hub.barrier();
                self.rendezvous(barrier.enter().await)?;
                let started = Instant::now();
                self.rendezvous(barrier.leave().await)?;
                Ok(started.elapsed().as_secs_f64())
            }
        }
    }

    fn rendezvous(&self, outcome: Result<(), CoordinationError>) -> Result<(), SimulationError> {
        if let Err(CoordinationError::GangStall { .. }) = &outcome {
            self.metrics.inc_gang_stalls();
        }
        outcome.map_err(SimulationError::from)
    }

    /// Delete every job and clear coordination state
    async fn teardown(&self) -> Result<(), SimulationError> {
        if let SimulationMode::Live(live) = &self.mode {
            for task in self.configurer.tasks() {
                live.retry
                    .run("delete_job", || live.jobs.delete_job(&task.name))
                    .await?;
            }
            live.hub.reset();
        }
        Ok(())
    }

    async fn abort(&mut self, time_step: usize, source: SimulationError) -> SimulationError {
        if let SimulationMode::Live(live) = &self.mode {
            for task in self.configurer.tasks() {
                if let Err(e) = live.jobs.delete_job(&task.name).await {
                    warn!(task = %task.name, error = %e, "Failed to delete job during abort");
                }
            }
            live.hub.reset();
        }

        self.state.phase = RunPhase::Aborted;
        let report = self.report(Some(Utc::now()));
        self.status
            .update(|status| status.phase = RunPhase::Aborted)
            .await;
        self.logger.log_aborted(
            time_step,
            &source.to_string(),
            report.total_duration,
            report.checkpoints,
        );

        SimulationError::Aborted {
            time_step,
            report: Box::new(report),
            source: Box::new(source),
        }
    }

    fn report(&self, finished_at: Option<DateTime<Utc>>) -> RunReport {
        let checkpoints = self.state.checkpoints;
        RunReport {
            strategy: self.strategy.name().to_string(),
            total_duration: self.state.total_duration,
            checkpoints,
            checkpoint_penalty: self.checkpoint_penalty,
            penalized_duration: self.state.total_duration
                + checkpoints as f64 * self.checkpoint_penalty,
            steps_completed: self.state.time_step,
            started_at: self.state.started_at.unwrap_or_else(Utc::now),
            finished_at,
        }
    }
}
