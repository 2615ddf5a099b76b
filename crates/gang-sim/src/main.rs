//! Gang simulator - tunes and runs a gang-scheduled workload
//!
//! Loads the profiling and workload tables, fits the performance surfaces,
//! and drives one run with the configured horizon strategy, either modelled
//! or against live gang workers.

use anyhow::{bail, Context, Result};
use gang_lib::{
    cluster::{LocalJobClient, RetryPolicy},
    coordination::{CoordinationHub, ModelExecutor, StressNgExecutor, WorkExecutor},
    horizon::{
        DynamicHorizonController, FixedHorizonController, GreedyPolicy, HorizonController,
        HorizonPolicy, OnnxPolicy, PolicyHorizonController,
    },
    simulator::{LiveBackend, RunReport, SimulationMode, Simulator, StatusHandle, Strategy},
    GangMetrics, PerformanceModels, ResourceConfiguration, ResourceConfigurer, StructuredLogger,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod inputs;

use config::{ControllerKind, ExecutorKind, Mode, SimConfig};

const SIM_VERSION: &str = env!("CARGO_PKG_VERSION");

fn required<'a>(path: &'a Option<std::path::PathBuf>, field: &str) -> Result<&'a Path> {
    match path {
        Some(path) => Ok(path.as_path()),
        None => bail!("{} must be configured", field),
    }
}

fn build_strategy(config: &SimConfig, predicted: &Arc<ResourceConfigurer>) -> Result<Strategy> {
    let controller: Box<dyn HorizonController> = match config.controller {
        ControllerKind::Static => return Ok(Strategy::Static),
        ControllerKind::Fixed => Box::new(FixedHorizonController::new(config.fixed_window)),
        ControllerKind::Dynamic => Box::new(
            DynamicHorizonController::new(
                Arc::clone(predicted),
                config.window_size,
                config.simulation_length,
                config.checkpoint_penalty,
            )
            .with_length_penalty(config.length_penalty),
        ),
        ControllerKind::Policy => {
            let num_actions = config.window_size + 1;
            let policy: Box<dyn HorizonPolicy> = match &config.policy_model_path {
                Some(path) => Box::new(
                    OnnxPolicy::from_path(path, num_actions, config.window_size)
                        .context("Failed to load horizon policy")?,
                ),
                None => {
                    info!("No policy model configured, using greedy policy");
                    Box::new(GreedyPolicy::new(
                        config.checkpoint_penalty,
                        config.policy_duration_low,
                        config.policy_duration_high,
                    ))
                }
            };
            Box::new(
                PolicyHorizonController::new(
                    Arc::clone(predicted),
                    policy,
                    num_actions,
                    config.window_size,
                    config.simulation_length,
                    config.checkpoint_penalty,
                )
                .with_duration_band(
                    config.policy_duration_low,
                    config.policy_duration_high,
                    config.checkpoint_penalty,
                ),
            )
        }
    };
    Ok(Strategy::Adaptive(controller))
}

fn build_mode(
    config: &SimConfig,
    predicted: &ResourceConfigurer,
    actual: Arc<ResourceConfigurer>,
) -> SimulationMode {
    match config.mode {
        Mode::Simulated => SimulationMode::Simulated { actual },
        Mode::Live => {
            let hub = Arc::new(CoordinationHub::new(
                config.barrier_path.clone(),
                predicted.tasks().len() + 1,
                Some(config.barrier_timeout()),
            ));
            let executor: Arc<dyn WorkExecutor> = match config.executor {
                ExecutorKind::Model => Arc::new(ModelExecutor::new(
                    Arc::clone(predicted.models()),
                    config.time_scale,
                )),
                ExecutorKind::StressNg => Arc::new(StressNgExecutor::new(config.instances)),
            };
            let jobs = Arc::new(LocalJobClient::new(Arc::clone(&hub), executor));

            SimulationMode::Live(LiveBackend {
                jobs,
                hub,
                actual: Arc::new(actual.forecast().clone()),
                retry: RetryPolicy::new(config.job_retry_backoff(), config.job_max_attempts),
                instances: config.instances,
            })
        }
    }
}

fn print_report(report: &RunReport) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("Failed to encode run report")?
    );
    Ok(())
}

fn replay_step_zero_plan(
    config: &SimConfig,
    predicted: &Arc<ResourceConfigurer>,
    actual: &ResourceConfigurer,
) -> Result<()> {
    let mut controller = DynamicHorizonController::new(
        Arc::clone(predicted),
        config.window_size,
        config.simulation_length,
        config.checkpoint_penalty,
    )
    .with_length_penalty(config.length_penalty);
    controller.calculate_horizon(0, &ResourceConfiguration::new());

    let replay = Simulator::replay_plan(
        predicted,
        actual,
        controller.plan(),
        &ResourceConfiguration::new(),
        config.checkpoint_penalty,
    )?;
    println!(
        "{}",
        serde_json::to_string_pretty(&replay).context("Failed to encode plan replay")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = SIM_VERSION, "Starting gang-sim");

    let config = SimConfig::load()?;
    config.validate()?;
    info!(
        node_name = %config.node_name,
        mode = ?config.mode,
        controller = ?config.controller,
        tasks = config.tasks.len(),
        "Simulator configured"
    );

    let metrics = GangMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    let status = StatusHandle::new();

    if let Some(port) = config.api_port {
        let state = Arc::new(api::AppState::new(status.clone(), metrics.clone()));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                error!(error = %e, "API server failed");
            }
        });
    }

    let samples = inputs::load_profile(required(&config.profile_path, "profile_path")?)?;
    let predicted_sizes = inputs::load_forecast(
        required(&config.predicted_path, "predicted_path")?,
        "predicted workload table",
    )?;
    let actual_sizes = inputs::load_forecast(
        required(&config.actual_path, "actual_path")?,
        "actual workload table",
    )?;

    let models = PerformanceModels::fit_all(&config.tasks, &samples, config.extrapolation)
        .context("Failed to fit performance surfaces")?;
    let predicted = Arc::new(ResourceConfigurer::new(
        config.tasks.clone(),
        models,
        predicted_sizes,
        config.allocation_params(),
    )?);
    let actual = Arc::new(predicted.with_forecast(actual_sizes)?);

    if config.replay_plan {
        replay_step_zero_plan(&config, &predicted, &actual)?;
    }

    let strategy = build_strategy(&config, &predicted)?;
    let mode = build_mode(&config, &predicted, actual);
    let mut simulator = Simulator::new(
        Arc::clone(&predicted),
        strategy,
        mode,
        config.simulation_length,
        config.checkpoint_penalty,
        logger,
    )?
    .with_status(status);

    match simulator.run().await {
        Ok(report) => {
            info!(
                total_duration = report.total_duration,
                checkpoints = report.checkpoints,
                penalized_duration = report.penalized_duration,
                "Run complete"
            );
            print_report(&report)
        }
        Err(e) => {
            if let Some(report) = e.partial_report() {
                print_report(report)?;
            }
            Err(anyhow::Error::new(e).context("Simulation aborted"))
        }
    }
}
