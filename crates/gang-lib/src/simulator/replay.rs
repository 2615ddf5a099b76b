//! Evaluate a precomputed horizon plan without stepping the controller

use super::Simulator;
use crate::configurer::ResourceConfigurer;
use crate::error::SimulationError;
use crate::horizon::HorizonPlan;
use crate::models::{ConfigurationWindow, ResourceConfiguration};
use serde::Serialize;
use tracing::info;

/// Outcome of walking a [`HorizonPlan`] segment by segment
#[derive(Debug, Clone, Serialize)]
pub struct PlanReplay {
    pub segments: Vec<(usize, usize)>,
    pub total_duration: f64,
    pub checkpoints: u32,
    pub penalized_duration: f64,
}

impl Simulator {
    /// Install each planned segment's allocation from `predicted` and model
    /// its steps on `actual`.
    ///
    /// A segment that keeps the configuration uses `current`. Cuts after the
    /// first segment each cost `checkpoint_penalty`, as does the first one
    /// when the plan does not start at step 0.
    pub fn replay_plan(
        predicted: &ResourceConfigurer,
        actual: &ResourceConfigurer,
        plan: &HorizonPlan,
        current: &ResourceConfiguration,
        checkpoint_penalty: f64,
    ) -> Result<PlanReplay, SimulationError> {
        let origin = plan.time_step();
        let mut replay = PlanReplay {
            segments: Vec::new(),
            total_duration: 0.0,
            checkpoints: 0,
            penalized_duration: 0.0,
        };

        for segment in plan.segments() {
            let window = segment.window;
            let configuration = if segment.reconfigure {
                if origin + window.starting_offset != 0 {
                    replay.checkpoints += 1;
                }
                predicted.allocate_configuration(&window)
            } else {
                current.clone()
            };

            for offset in window.offsets() {
                let step = ConfigurationWindow::new(origin + offset, 1);
                replay.total_duration += actual
                    .estimate_window_runtime(&configuration, &step)
                    .ok_or_else(|| {
                        SimulationError::InvalidConfig(format!(
                            "actual workload table does not cover time step {}",
                            origin + offset
                        ))
                    })?;
            }
            replay
                .segments
                .push((window.starting_offset, window.window_size));
        }

        replay.penalized_duration =
            replay.total_duration + replay.checkpoints as f64 * checkpoint_penalty;
        info!(
            segments = replay.segments.len(),
            total_duration = replay.total_duration,
            penalized_duration = replay.penalized_duration,
            "Replayed horizon plan"
        );
        Ok(replay)
    }
}
