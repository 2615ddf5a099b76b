//! Reconfiguration horizon control
//!
//! A controller decides at every time step how many future steps to commit
//! to a fresh allocation. Zero means keep the configuration that is installed.

mod dynamic;
mod fixed;
mod policy;

pub use dynamic::{DynamicHorizonController, HorizonPlan, PlanSegment, DEFAULT_LENGTH_PENALTY};
pub use fixed::FixedHorizonController;
pub use policy::{
    GreedyPolicy, HorizonPolicy, Observation, OnnxPolicy, PolicyHorizonController,
    DEFAULT_DURATION_HIGH, DEFAULT_DURATION_LOW,
};

use crate::models::ResourceConfiguration;

/// Trait for horizon strategies
pub trait HorizonController: Send {
    /// Steps to hold a new configuration starting at `time_step`, or 0 to keep `current`
    fn calculate_horizon(&mut self, time_step: usize, current: &ResourceConfiguration) -> usize;

    /// Strategy name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Longest horizon that both the forecast and the remaining simulation can support
pub(crate) fn feasible_horizon(
    window_size: usize,
    forecast_remaining: usize,
    simulation_length: usize,
    time_step: usize,
) -> usize {
    window_size
        .min(forecast_remaining)
        .min(simulation_length.saturating_sub(time_step))
}
