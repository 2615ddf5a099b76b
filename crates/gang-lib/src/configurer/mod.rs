//! Bottleneck-driven resource configuration
//!
//! Every gang member must finish a step before any proceeds, so a window's
//! cost is the sum over offsets of the slowest task's predicted duration.
//! Shares are handed out greedily to whichever bottleneck gains the most.

#[cfg(test)]
mod tests;

use crate::error::ModelError;
use crate::models::{ConfigurationWindow, Forecast, ResourceConfiguration, RunResult, Task};
use crate::performance::PerformanceModels;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Default total share budget
pub const DEFAULT_TOTAL_SHARES: u32 = 4000;

/// Default per-offset discount for improvements further into the window
pub const DEFAULT_IMPROVEMENT_DECAY: f64 = 0.95;

/// Parameters of the greedy allocation search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationParams {
    /// Share budget across all tasks
    pub total_shares: u32,
    /// Floor every task starts from
    pub starting_shares: u32,
    /// Shares added per greedy round
    pub share_increment: u32,
    /// Per-task cap
    pub max_task_shares: u32,
    /// Discount applied per forecast offset
    pub improvement_decay: f64,
    /// Configured workload size range, used by the static baseline
    pub min_workload: f64,
    pub max_workload: f64,
}

impl Default for AllocationParams {
    fn default() -> Self {
        Self {
            total_shares: DEFAULT_TOTAL_SHARES,
            starting_shares: 100,
            share_increment: 100,
            max_task_shares: DEFAULT_TOTAL_SHARES,
            improvement_decay: DEFAULT_IMPROVEMENT_DECAY,
            min_workload: 5.0,
            max_workload: 20.0,
        }
    }
}

impl AllocationParams {
    /// Representative workload size for forecast-free allocation
    pub fn midpoint_workload(&self) -> f64 {
        (self.min_workload + self.max_workload) / 2.0
    }
}

/// Owns the per-task performance models and the forecast they are evaluated on
#[derive(Debug, Clone)]
pub struct ResourceConfigurer {
    tasks: Arc<[Task]>,
    models: Arc<PerformanceModels>,
    forecast: Arc<Forecast>,
    params: AllocationParams,
}

impl ResourceConfigurer {
    pub fn new(
        tasks: Vec<Task>,
        models: PerformanceModels,
        forecast: Forecast,
        params: AllocationParams,
    ) -> Result<Self, ModelError> {
        if tasks.is_empty() {
            return Err(ModelError::Empty);
        }
        models.covers(&tasks)?;
        forecast.validate(&tasks)?;

        Ok(Self {
            tasks: tasks.into(),
            models: Arc::new(models),
            forecast: Arc::new(forecast),
            params,
        })
    }

    /// Configurer sharing these models but evaluating a different forecast
    pub fn with_forecast(&self, forecast: Forecast) -> Result<Self, ModelError> {
        forecast.validate(&self.tasks)?;
        Ok(Self {
            tasks: Arc::clone(&self.tasks),
            models: Arc::clone(&self.models),
            forecast: Arc::new(forecast),
            params: self.params.clone(),
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn models(&self) -> &Arc<PerformanceModels> {
        &self.models
    }

    pub fn forecast(&self) -> &Forecast {
        &self.forecast
    }

    pub fn params(&self) -> &AllocationParams {
        &self.params
    }

    /// Every task at the share floor
    pub fn starting_configuration(&self) -> ResourceConfiguration {
        ResourceConfiguration::uniform(self.tasks.iter(), self.params.starting_shares)
    }

    fn predict(&self, task: &Task, workload_size: f64, cpu_shares: u32) -> f64 {
        self.models
            .get(&task.name)
            .map(|model| model.predict(workload_size, cpu_shares))
            .unwrap_or(f64::INFINITY)
    }

    fn shares_of(&self, configuration: &ResourceConfiguration, task: &Task) -> u32 {
        configuration
            .get(&task.name)
            .unwrap_or(self.params.starting_shares)
    }

    /// Bottleneck task and its index in declaration order.
    /// Ties go to the earlier task.
    fn bottleneck(
        &self,
        configuration: &ResourceConfiguration,
        window: &ConfigurationWindow,
        offset: usize,
    ) -> Option<(usize, RunResult)> {
        let forecast_offset = window.starting_offset + offset;
        let mut slowest: Option<(usize, RunResult)> = None;

        for (index, task) in self.tasks.iter().enumerate() {
            let workload_size = self
                .forecast
                .size(&task.name, window.time_step, forecast_offset)?;
            let cpu_shares = self.shares_of(configuration, task);
            let predicted_duration = self.predict(task, workload_size, cpu_shares);

            let slower = slowest
                .as_ref()
                .map_or(true, |(_, current)| predicted_duration > current.predicted_duration);
            if slower {
                slowest = Some((
                    index,
                    RunResult {
                        task: task.name.clone(),
                        predicted_duration,
                        workload_size,
                        cpu_shares,
                    },
                ));
            }
        }
        slowest
    }

    /// The task the whole gang waits on at `offset` into `window`.
    ///
    /// Returns `None` when the forecast does not reach that offset.
    pub fn slowest_task(
        &self,
        configuration: &ResourceConfiguration,
        window: &ConfigurationWindow,
        offset: usize,
    ) -> Option<RunResult> {
        self.bottleneck(configuration, window, offset)
            .map(|(_, result)| result)
    }

    /// Modelled wall-clock cost of holding `configuration` over `window`.
    ///
    /// Returns `None` when the forecast does not cover the whole window.
    pub fn estimate_window_runtime(
        &self,
        configuration: &ResourceConfiguration,
        window: &ConfigurationWindow,
    ) -> Option<f64> {
        (0..window.window_size)
            .map(|offset| {
                self.slowest_task(configuration, window, offset)
                    .map(|result| result.predicted_duration)
            })
            .sum()
    }

    /// Greedy water-filling allocation over `window`.
    ///
    /// Each round finds the bottleneck at every offset, totals the discounted
    /// duration improvement one more increment would give each bottleneck
    /// task, and grants the increment to the task with the largest total.
    pub fn allocate_configuration(&self, window: &ConfigurationWindow) -> ResourceConfiguration {
        let params = &self.params;
        let mut configuration = self.starting_configuration();
        let mut rounds = 0usize;

        while configuration.total() + params.share_increment <= params.total_shares {
            let mut improvements: Vec<Option<f64>> = vec![None; self.tasks.len()];

            for offset in 0..window.window_size {
                let Some((index, slowest)) = self.bottleneck(&configuration, window, offset) else {
                    break;
                };
                let next_shares = slowest.cpu_shares + params.share_increment;
                if next_shares > params.max_task_shares {
                    continue;
                }

                let improved = self.predict(&self.tasks[index], slowest.workload_size, next_shares);
                let gain = (slowest.predicted_duration - improved)
                    * params.improvement_decay.powi(offset as i32);
                *improvements[index].get_or_insert(0.0) += gain;
            }

            let mut best: Option<(usize, f64)> = None;
            for (index, improvement) in improvements.iter().enumerate() {
                if let Some(gain) = *improvement {
                    if best.map_or(true, |(_, top)| gain > top) {
                        best = Some((index, gain));
                    }
                }
            }

            let Some((index, gain)) = best else {
                debug!(
                    time_step = window.time_step,
                    total = configuration.total(),
                    "No task can take more shares, stopping allocation"
                );
                break;
            };

            let task = &self.tasks[index];
            let shares = configuration.increment(&task.name, params.share_increment);
            trace!(task = %task.name, shares, gain, "Incremented bottleneck task");
            rounds += 1;
        }

        debug!(
            time_step = window.time_step,
            window_size = window.window_size,
            starting_offset = window.starting_offset,
            rounds,
            total = configuration.total(),
            "Allocated configuration"
        );
        configuration
    }

    /// Forecast-independent baseline: a single representative workload size
    /// and repeated increments of the slowest task until its cap or the
    /// budget is reached.
    pub fn allocate_static_configuration(&self) -> ResourceConfiguration {
        let params = &self.params;
        let workload_size = params.midpoint_workload();
        let mut configuration = self.starting_configuration();

        while configuration.total() + params.share_increment <= params.total_shares {
            let slowest = self
                .tasks
                .iter()
                .map(|task| {
                    let shares = self.shares_of(&configuration, task);
                    (task, shares, self.predict(task, workload_size, shares))
                })
                .fold(None::<(&Task, u32, f64)>, |best, candidate| match best {
                    Some(current) if candidate.2 <= current.2 => Some(current),
                    _ => Some(candidate),
                });

            let Some((task, shares, _)) = slowest else {
                break;
            };
            if shares + params.share_increment > params.max_task_shares {
                break;
            }
            configuration.increment(&task.name, params.share_increment);
        }

        debug!(
            workload_size,
            total = configuration.total(),
            "Allocated static configuration"
        );
        configuration
    }
}
