//! Dynamic-programming horizon search
//!
//! Over a bounded lookahead `H` the controller finds the cheapest way to cut
//! the next `H` steps into committed segments. Each segment costs its
//! modelled runtime under a fresh allocation, scaled by `length_penalty^len`,
//! and every cut between segments costs one checkpoint penalty.

use super::{feasible_horizon, HorizonController};
use crate::configurer::ResourceConfigurer;
use crate::models::{ConfigurationWindow, ResourceConfiguration};
use std::sync::Arc;
use tracing::debug;

/// Default base of the exponential horizon-length penalty
pub const DEFAULT_LENGTH_PENALTY: f64 = 1.02;

/// One segment of a horizon plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanSegment {
    pub window: ConfigurationWindow,
    /// False when the segment keeps the configuration already installed
    pub reconfigure: bool,
}

/// Memoized DP state for a single time step
#[derive(Debug, Clone, Default)]
pub struct HorizonPlan {
    time_step: usize,
    best_cost_from: Vec<f64>,
    best_horizon_from: Vec<usize>,
    keep_length: Option<usize>,
}

impl HorizonPlan {
    fn reset(&mut self, time_step: usize, horizon: usize) {
        self.time_step = time_step;
        self.best_cost_from.clear();
        self.best_cost_from.resize(horizon, f64::INFINITY);
        self.best_horizon_from.clear();
        self.best_horizon_from.resize(horizon, 0);
        self.keep_length = None;
    }

    pub fn time_step(&self) -> usize {
        self.time_step
    }

    /// Lookahead the plan was computed over
    pub fn len(&self) -> usize {
        self.best_cost_from.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best_cost_from.is_empty()
    }

    /// Minimal remaining cost committing from each offset
    pub fn best_cost_from(&self) -> &[f64] {
        &self.best_cost_from
    }

    /// Horizon achieving `best_cost_from` at each offset
    pub fn best_horizon_from(&self) -> &[usize] {
        &self.best_horizon_from
    }

    /// Total cost of the plan, `None` when nothing was feasible
    pub fn cost(&self) -> Option<f64> {
        self.best_cost_from.first().copied().filter(|c| c.is_finite())
    }

    /// Walk the plan from offset 0
    pub fn segments(&self) -> Vec<PlanSegment> {
        let mut segments = Vec::new();
        let mut start = 0;

        if let (Some(0), Some(keep)) = (self.best_horizon_from.first(), self.keep_length) {
            segments.push(PlanSegment {
                window: ConfigurationWindow::new(self.time_step, keep),
                reconfigure: false,
            });
            start = keep;
        }

        while start < self.len() {
            let horizon = self.best_horizon_from[start];
            if horizon == 0 {
                break;
            }
            segments.push(PlanSegment {
                window: ConfigurationWindow::new(self.time_step, horizon).starting_at(start),
                reconfigure: true,
            });
            start += horizon;
        }
        segments
    }
}

/// Controller choosing the horizon by backward dynamic programming
pub struct DynamicHorizonController {
    configurer: Arc<ResourceConfigurer>,
    window_size: usize,
    simulation_length: usize,
    checkpoint_penalty: f64,
    length_penalty: f64,
    plan: HorizonPlan,
}

impl DynamicHorizonController {
    pub fn new(
        configurer: Arc<ResourceConfigurer>,
        window_size: usize,
        simulation_length: usize,
        checkpoint_penalty: f64,
    ) -> Self {
        Self {
            configurer,
            window_size,
            simulation_length,
            checkpoint_penalty,
            length_penalty: DEFAULT_LENGTH_PENALTY,
            plan: HorizonPlan::default(),
        }
    }

    pub fn with_length_penalty(mut self, length_penalty: f64) -> Self {
        self.length_penalty = length_penalty;
        self
    }

    /// Plan from the most recent call
    pub fn plan(&self) -> &HorizonPlan {
        &self.plan
    }

    /// Cost of whatever follows a segment ending at `end`
    fn continuation(&self, end: usize) -> f64 {
        if end < self.plan.len() {
            self.plan.best_cost_from[end] + self.checkpoint_penalty
        } else {
            0.0
        }
    }

    fn scaled(&self, runtime: f64, horizon: usize) -> f64 {
        runtime * self.length_penalty.powi(horizon as i32)
    }

    fn solve_from(&mut self, time_step: usize, start: usize) {
        let horizon_limit = self.plan.len() - start;
        let mut best: Option<(f64, usize)> = None;

        for horizon in 1..=horizon_limit {
            let window = ConfigurationWindow::new(time_step, horizon).starting_at(start);
            let configuration = self.configurer.allocate_configuration(&window);
            let Some(runtime) = self
                .configurer
                .estimate_window_runtime(&configuration, &window)
            else {
                continue;
            };

            let cost = self.scaled(runtime, horizon) + self.continuation(start + horizon);
            if best.map_or(true, |(top, _)| cost < top) {
                best = Some((cost, horizon));
            }
        }

        if let Some((cost, horizon)) = best {
            self.plan.best_cost_from[start] = cost;
            self.plan.best_horizon_from[start] = horizon;
        }
    }

    fn consider_current(&mut self, time_step: usize, current: &ResourceConfiguration) {
        let mut best: Option<(f64, usize)> = None;

        for keep in 1..=self.plan.len() {
            let window = ConfigurationWindow::new(time_step, keep);
            let Some(runtime) = self.configurer.estimate_window_runtime(current, &window) else {
                continue;
            };
            let cost = self.scaled(runtime, keep) + self.continuation(keep);
            if best.map_or(true, |(top, _)| cost < top) {
                best = Some((cost, keep));
            }
        }

        if let Some((cost, keep)) = best {
            if cost < self.plan.best_cost_from[0] {
                self.plan.best_cost_from[0] = cost;
                self.plan.best_horizon_from[0] = 0;
                self.plan.keep_length = Some(keep);
            }
        }
    }
}

impl HorizonController for DynamicHorizonController {
    fn calculate_horizon(&mut self, time_step: usize, current: &ResourceConfiguration) -> usize {
        let horizon = feasible_horizon(
            self.window_size,
            self.configurer.forecast().remaining(time_step),
            self.simulation_length,
            time_step,
        );
        self.plan.reset(time_step, horizon);
        if horizon == 0 {
            return 0;
        }

        for start in (0..horizon).rev() {
            self.solve_from(time_step, start);
        }

        if time_step != 0 {
            self.plan.best_cost_from[0] += self.checkpoint_penalty;
        }

        if !current.is_empty() {
            self.consider_current(time_step, current);
        }

        debug!(
            time_step,
            lookahead = horizon,
            plan = ?self.plan.best_horizon_from,
            cost = self.plan.best_cost_from[0],
            "Computed horizon plan"
        );
        self.plan.best_horizon_from[0]
    }

    fn name(&self) -> &'static str {
        "dynamic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurer::AllocationParams;
    use crate::models::{Forecast, Task};
    use crate::performance::PerformanceModels;
    use std::collections::HashMap;

    fn configurer(rows: [[f64; 5]; 4], total_shares: u32) -> Arc<ResourceConfigurer> {
        let tasks: Vec<Task> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| Task::new(*name, format!("--{}-ops", name)))
            .collect();

        let mut models = PerformanceModels::new();
        models.insert("a", |size: f64, shares: u32| size / shares as f64);
        models.insert("b", |size: f64, shares: u32| 2.0 * size / shares as f64);
        models.insert("c", |size: f64, shares: u32| size / shares as f64 + 0.5);
        models.insert("d", |size: f64, shares: u32| (size * size) / (50.0 * shares as f64));

        let mut series = HashMap::new();
        for (task, row) in tasks.iter().zip(rows) {
            // Two time steps: the second shifts the forecast by one offset
            let mut shifted = row[1..].to_vec();
            shifted.push(row[0]);
            series.insert(task.name.clone(), vec![row.to_vec(), shifted]);
        }

        let params = AllocationParams {
            total_shares,
            starting_shares: 100,
            share_increment: 100,
            max_task_shares: total_shares,
            improvement_decay: 0.95,
            min_workload: 5.0,
            max_workload: 20.0,
        };
        Arc::new(ResourceConfigurer::new(tasks, models, Forecast::new(series), params).unwrap())
    }

    fn synthetic_rows() -> [[f64; 5]; 4] {
        [
            [900.0, 100.0, 120.0, 800.0, 150.0],
            [50.0, 600.0, 40.0, 60.0, 700.0],
            [300.0, 320.0, 900.0, 100.0, 90.0],
            [200.0, 40.0, 250.0, 30.0, 220.0],
        ]
    }

    /// Cost of the cheapest partition of offsets `start..len` into fresh segments
    fn exhaustive(
        configurer: &ResourceConfigurer,
        time_step: usize,
        start: usize,
        len: usize,
        penalty: f64,
    ) -> f64 {
        let mut best = f64::INFINITY;
        for horizon in 1..=len - start {
            let window = ConfigurationWindow::new(time_step, horizon).starting_at(start);
            let config = configurer.allocate_configuration(&window);
            let runtime = configurer.estimate_window_runtime(&config, &window).unwrap();
            let rest = if start + horizon < len {
                penalty + exhaustive(configurer, time_step, start + horizon, len, penalty)
            } else {
                0.0
            };
            best = best.min(runtime + rest);
        }
        best
    }

    #[test]
    fn test_dp_matches_exhaustive_partition() {
        let configurer = configurer(synthetic_rows(), 1600);

        for penalty in [0.0, 0.5, 2.0, 10.0] {
            let mut controller =
                DynamicHorizonController::new(Arc::clone(&configurer), 5, 50, penalty)
                    .with_length_penalty(1.0);
            let horizon = controller.calculate_horizon(0, &ResourceConfiguration::new());
            assert!((1..=5).contains(&horizon));

            let expected = exhaustive(&configurer, 0, 0, 5, penalty);
            let cost = controller.plan().cost().unwrap();
            assert!(
                (cost - expected).abs() < 1e-9,
                "penalty {}: dp {} exhaustive {}",
                penalty,
                cost,
                expected
            );

            // The chosen first segment is part of an optimal partition
            let window = ConfigurationWindow::new(0, horizon);
            let config = configurer.allocate_configuration(&window);
            let first = configurer.estimate_window_runtime(&config, &window).unwrap();
            let rest = if horizon < 5 {
                penalty + exhaustive(&configurer, 0, horizon, 5, penalty)
            } else {
                0.0
            };
            assert!((first + rest - expected).abs() < 1e-9);

            let covered: usize = controller
                .plan()
                .segments()
                .iter()
                .map(|s| s.window.window_size)
                .sum();
            assert_eq!(covered, 5);
        }
    }

    #[test]
    fn test_large_penalty_commits_whole_lookahead() {
        let configurer = configurer(synthetic_rows(), 1600);
        let mut controller =
            DynamicHorizonController::new(configurer, 5, 50, 1e6).with_length_penalty(1.0);
        assert_eq!(controller.calculate_horizon(0, &ResourceConfiguration::new()), 5);
        assert_eq!(controller.plan().segments().len(), 1);
    }

    #[test]
    fn test_reconfiguring_later_costs_penalty() {
        let configurer = configurer(synthetic_rows(), 1600);
        let mut at_zero =
            DynamicHorizonController::new(Arc::clone(&configurer), 4, 50, 3.0).with_length_penalty(1.0);
        at_zero.calculate_horizon(0, &ResourceConfiguration::new());

        let mut later =
            DynamicHorizonController::new(Arc::clone(&configurer), 4, 50, 3.0).with_length_penalty(1.0);
        later.calculate_horizon(1, &ResourceConfiguration::new());

        let expected_later = exhaustive(&configurer, 1, 0, 4, 3.0) + 3.0;
        assert!((later.plan().cost().unwrap() - expected_later).abs() < 1e-9);
        assert!((at_zero.plan().cost().unwrap() - exhaustive(&configurer, 0, 0, 4, 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_keeps_current_configuration_when_cheaper() {
        let configurer = configurer(synthetic_rows(), 1600);
        let mut controller =
            DynamicHorizonController::new(Arc::clone(&configurer), 5, 50, 1e6).with_length_penalty(1.0);

        // The allocation the controller itself would install at step 1 is
        // already in place, so reconfiguring only adds the penalty.
        let window = ConfigurationWindow::new(1, 5);
        let current = configurer.allocate_configuration(&window);
        assert_eq!(controller.calculate_horizon(1, &current), 0);

        let segments = controller.plan().segments();
        assert!(!segments[0].reconfigure);
        assert_eq!(segments[0].window.window_size, 5);
    }

    #[test]
    fn test_poor_current_configuration_is_replaced() {
        let configurer = configurer(synthetic_rows(), 1600);
        let mut controller =
            DynamicHorizonController::new(Arc::clone(&configurer), 5, 50, 0.0).with_length_penalty(1.0);

        let starved = configurer.starting_configuration();
        assert!(controller.calculate_horizon(1, &starved) > 0);
    }

    #[test]
    fn test_horizon_bounded_by_simulation_and_forecast() {
        let configurer = configurer(synthetic_rows(), 1600);

        let mut near_end =
            DynamicHorizonController::new(Arc::clone(&configurer), 5, 2, 1e6).with_length_penalty(1.0);
        assert_eq!(near_end.calculate_horizon(0, &ResourceConfiguration::new()), 2);
        assert_eq!(near_end.plan().len(), 2);

        let mut past_forecast =
            DynamicHorizonController::new(Arc::clone(&configurer), 5, 50, 1.0);
        assert_eq!(past_forecast.calculate_horizon(2, &ResourceConfiguration::new()), 0);
        assert!(past_forecast.plan().is_empty());

        let mut wide = DynamicHorizonController::new(configurer, 10, 50, 1e6).with_length_penalty(1.0);
        assert_eq!(wide.calculate_horizon(0, &ResourceConfiguration::new()), 5);
    }

    #[test]
    fn test_length_penalty_shortens_horizon() {
        let configurer = configurer(synthetic_rows(), 1600);
        let mut flat =
            DynamicHorizonController::new(Arc::clone(&configurer), 5, 50, 1.0).with_length_penalty(1.0);
        let mut steep =
            DynamicHorizonController::new(configurer, 5, 50, 1.0).with_length_penalty(3.0);

        let flat_horizon = flat.calculate_horizon(0, &ResourceConfiguration::new());
        let steep_horizon = steep.calculate_horizon(0, &ResourceConfiguration::new());
        assert!(steep_horizon <= flat_horizon);
        assert_eq!(steep_horizon, 1);
    }
}
