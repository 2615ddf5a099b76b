//! Allocation tests against closed-form duration models

use super::*;
use crate::models::Task;
use std::collections::HashMap;

fn ratio(size: f64, shares: u32) -> f64 {
    size / shares as f64
}

fn tasks() -> Vec<Task> {
    vec![Task::new("a", "--a-ops"), Task::new("b", "--b-ops")]
}

fn params(total_shares: u32) -> AllocationParams {
    AllocationParams {
        total_shares,
        starting_shares: 100,
        share_increment: 100,
        max_task_shares: total_shares,
        improvement_decay: 0.95,
        min_workload: 5.0,
        max_workload: 20.0,
    }
}

/// Sizes for steps [10,10], [20,5], [5,30], one offset per step
fn three_step_forecast() -> Forecast {
    Forecast::from_actuals(HashMap::from([
        ("a".to_string(), vec![10.0, 20.0, 5.0]),
        ("b".to_string(), vec![10.0, 5.0, 30.0]),
    ]))
}

fn configurer_with(forecast: Forecast, params: AllocationParams) -> ResourceConfigurer {
    let mut models = PerformanceModels::new();
    models.insert("a", ratio);
    models.insert("b", ratio);
    ResourceConfigurer::new(tasks(), models, forecast, params).unwrap()
}

fn config(a: u32, b: u32) -> ResourceConfiguration {
    ResourceConfiguration::from_iter([("a".to_string(), a), ("b".to_string(), b)])
}

#[test]
fn test_slowest_task_is_bottleneck() {
    let configurer = configurer_with(three_step_forecast(), params(400));

    let slowest = configurer
        .slowest_task(&config(100, 100), &ConfigurationWindow::new(1, 1), 0)
        .unwrap();
    assert_eq!(slowest.task, "a");
    assert!((slowest.predicted_duration - 0.2).abs() < 1e-12);
    assert_eq!(slowest.workload_size, 20.0);
    assert_eq!(slowest.cpu_shares, 100);

    // Shares shift the bottleneck
    let slowest = configurer
        .slowest_task(&config(400, 100), &ConfigurationWindow::new(1, 1), 0)
        .unwrap();
    assert_eq!(slowest.task, "b");
}

#[test]
fn test_slowest_task_never_lower_than_any_task() {
    let configurer = configurer_with(three_step_forecast(), params(400));
    for time_step in 0..3 {
        for (a, b) in [(100, 100), (200, 100), (100, 300), (300, 300)] {
            let configuration = config(a, b);
            let window = ConfigurationWindow::new(time_step, 1);
            let slowest = configurer.slowest_task(&configuration, &window, 0).unwrap();
            for task in configurer.tasks() {
                let size = configurer.forecast().size(&task.name, time_step, 0).unwrap();
                let duration = ratio(size, configuration.get(&task.name).unwrap());
                assert!(slowest.predicted_duration >= duration);
            }
        }
    }
}

#[test]
fn test_slowest_task_tie_goes_to_first_declared() {
    let configurer = configurer_with(three_step_forecast(), params(400));
    let slowest = configurer
        .slowest_task(&config(100, 100), &ConfigurationWindow::new(0, 1), 0)
        .unwrap();
    assert_eq!(slowest.task, "a");
}

#[test]
fn test_estimate_window_runtime_sums_bottlenecks() {
    let forecast = Forecast::new(HashMap::from([
        ("a".to_string(), vec![vec![10.0, 20.0, 5.0]]),
        ("b".to_string(), vec![vec![10.0, 5.0, 30.0]]),
    ]));
    let configurer = configurer_with(forecast, params(400));

    let runtime = configurer
        .estimate_window_runtime(&config(100, 100), &ConfigurationWindow::new(0, 3))
        .unwrap();
    assert!((runtime - (0.1 + 0.2 + 0.3)).abs() < 1e-12);

    let tail = configurer
        .estimate_window_runtime(&config(100, 100), &ConfigurationWindow::new(0, 2).starting_at(1))
        .unwrap();
    assert!((tail - 0.5).abs() < 1e-12);
}

#[test]
fn test_estimate_window_runtime_beyond_forecast_is_none() {
    let configurer = configurer_with(three_step_forecast(), params(400));
    assert!(configurer
        .estimate_window_runtime(&config(100, 100), &ConfigurationWindow::new(0, 2))
        .is_none());
    assert!(configurer
        .estimate_window_runtime(&config(100, 100), &ConfigurationWindow::new(3, 1))
        .is_none());
}

#[test]
fn test_allocation_follows_largest_ratio() {
    let configurer = configurer_with(three_step_forecast(), params(400));

    // Equal ratios: first increment goes to "a" on the tie, then "b" is the bottleneck
    let step0 = configurer.allocate_configuration(&ConfigurationWindow::new(0, 1));
    assert_eq!(step0, config(200, 200));

    let step1 = configurer.allocate_configuration(&ConfigurationWindow::new(1, 1));
    assert_eq!(step1, config(300, 100));

    let step2 = configurer.allocate_configuration(&ConfigurationWindow::new(2, 1));
    assert_eq!(step2, config(100, 300));

    for allocation in [step0, step1, step2] {
        assert_eq!(allocation.total(), 400);
    }
}

#[test]
fn test_allocation_monotone_in_budget() {
    let forecast = Forecast::new(HashMap::from([
        ("a".to_string(), vec![vec![12.0, 18.0, 7.0, 3.0]]),
        ("b".to_string(), vec![vec![9.0, 4.0, 25.0, 11.0]]),
    ]));
    let window = ConfigurationWindow::new(0, 4);

    let mut previous = config(100, 100);
    for total in (200..=1500).step_by(100) {
        let configurer = configurer_with(forecast.clone(), params(total));
        let allocation = configurer.allocate_configuration(&window);
        assert_eq!(allocation.total(), total);
        for (task, shares) in previous.iter() {
            assert!(allocation.get(task).unwrap() >= shares);
        }
        previous = allocation;
    }
}

#[test]
fn test_allocation_respects_task_cap() {
    let mut capped = params(600);
    capped.max_task_shares = 200;
    let configurer = configurer_with(three_step_forecast(), capped);

    let allocation = configurer.allocate_configuration(&ConfigurationWindow::new(0, 1));
    assert_eq!(allocation, config(200, 200));
}

#[test]
fn test_allocation_discounts_later_offsets() {
    // "a" is the bottleneck at offset 0, "b" at offset 1 by the same margin.
    // With decay the nearer bottleneck wins the single increment.
    let forecast = Forecast::new(HashMap::from([
        ("a".to_string(), vec![vec![30.0, 1.0]]),
        ("b".to_string(), vec![vec![1.0, 30.0]]),
    ]));
    let mut decayed = params(300);
    decayed.improvement_decay = 0.5;
    let configurer = configurer_with(forecast, decayed);

    let allocation = configurer.allocate_configuration(&ConfigurationWindow::new(0, 2));
    assert_eq!(allocation, config(200, 100));
}

#[test]
fn test_static_configuration_uses_midpoint() {
    let mut models = PerformanceModels::new();
    models.insert("a", |size: f64, shares: u32| 2.0 * size / shares as f64);
    models.insert("b", ratio);
    let configurer =
        ResourceConfigurer::new(tasks(), models, three_step_forecast(), params(400)).unwrap();

    assert_eq!(configurer.allocate_static_configuration(), config(300, 100));
}

#[test]
fn test_static_configuration_stops_at_cap() {
    let mut models = PerformanceModels::new();
    models.insert("a", |size: f64, shares: u32| 2.0 * size / shares as f64);
    models.insert("b", ratio);
    let mut capped = params(400);
    capped.max_task_shares = 200;
    let configurer =
        ResourceConfigurer::new(tasks(), models, three_step_forecast(), capped).unwrap();

    assert_eq!(configurer.allocate_static_configuration(), config(200, 100));
}

#[test]
fn test_with_forecast_shares_models() {
    let configurer = configurer_with(three_step_forecast(), params(400));
    let actual = configurer
        .with_forecast(Forecast::from_actuals(HashMap::from([
            ("a".to_string(), vec![40.0]),
            ("b".to_string(), vec![1.0]),
        ])))
        .unwrap();

    assert!(Arc::ptr_eq(configurer.models(), actual.models()));
    let slowest = actual
        .slowest_task(&config(100, 100), &ConfigurationWindow::new(0, 1), 0)
        .unwrap();
    assert!((slowest.predicted_duration - 0.4).abs() < 1e-12);
}

#[test]
fn test_new_rejects_uncovered_tasks() {
    let mut models = PerformanceModels::new();
    models.insert("a", ratio);
    let err = ResourceConfigurer::new(tasks(), models, three_step_forecast(), params(400))
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownTask(name) if name == "b"));
}
