//! Performance surfaces mapping (workload size, cpu shares) to duration
//!
//! One surface is fitted per task from profiling samples. Surfaces are
//! read-only after construction and may be shared across simulations.

mod surface;

pub use surface::{Extrapolation, PerformanceModel};

use crate::error::ModelError;
use crate::models::{ProfilingSample, Task};
use std::collections::HashMap;
use tracing::info;

/// Trait for duration prediction implementations
pub trait DurationModel: Send + Sync {
    /// Predicted duration of one step of `workload_size` work at `cpu_shares`
    fn predict(&self, workload_size: f64, cpu_shares: u32) -> f64;
}

impl<F> DurationModel for F
where
    F: Fn(f64, u32) -> f64 + Send + Sync,
{
    fn predict(&self, workload_size: f64, cpu_shares: u32) -> f64 {
        self(workload_size, cpu_shares)
    }
}

/// Per-task duration models keyed by task name
#[derive(Default)]
pub struct PerformanceModels {
    models: HashMap<String, Box<dyn DurationModel>>,
}

impl PerformanceModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit a surface for every task from the full profiling table
    pub fn fit_all(
        tasks: &[Task],
        samples: &[ProfilingSample],
        extrapolation: Extrapolation,
    ) -> Result<Self, ModelError> {
        if tasks.is_empty() {
            return Err(ModelError::Empty);
        }

        let mut models = Self::new();
        for task in tasks {
            let task_samples: Vec<&ProfilingSample> =
                samples.iter().filter(|s| s.task == task.name).collect();
            let model = PerformanceModel::fit(&task.name, &task_samples)?
                .with_extrapolation(extrapolation);
            info!(
                task = %task.name,
                samples = task_samples.len(),
                sizes = model.workload_sizes().len(),
                shares = model.cpu_shares().len(),
                "Fitted performance surface"
            );
            models.insert(&task.name, model);
        }
        Ok(models)
    }

    pub fn insert(&mut self, task: impl Into<String>, model: impl DurationModel + 'static) {
        self.models.insert(task.into(), Box::new(model));
    }

    pub fn get(&self, task: &str) -> Option<&dyn DurationModel> {
        self.models.get(task).map(|m| m.as_ref())
    }

    /// Ensure a model exists for every task
    pub fn covers(&self, tasks: &[Task]) -> Result<(), ModelError> {
        match tasks.iter().find(|task| !self.models.contains_key(&task.name)) {
            Some(task) => Err(ModelError::UnknownTask(task.name.clone())),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl std::fmt::Debug for PerformanceModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.models.keys().collect();
        names.sort();
        f.debug_struct("PerformanceModels")
            .field("tasks", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_samples(task: &str) -> Vec<ProfilingSample> {
        let mut samples = Vec::new();
        for size in [5.0, 10.0, 15.0] {
            for shares in [100, 200, 300] {
                samples.push(ProfilingSample::new(task, size, shares, size / shares as f64));
            }
        }
        samples
    }

    #[test]
    fn test_fit_all_builds_model_per_task() {
        let tasks = vec![Task::new("a", "--a-ops"), Task::new("b", "--b-ops")];
        let mut samples = grid_samples("a");
        samples.extend(grid_samples("b"));

        let models = PerformanceModels::fit_all(&tasks, &samples, Extrapolation::Extrapolate)
            .unwrap();
        assert_eq!(models.len(), 2);
        assert!(models.covers(&tasks).is_ok());
        let a = models.get("a").unwrap();
        assert!((a.predict(10.0, 200) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_fit_all_fails_for_unprofiled_task() {
        let tasks = vec![Task::new("a", "--a-ops"), Task::new("b", "--b-ops")];
        let samples = grid_samples("a");

        let err = PerformanceModels::fit_all(&tasks, &samples, Extrapolation::Extrapolate)
            .unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { task, .. } if task == "b"));
    }

    #[test]
    fn test_closure_models() {
        let mut models = PerformanceModels::new();
        models.insert("ratio", |size: f64, shares: u32| size / shares as f64);
        assert_eq!(models.get("ratio").unwrap().predict(10.0, 100), 0.1);
        assert!(models.get("missing").is_none());
    }
}
