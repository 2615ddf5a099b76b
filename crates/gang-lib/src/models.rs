//! Core data models for gang scheduling

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

fn default_workload_modifier() -> u32 {
    1000
}

/// A co-scheduled job type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    /// Operation argument handed to the stress kernel (e.g. `--matrix-ops`)
    pub workload_param: String,
    /// Multiplier applied to the workload size before it reaches the kernel
    #[serde(default = "default_workload_modifier")]
    pub workload_modifier: u32,
}

impl Task {
    pub fn new(name: impl Into<String>, workload_param: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workload_param: workload_param.into(),
            workload_modifier: default_workload_modifier(),
        }
    }

    pub fn with_modifier(mut self, workload_modifier: u32) -> Self {
        self.workload_modifier = workload_modifier;
        self
    }
}

/// Pairs a task with the forecast series that drives it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub task: Task,
    pub series: String,
}

/// One profiling measurement row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingSample {
    pub task: String,
    pub workload_size: f64,
    pub cpu_shares: u32,
    pub duration: f64,
}

impl ProfilingSample {
    pub fn new(task: impl Into<String>, workload_size: f64, cpu_shares: u32, duration: f64) -> Self {
        Self {
            task: task.into(),
            workload_size,
            cpu_shares,
            duration,
        }
    }
}

/// Compute shares granted to each task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceConfiguration {
    shares: BTreeMap<String, u32>,
}

impl ResourceConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration giving every task the same share count
    pub fn uniform<'a>(tasks: impl IntoIterator<Item = &'a Task>, shares: u32) -> Self {
        Self {
            shares: tasks
                .into_iter()
                .map(|task| (task.name.clone(), shares))
                .collect(),
        }
    }

    pub fn get(&self, task: &str) -> Option<u32> {
        self.shares.get(task).copied()
    }

    pub fn set(&mut self, task: impl Into<String>, shares: u32) {
        self.shares.insert(task.into(), shares);
    }

    /// Add `increment` shares to a task, returning its new share count
    pub fn increment(&mut self, task: &str, increment: u32) -> u32 {
        let entry = self.shares.entry(task.to_string()).or_insert(0);
        *entry += increment;
        *entry
    }

    pub fn total(&self) -> u32 {
        self.shares.values().sum()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.shares.iter().map(|(name, shares)| (name.as_str(), *shares))
    }
}

impl FromIterator<(String, u32)> for ResourceConfiguration {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self {
            shares: iter.into_iter().collect(),
        }
    }
}

/// Contiguous run of forecast offsets relative to a time step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationWindow {
    pub time_step: usize,
    pub window_size: usize,
    pub starting_offset: usize,
}

impl ConfigurationWindow {
    /// Window starting at the first forecast offset. A zero size is raised to one.
    pub fn new(time_step: usize, window_size: usize) -> Self {
        Self {
            time_step,
            window_size: window_size.max(1),
            starting_offset: 0,
        }
    }

    pub fn starting_at(mut self, starting_offset: usize) -> Self {
        self.starting_offset = starting_offset;
        self
    }

    /// Forecast offsets covered by this window
    pub fn offsets(&self) -> std::ops::Range<usize> {
        self.starting_offset..self.starting_offset + self.window_size
    }
}

/// Predicted outcome of one task at one forecast offset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub task: String,
    pub predicted_duration: f64,
    pub workload_size: f64,
    pub cpu_shares: u32,
}

/// Workload sizes per task, indexed `[time_step][offset]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Forecast {
    series: HashMap<String, Vec<Vec<f64>>>,
}

impl Forecast {
    pub fn new(series: HashMap<String, Vec<Vec<f64>>>) -> Self {
        Self { series }
    }

    /// Forecast whose only offset per step is the observed size
    pub fn from_actuals(actuals: HashMap<String, Vec<f64>>) -> Self {
        Self {
            series: actuals
                .into_iter()
                .map(|(task, sizes)| (task, sizes.into_iter().map(|s| vec![s]).collect()))
                .collect(),
        }
    }

    pub fn insert(&mut self, task: impl Into<String>, rows: Vec<Vec<f64>>) {
        self.series.insert(task.into(), rows);
    }

    /// Workload size of `task` predicted at `time_step` for `offset` steps ahead
    pub fn size(&self, task: &str, time_step: usize, offset: usize) -> Option<f64> {
        self.series
            .get(task)
            .and_then(|rows| rows.get(time_step))
            .and_then(|row| row.get(offset))
            .copied()
    }

    /// Offsets available for every task at `time_step`
    pub fn remaining(&self, time_step: usize) -> usize {
        self.series
            .values()
            .map(|rows| rows.get(time_step).map_or(0, Vec::len))
            .min()
            .unwrap_or(0)
    }

    /// Number of time steps covered for every task
    pub fn time_steps(&self) -> usize {
        self.series.values().map(Vec::len).min().unwrap_or(0)
    }

    pub fn contains(&self, task: &str) -> bool {
        self.series.contains_key(task)
    }

    /// Ensure every task has a series
    pub fn validate(&self, tasks: &[Task]) -> Result<(), ModelError> {
        match tasks.iter().find(|task| !self.contains(&task.name)) {
            Some(task) => Err(ModelError::MissingForecast(task.name.clone())),
            None => Ok(()),
        }
    }
}
