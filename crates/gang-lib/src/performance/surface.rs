//! Bilinear performance surface over a regular profiling grid

use super::DurationModel;
use crate::error::ModelError;
use crate::models::ProfilingSample;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Behaviour for queries outside the profiled range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extrapolation {
    /// Extend the edge cell's plane beyond the grid
    #[default]
    Extrapolate,
    /// Evaluate at the nearest point on the grid boundary
    Clamp,
}

/// Fitted duration surface for a single task
#[derive(Debug, Clone)]
pub struct PerformanceModel {
    task: String,
    workload_sizes: Vec<f64>,
    cpu_shares: Vec<f64>,
    /// Row-major durations, `grid[size_index * cpu_shares.len() + share_index]`
    grid: Vec<f64>,
    extrapolation: Extrapolation,
}

impl PerformanceModel {
    /// Fit a surface from samples covering a rectangular (size x shares) grid.
    ///
    /// Repeated measurements of the same grid point are averaged.
    pub fn fit(task: &str, samples: &[&ProfilingSample]) -> Result<Self, ModelError> {
        let insufficient = |reason: String| ModelError::InsufficientData {
            task: task.to_string(),
            reason,
        };

        if samples.is_empty() {
            return Err(insufficient("no samples".to_string()));
        }
        if let Some(bad) = samples
            .iter()
            .find(|s| !s.workload_size.is_finite() || !s.duration.is_finite())
        {
            return Err(insufficient(format!(
                "non-finite sample at size {} shares {}",
                bad.workload_size, bad.cpu_shares
            )));
        }

        let workload_sizes = distinct_sorted(samples.iter().map(|s| s.workload_size));
        let cpu_shares = distinct_sorted(samples.iter().map(|s| s.cpu_shares as f64));

        if workload_sizes.len() < 2 || cpu_shares.len() < 2 {
            return Err(insufficient(format!(
                "need at least 2 workload sizes and 2 share levels, got {}x{}",
                workload_sizes.len(),
                cpu_shares.len()
            )));
        }

        let cols = cpu_shares.len();
        let mut sums = vec![0.0; workload_sizes.len() * cols];
        let mut counts = vec![0u32; workload_sizes.len() * cols];
        for sample in samples {
            let row = index_of(&workload_sizes, sample.workload_size);
            let col = index_of(&cpu_shares, sample.cpu_shares as f64);
            sums[row * cols + col] += sample.duration;
            counts[row * cols + col] += 1;
        }

        if let Some(missing) = counts.iter().position(|&c| c == 0) {
            return Err(insufficient(format!(
                "grid is not rectangular: no sample for size {} at {} shares",
                workload_sizes[missing / cols],
                cpu_shares[missing % cols]
            )));
        }

        let grid = sums
            .iter()
            .zip(&counts)
            .map(|(sum, &count)| sum / count as f64)
            .collect();

        Ok(Self {
            task: task.to_string(),
            workload_sizes,
            cpu_shares,
            grid,
            extrapolation: Extrapolation::default(),
        })
    }

    pub fn with_extrapolation(mut self, extrapolation: Extrapolation) -> Self {
        self.extrapolation = extrapolation;
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn workload_sizes(&self) -> &[f64] {
        &self.workload_sizes
    }

    pub fn cpu_shares(&self) -> &[f64] {
        &self.cpu_shares
    }

    /// Whether the point lies inside the profiled range
    pub fn contains(&self, workload_size: f64, cpu_shares: u32) -> bool {
        within(&self.workload_sizes, workload_size) && within(&self.cpu_shares, cpu_shares as f64)
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        self.grid[row * self.cpu_shares.len() + col]
    }

    fn evaluate(&self, workload_size: f64, cpu_shares: f64) -> f64 {
        let (x, y) = match self.extrapolation {
            Extrapolation::Extrapolate => (workload_size, cpu_shares),
            Extrapolation::Clamp => (
                clamp_to(&self.workload_sizes, workload_size),
                clamp_to(&self.cpu_shares, cpu_shares),
            ),
        };

        let (i, tx) = bracket(&self.workload_sizes, x);
        let (j, ty) = bracket(&self.cpu_shares, y);

        let low = self.value(i, j) * (1.0 - tx) + self.value(i + 1, j) * tx;
        let high = self.value(i, j + 1) * (1.0 - tx) + self.value(i + 1, j + 1) * tx;
        low * (1.0 - ty) + high * ty
    }
}

impl DurationModel for PerformanceModel {
    fn predict(&self, workload_size: f64, cpu_shares: u32) -> f64 {
        self.evaluate(workload_size, cpu_shares as f64)
    }
}

fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    values.dedup();
    values
}

fn index_of(axis: &[f64], value: f64) -> usize {
    axis.partition_point(|&a| a < value)
}

fn within(axis: &[f64], value: f64) -> bool {
    match (axis.first(), axis.last()) {
        (Some(&lo), Some(&hi)) => value >= lo && value <= hi,
        _ => false,
    }
}

fn clamp_to(axis: &[f64], value: f64) -> f64 {
    value.clamp(axis[0], axis[axis.len() - 1])
}

/// Cell index and fractional position of `value` along `axis`.
/// Outside the axis the edge cell is used and the fraction leaves [0, 1].
fn bracket(axis: &[f64], value: f64) -> (usize, f64) {
    let last_cell = axis.len() - 2;
    let i = axis
        .partition_point(|&a| a <= value)
        .saturating_sub(1)
        .min(last_cell);
    let t = (value - axis[i]) / (axis[i + 1] - axis[i]);
    (i, t)
}
