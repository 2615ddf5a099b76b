//! JSON input tables

use anyhow::{Context, Result};
use gang_lib::{Forecast, ProfilingSample};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::info;

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {} from {}", what, path.display()))
}

/// Profiling rows `{task, workload_size, cpu_shares, duration}`
pub fn load_profile(path: &Path) -> Result<Vec<ProfilingSample>> {
    let samples: Vec<ProfilingSample> = read_json(path, "profiling table")?;
    info!(path = %path.display(), samples = samples.len(), "Loaded profiling table");
    Ok(samples)
}

/// Workload table `task -> [[size; offsets]; time_steps]`
pub fn load_forecast(path: &Path, what: &str) -> Result<Forecast> {
    let forecast: Forecast = read_json(path, what)?;
    info!(
        path = %path.display(),
        time_steps = forecast.time_steps(),
        offsets = forecast.remaining(0),
        "Loaded {}",
        what
    );
    Ok(forecast)
}
