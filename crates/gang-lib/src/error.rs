//! Error types for the gang scheduling core

use crate::simulator::RunReport;
use std::time::Duration;
use thiserror::Error;

/// Failures while fitting or looking up performance surfaces
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("insufficient profiling data for task {task}: {reason}")]
    InsufficientData { task: String, reason: String },

    #[error("no performance model for task {0}")]
    UnknownTask(String),

    #[error("no forecast series for task {0}")]
    MissingForecast(String),

    #[error("no tasks configured")]
    Empty,
}

/// Failures at the cluster job API boundary
#[derive(Debug, Error)]
pub enum ClusterError {
    /// API unavailable or overloaded; safe to retry
    #[error("transient cluster error: {0}")]
    Transient(String),

    #[error("cluster rejected request: {0}")]
    Rejected(String),

    #[error("job environment is missing {0}")]
    MissingEnv(&'static str),
}

impl ClusterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Transient(_))
    }
}

/// Failures of the barrier/queue primitives
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("gang stalled: barrier {barrier} {phase} did not complete within {waited:?}")]
    GangStall {
        barrier: String,
        phase: &'static str,
        waited: Duration,
    },

    #[error("queue {0} was closed")]
    QueueClosed(String),
}

/// Failures of the external horizon policy
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to load policy model: {0}")]
    Load(String),

    #[error("policy inference failed: {0}")]
    Inference(String),

    #[error("policy produced {got} scores, expected {expected}")]
    Shape { got: usize, expected: usize },
}

/// Errors surfaced by a simulation run
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Fatal error mid-run; carries what had been accumulated so far
    #[error("simulation aborted at time step {time_step}: {source}")]
    Aborted {
        time_step: usize,
        report: Box<RunReport>,
        source: Box<SimulationError>,
    },
}

impl SimulationError {
    /// Partial report of an aborted run
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            SimulationError::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }
}
