//! Core library for tuning gang-scheduled workloads
//!
//! This crate provides the core functionality for:
//! - Fitting per-task performance surfaces from profiling samples
//! - Greedy bottleneck-driven share allocation
//! - Reconfiguration horizon control (fixed, dynamic programming, policy)
//! - Barrier and queue primitives for lockstep gang workers
//! - Job lifecycle contract and the time-step simulation loop

pub mod cluster;
pub mod configurer;
pub mod coordination;
pub mod error;
pub mod horizon;
pub mod models;
pub mod observability;
pub mod performance;
pub mod simulator;

pub use configurer::{AllocationParams, ResourceConfigurer};
pub use error::{ClusterError, CoordinationError, ModelError, PolicyError, SimulationError};
pub use models::*;
pub use observability::{GangMetrics, StructuredLogger};
pub use performance::{DurationModel, Extrapolation, PerformanceModel, PerformanceModels};
