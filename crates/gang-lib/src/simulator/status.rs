//! Shared run status for health reporting

use super::RunPhase;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Point-in-time view of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub strategy: String,
    pub time_step: usize,
    pub simulation_length: usize,
    pub checkpoints: u32,
    pub total_duration: f64,
}

/// Cloneable handle readers and the simulator share
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<RunStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RunStatus {
                phase: RunPhase::Idle,
                strategy: String::new(),
                time_step: 0,
                simulation_length: 0,
                checkpoints: 0,
                total_duration: 0.0,
            })),
        }
    }

    pub async fn snapshot(&self) -> RunStatus {
        self.inner.read().await.clone()
    }

    pub async fn update(&self, apply: impl FnOnce(&mut RunStatus)) {
        let mut status = self.inner.write().await;
        apply(&mut status);
    }
}
