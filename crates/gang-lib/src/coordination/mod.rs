//! Lockstep coordination for gang workers
//!
//! Workers of one gang meet at a double barrier around every time step and
//! pull per-step work items from named queues. The hub owns one barrier and
//! one queue per task and is shared by the driver and all workers.

mod barrier;
mod queue;
mod worker;

pub use barrier::DoubleBarrier;
pub use queue::WorkQueue;
pub use worker::{GangWorker, ModelExecutor, StressNgExecutor, WorkExecutor, WorkItem};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default time a barrier party waits for the rest of the gang
pub const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(600);

/// Shared coordination state for one gang
pub struct CoordinationHub {
    barrier: Arc<DoubleBarrier>,
    queues: DashMap<String, Arc<WorkQueue<WorkItem>>>,
}

impl CoordinationHub {
    /// Hub whose barrier releases once `parties` members arrive
    pub fn new(path: impl Into<String>, parties: usize, timeout: Option<Duration>) -> Self {
        Self {
            barrier: Arc::new(DoubleBarrier::new(path, parties, timeout)),
            queues: DashMap::new(),
        }
    }

    pub fn barrier(&self) -> Arc<DoubleBarrier> {
        Arc::clone(&self.barrier)
    }

    /// Queue named `name`, creating it on first use
    pub fn queue(&self, name: &str) -> Arc<WorkQueue<WorkItem>> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(WorkQueue::new(name)))
            .clone()
    }

    /// Drop pending items and barrier arrivals left over from a run
    pub fn reset(&self) {
        for entry in self.queues.iter() {
            entry.value().clear();
        }
        self.barrier.reset();
        debug!(barrier = %self.barrier.name(), queues = self.queues.len(), "Coordination state reset");
    }
}

impl std::fmt::Debug for CoordinationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationHub")
            .field("barrier", &self.barrier.name())
            .field("parties", &self.barrier.parties())
            .field("queues", &self.queues.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
