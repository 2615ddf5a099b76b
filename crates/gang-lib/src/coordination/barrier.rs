//! Double barrier: every party enters before any proceeds, and every party
//! leaves before any re-enters.

use crate::error::CoordinationError;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One reusable rendezvous point
struct Gate {
    arrived: Mutex<usize>,
    generation: watch::Sender<u64>,
}

impl Gate {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            arrived: Mutex::new(0),
            generation,
        }
    }

    fn arrived(&self) -> std::sync::MutexGuard<'_, usize> {
        self.arrived.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pass(
        &self,
        parties: usize,
        timeout: Option<Duration>,
        barrier: &str,
        phase: &'static str,
    ) -> Result<(), CoordinationError> {
        let mut rx = self.generation.subscribe();
        let generation = {
            let mut arrived = self.arrived();
            let generation = *self.generation.borrow();
            *arrived += 1;
            if *arrived >= parties {
                *arrived = 0;
                self.generation.send_replace(generation + 1);
                debug!(barrier, phase, parties, "Barrier released");
                return Ok(());
            }
            generation
        };

        let started = Instant::now();
        let released = async move {
            let outcome = rx.wait_for(|current| *current > generation).await.map(|_| ());
            outcome
        };
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, released).await.ok(),
            None => Some(released.await),
        };

        match outcome {
            Some(_) => Ok(()),
            None => {
                let mut arrived = self.arrived();
                if *self.generation.borrow() > generation {
                    // Released between the deadline and the lock
                    return Ok(());
                }
                *arrived = arrived.saturating_sub(1);
                let waited = started.elapsed();
                warn!(barrier, phase, waiting = *arrived, parties, ?waited, "Gang stalled at barrier");
                Err(CoordinationError::GangStall {
                    barrier: barrier.to_string(),
                    phase,
                    waited,
                })
            }
        }
    }

    fn reset(&self) {
        *self.arrived() = 0;
    }
}

/// Barrier shared by the driver and the workers of one gang
pub struct DoubleBarrier {
    name: String,
    parties: usize,
    timeout: Option<Duration>,
    enter: Gate,
    leave: Gate,
}

impl DoubleBarrier {
    /// `timeout` of `None` waits forever
    pub fn new(name: impl Into<String>, parties: usize, timeout: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            parties: parties.max(1),
            timeout,
            enter: Gate::new(),
            leave: Gate::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Block until all parties have entered
    pub async fn enter(&self) -> Result<(), CoordinationError> {
        self.enter
            .pass(self.parties, self.timeout, &self.name, "enter")
            .await
    }

    /// Block until all parties have left
    pub async fn leave(&self) -> Result<(), CoordinationError> {
        self.leave
            .pass(self.parties, self.timeout, &self.name, "leave")
            .await
    }

    /// Forget partial arrivals; waiters already blocked keep waiting
    pub fn reset(&self) {
        self.enter.reset();
        self.leave.reset();
    }
}
