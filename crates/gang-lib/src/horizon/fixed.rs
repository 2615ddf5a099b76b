//! Fixed-period reconfiguration

use super::HorizonController;
use crate::models::ResourceConfiguration;

/// Reconfigures every `window` steps and holds each configuration for `window` steps
#[derive(Debug, Clone)]
pub struct FixedHorizonController {
    window: usize,
}

impl FixedHorizonController {
    /// A zero period is raised to one
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl HorizonController for FixedHorizonController {
    fn calculate_horizon(&mut self, time_step: usize, _current: &ResourceConfiguration) -> usize {
        if time_step % self.window == 0 {
            self.window
        } else {
            0
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
