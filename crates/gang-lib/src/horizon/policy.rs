//! Policy-driven horizon control
//!
//! The controller turns the forecast into an observation matrix with one row
//! per candidate action and hands it to a pretrained policy. Action 0 keeps
//! the installed configuration; action `a > 0` installs a fresh allocation
//! for a horizon of `a` steps.

use super::{feasible_horizon, HorizonController};
use crate::configurer::ResourceConfigurer;
use crate::error::PolicyError;
use crate::models::{ConfigurationWindow, ResourceConfiguration};
use std::path::Path;
use std::sync::Arc;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Lower edge of the duration band mapped to 0.0
pub const DEFAULT_DURATION_LOW: f64 = 75.0;

/// Upper edge of the duration band mapped to 1.0
pub const DEFAULT_DURATION_HIGH: f64 = 150.0;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Normalized predicted durations, `[action][offset]` in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    actions: usize,
    window: usize,
    values: Vec<f32>,
}

impl Observation {
    pub fn new(actions: usize, window: usize, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), actions * window);
        Self {
            actions,
            window,
            values,
        }
    }

    pub fn actions(&self) -> usize {
        self.actions
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, action: usize) -> &[f32] {
        &self.values[action * self.window..(action + 1) * self.window]
    }
}

/// Trait for horizon decision functions
pub trait HorizonPolicy: Send + Sync {
    /// One score per action; the highest feasible score wins
    fn scores(&self, observation: &Observation) -> Result<Vec<f32>, PolicyError>;

    fn name(&self) -> &str;
}

/// Heuristic policy used when no pretrained model is available.
///
/// Scores an action by its negative summed normalized duration, charging
/// reconfiguring actions a normalized checkpoint cost.
#[derive(Debug, Clone)]
pub struct GreedyPolicy {
    checkpoint_cost: f32,
}

impl GreedyPolicy {
    pub fn new(checkpoint_penalty: f64, duration_low: f64, duration_high: f64) -> Self {
        let band = (duration_high - duration_low).max(f64::EPSILON);
        Self {
            checkpoint_cost: (checkpoint_penalty / band) as f32,
        }
    }
}

impl HorizonPolicy for GreedyPolicy {
    fn scores(&self, observation: &Observation) -> Result<Vec<f32>, PolicyError> {
        Ok((0..observation.actions())
            .map(|action| {
                let duration: f32 = observation.row(action).iter().sum();
                let checkpoint = if action == 0 { 0.0 } else { self.checkpoint_cost };
                -(duration + checkpoint)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "greedy"
    }
}

/// ONNX policy evaluated with tract; input `[1, actions, window]`, output one
/// value per action
pub struct OnnxPolicy {
    model: TractModel,
    actions: usize,
    window: usize,
}

impl OnnxPolicy {
    pub fn from_bytes(model_bytes: &[u8], actions: usize, window: usize) -> Result<Self, PolicyError> {
        let load = |e: TractError| PolicyError::Load(e.to_string());
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .map_err(load)?
            .with_input_fact(0, f32::fact([1, actions, window]).into())
            .map_err(load)?
            .into_optimized()
            .map_err(load)?
            .into_runnable()
            .map_err(load)?;
        Ok(Self {
            model,
            actions,
            window,
        })
    }

    pub fn from_path(path: &Path, actions: usize, window: usize) -> Result<Self, PolicyError> {
        let bytes = std::fs::read(path)
            .map_err(|e| PolicyError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes, actions, window)
    }
}

impl HorizonPolicy for OnnxPolicy {
    fn scores(&self, observation: &Observation) -> Result<Vec<f32>, PolicyError> {
        if observation.actions() != self.actions || observation.window() != self.window {
            return Err(PolicyError::Shape {
                got: observation.values().len(),
                expected: self.actions * self.window,
            });
        }

        let inference = |e: TractError| PolicyError::Inference(e.to_string());
        let input: Tensor = tract_ndarray::Array3::from_shape_vec(
            (1, self.actions, self.window),
            observation.values().to_vec(),
        )
        .map_err(|e| PolicyError::Inference(e.to_string()))?
        .into();

        let outputs = self.model.run(tvec!(input.into())).map_err(inference)?;
        let output = outputs
            .first()
            .ok_or_else(|| PolicyError::Inference("no output from policy".to_string()))?;
        let view = output.to_array_view::<f32>().map_err(inference)?;
        Ok(view.iter().copied().collect())
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Controller delegating the horizon choice to a [`HorizonPolicy`]
pub struct PolicyHorizonController {
    configurer: Arc<ResourceConfigurer>,
    policy: Box<dyn HorizonPolicy>,
    fallback: GreedyPolicy,
    num_actions: usize,
    window_size: usize,
    simulation_length: usize,
    duration_low: f64,
    duration_high: f64,
}

impl PolicyHorizonController {
    pub fn new(
        configurer: Arc<ResourceConfigurer>,
        policy: Box<dyn HorizonPolicy>,
        num_actions: usize,
        window_size: usize,
        simulation_length: usize,
        checkpoint_penalty: f64,
    ) -> Self {
        Self {
            configurer,
            policy,
            fallback: GreedyPolicy::new(
                checkpoint_penalty,
                DEFAULT_DURATION_LOW,
                DEFAULT_DURATION_HIGH,
            ),
            num_actions: num_actions.max(1),
            window_size: window_size.max(1),
            simulation_length,
            duration_low: DEFAULT_DURATION_LOW,
            duration_high: DEFAULT_DURATION_HIGH,
        }
    }

    /// Band of modelled durations mapped onto [0, 1]
    pub fn with_duration_band(mut self, low: f64, high: f64, checkpoint_penalty: f64) -> Self {
        self.duration_low = low;
        self.duration_high = high;
        self.fallback = GreedyPolicy::new(checkpoint_penalty, low, high);
        self
    }

    fn normalize(&self, duration: Option<f64>) -> f32 {
        let band = (self.duration_high - self.duration_low).max(f64::EPSILON);
        match duration {
            Some(duration) => ((duration - self.duration_low) / band).clamp(0.0, 1.0) as f32,
            None => 1.0,
        }
    }

    /// Observation matrix for `time_step`
    pub fn observe(&self, time_step: usize, current: &ResourceConfiguration) -> Observation {
        let mut values = Vec::with_capacity(self.num_actions * self.window_size);

        for action in 0..self.num_actions {
            let configuration = match action {
                0 if current.is_empty() => self.configurer.starting_configuration(),
                0 => current.clone(),
                horizon => self
                    .configurer
                    .allocate_configuration(&ConfigurationWindow::new(time_step, horizon)),
            };

            for offset in 0..self.window_size {
                let window = ConfigurationWindow::new(time_step, 1).starting_at(offset);
                let runtime = self
                    .configurer
                    .estimate_window_runtime(&configuration, &window);
                values.push(self.normalize(runtime));
            }
        }

        Observation::new(self.num_actions, self.window_size, values)
    }

    fn pick(&self, scores: &[f32], feasible: usize, can_keep: bool) -> usize {
        let first = if can_keep { 0 } else { 1 };
        let mut best: Option<(usize, f32)> = None;
        for action in first..=feasible.min(scores.len().saturating_sub(1)) {
            if best.map_or(true, |(_, top)| scores[action] > top) {
                best = Some((action, scores[action]));
            }
        }
        best.map_or(0, |(action, _)| action)
    }
}

impl HorizonController for PolicyHorizonController {
    fn calculate_horizon(&mut self, time_step: usize, current: &ResourceConfiguration) -> usize {
        let feasible = feasible_horizon(
            self.num_actions - 1,
            self.configurer.forecast().remaining(time_step),
            self.simulation_length,
            time_step,
        );
        if feasible == 0 {
            return 0;
        }

        let observation = self.observe(time_step, current);
        let scores = match self.policy.scores(&observation) {
            Ok(scores) if scores.len() == self.num_actions => scores,
            Ok(scores) => {
                warn!(
                    policy = self.policy.name(),
                    got = scores.len(),
                    expected = self.num_actions,
                    "Policy output has wrong shape, using fallback"
                );
                self.fallback.scores(&observation).unwrap_or_default()
            }
            Err(e) => {
                warn!(policy = self.policy.name(), error = %e, "Policy failed, using fallback");
                self.fallback.scores(&observation).unwrap_or_default()
            }
        };

        let action = self.pick(&scores, feasible, !current.is_empty());
        debug!(time_step, action, feasible, ?scores, "Policy chose horizon");
        action
    }

    fn name(&self) -> &'static str {
        "policy"
    }
}
