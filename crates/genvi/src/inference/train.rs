//! Stochastic gradient ascent on an [`Objective`].

use log::info;
use nalgebra::DVector;
use rayon::prelude::*;
use serde::Deserialize;

use crate::error::GFIError;
use crate::inference::vi::{Objective, ObjectiveEstimate};
use crate::key::PrngKey;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub iterations: usize,
    pub learning_rate: f64,
    /// Independent estimates averaged per step.
    pub batch_size: usize,
    pub seed: u64,
    /// Log the loss every `log_every` iterations; `0` disables logging.
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            iterations: 5000,
            learning_rate: 1e-3,
            batch_size: 64,
            seed: 314159,
            log_every: 1000,
        }
    }
}

impl TrainConfig {
    /// Parse a configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, GFIError> {
        let config: TrainConfig =
            serde_json::from_str(json).map_err(|e| GFIError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GFIError> {
        if self.batch_size == 0 {
            return Err(GFIError::Config("batch_size must be positive".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(GFIError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub params: Vec<f64>,
    /// `-mean(objective)` per iteration.
    pub losses: Vec<f64>,
}

/// Maximise `objective` from `init_params`.
///
/// Every iteration splits the running key, evaluates `batch_size`
/// independent estimates in parallel and steps `phi += lr * mean(grad)`.
pub fn train(
    objective: &dyn Objective,
    init_params: &[f64],
    config: &TrainConfig,
) -> Result<TrainReport, GFIError> {
    config.validate()?;
    let dim = init_params.len();
    let mut params = DVector::from_column_slice(init_params);
    let mut key = PrngKey::new(config.seed);
    let mut losses = Vec::with_capacity(config.iterations);
    let batch = config.batch_size as f64;

    for i in 0..config.iterations {
        let (next, sub) = key.split();
        key = next;
        let estimates = sub
            .split_n(config.batch_size)
            .into_par_iter()
            .map(|k| objective.value_and_grad_estimate(k, params.as_slice()))
            .collect::<Result<Vec<ObjectiveEstimate>, _>>()?;

        let mean_value = estimates.iter().map(|e| e.value).sum::<f64>() / batch;
        let mean_grad = estimates
            .iter()
            .fold(DVector::zeros(dim), |acc, e| acc + &e.gradient)
            / batch;
        params += mean_grad * config.learning_rate;

        let loss = -mean_value;
        if config.log_every > 0 && i % config.log_every == 0 {
            info!("[{}] loss: {:.4}, params: {:?}", i, loss, params.as_slice());
        }
        losses.push(loss);
    }

    Ok(TrainReport {
        params: params.iter().copied().collect(),
        losses,
    })
}
