//! Sampling/importance resampling.

use std::sync::Arc;

use log::debug;
use ndarray::Array1;
use rand::distributions::{Distribution as _, WeightedIndex};
use rayon::prelude::*;

use crate::core::address::Selection;
use crate::core::choice_map::ChoiceMap;
use crate::core::gfi::{GenFn, GenerativeFunction, Trace};
use crate::core::value::Value;
use crate::scalar::{self, Scalar};
use crate::error::GFIError;
use crate::key::PrngKey;
use crate::utils::logsumexp;

/// A generative function conditioned on observations.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub gen_fn: &'a GenFn,
    pub args: &'a [Value],
    pub constraints: &'a ChoiceMap,
}

impl<'a> Target<'a> {
    pub fn new(gen_fn: &'a GenFn, args: &'a [Value], constraints: &'a ChoiceMap) -> Self {
        Self {
            gen_fn,
            args,
            constraints,
        }
    }
}

/// A custom proposal over the target's unconstrained choices.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub gen_fn: Arc<GenFn>,
    pub args: Vec<Value>,
}

/// SIR with a fixed particle count.
///
/// Without a custom proposal the target's own `generate` proposes the
/// unconstrained choices, so a particle's weight is the score of the
/// constrained sites.
///
/// Any particle error aborts the whole call, and a weight vector with no
/// usable particle raises [`GFIError::NumericInstability`].
#[derive(Debug, Clone)]
pub struct ImportanceSampler {
    particles: usize,
    proposal: Option<Proposal>,
}

/// Result of one SIR run.
#[derive(Debug, Clone)]
pub struct SirOutcome {
    /// The resampled particle.
    pub trace: Trace,
    /// Index of the resampled particle.
    pub index: usize,
    pub log_weights: Array1<f64>,
    /// `logsumexp(w) - ln K`.
    pub log_normalizer: Scalar,
}

impl SirOutcome {
    /// `(sum w)^2 / sum w^2`, computed in log space.
    pub fn effective_sample_size(&self) -> f64 {
        let lw = self.log_weights.as_slice().unwrap_or(&[]);
        let doubled: Vec<f64> = lw.iter().map(|w| 2.0 * w).collect();
        (2.0 * logsumexp(lw) - logsumexp(&doubled)).exp()
    }
}

fn check_weights(weights: &[f64]) -> Result<(), GFIError> {
    if let Some(bad) = weights.iter().find(|w| w.is_nan() || **w == f64::INFINITY) {
        return Err(GFIError::NumericInstability {
            reason: format!("importance weight {}", bad),
        });
    }
    if weights.iter().all(|w| *w == f64::NEG_INFINITY) {
        return Err(GFIError::NumericInstability {
            reason: format!("all {} importance weights are zero", weights.len()),
        });
    }
    Ok(())
}

impl ImportanceSampler {
    pub fn new(particles: usize) -> Result<Self, GFIError> {
        if particles == 0 {
            return Err(GFIError::InvalidParticleCount(particles));
        }
        Ok(Self {
            particles,
            proposal: None,
        })
    }

    pub fn with_proposal(mut self, gen_fn: impl Into<GenFn>, args: Vec<Value>) -> Self {
        self.proposal = Some(Proposal {
            gen_fn: Arc::new(gen_fn.into()),
            args,
        });
        self
    }

    pub fn particles(&self) -> usize {
        self.particles
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    /// One weighted particle: a target trace and its log importance weight.
    fn particle(&self, key: PrngKey, target: &Target) -> Result<(Trace, Scalar), GFIError> {
        match &self.proposal {
            None => target
                .gen_fn
                .generate(key, target.args, target.constraints),
            Some(proposal) => {
                let (k1, k2) = key.split();
                let (latents, q, _) = proposal.gen_fn.propose(k1, &proposal.args)?;
                let merged = target.constraints.merge(&latents)?;
                let (trace, p) = target.gen_fn.generate(k2, target.args, &merged)?;
                Ok((trace, (p - q)?))
            }
        }
    }

    /// Draw `count` particles in parallel, one key each.
    pub(crate) fn weighted_particles(
        &self,
        key: PrngKey,
        target: &Target,
        count: usize,
    ) -> Result<Vec<(Trace, Scalar)>, GFIError> {
        key.split_n(count)
            .into_par_iter()
            .map(|k| self.particle(k, target))
            .collect()
    }

    /// `logsumexp(w) - ln K` after validating the weights.
    pub(crate) fn reduce(&self, weights: &[Scalar]) -> Result<Scalar, GFIError> {
        let values: Vec<f64> = weights.iter().map(|w| w.value()).collect();
        check_weights(&values)?;
        if let [single] = weights {
            return Ok(single.clone());
        }
        scalar::logsumexp(weights)? - (weights.len() as f64).ln()
    }

    /// Draw K particles, reweight them against the target and resample one.
    pub fn run(&self, key: PrngKey, target: &Target) -> Result<SirOutcome, GFIError> {
        let (particle_key, resample_key) = key.split();
        let particles = self.weighted_particles(particle_key, target, self.particles)?;
        let (traces, weights): (Vec<Trace>, Vec<Scalar>) = particles.into_iter().unzip();
        let log_normalizer = self.reduce(&weights)?;
        let log_weights: Array1<f64> = weights.iter().map(|w| w.value()).collect();

        let index = if self.particles == 1 {
            0
        } else {
            let mx = log_weights.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            let probs = log_weights.mapv(|w| (w - mx).exp());
            let categorical = WeightedIndex::new(probs.iter()).map_err(|e| {
                GFIError::NumericInstability {
                    reason: e.to_string(),
                }
            })?;
            categorical.sample(&mut resample_key.rng())
        };

        let outcome = SirOutcome {
            trace: traces[index].clone(),
            index,
            log_weights,
            log_normalizer,
        };
        debug!(
            "sir: K = {}, log Z = {:.4}, ESS = {:.2}",
            self.particles,
            outcome.log_normalizer.value(),
            outcome.effective_sample_size()
        );
        Ok(outcome)
    }

    /// Monte-Carlo estimate of the target's log normalizing constant.
    pub fn estimate_normalizing_constant(
        &self,
        key: PrngKey,
        target: &Target,
    ) -> Result<Scalar, GFIError> {
        let weights: Vec<Scalar> = self
            .weighted_particles(key, target, self.particles)?
            .into_iter()
            .map(|(_, w)| w)
            .collect();
        self.reduce(&weights)
    }

    /// Log normalizing-constant estimate whose reciprocal is unbiased for
    /// `1 / Z`, given one exact posterior sample.
    ///
    /// Particle 0 is the retained sample (`retained_latents` together with the
    /// target constraints, with joint score `retained_score`); the other
    /// `K - 1` particles are fresh.
    pub fn estimate_reciprocal_normalizing_constant(
        &self,
        key: PrngKey,
        target: &Target,
        retained_latents: &ChoiceMap,
        retained_score: Scalar,
    ) -> Result<Scalar, GFIError> {
        let (retained_key, fresh_key) = key.split();
        let retained = match &self.proposal {
            None => {
                let merged = target.constraints.merge(retained_latents)?;
                let (trace, _) = target.gen_fn.generate(retained_key, target.args, &merged)?;
                trace.project(&Selection::from_addresses(target.constraints.addresses()))?
            }
            Some(proposal) => {
                let (q, _) = proposal
                    .gen_fn
                    .assess(retained_key, &proposal.args, retained_latents)?;
                (retained_score - q)?
            }
        };

        let mut weights = vec![retained];
        weights.extend(
            self.weighted_particles(fresh_key, target, self.particles - 1)?
                .into_iter()
                .map(|(_, w)| w),
        );
        self.reduce(&weights)
    }
}
