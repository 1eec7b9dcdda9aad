//! Variational objectives with pathwise gradients.
//!
//! Parameters enter as candle variables, flow through the proposal's
//! reparameterized samples and both densities, and the gradient of an
//! estimate comes from backpropagating through the recorded graph.

use nalgebra::DVector;
use rayon::prelude::*;

use crate::core::choice_map::ChoiceMap;
use crate::core::gfi::{GenFn, GenerativeFunction};
use crate::core::value::Value;
use crate::scalar::{self, Parameters, Scalar};
use crate::error::GFIError;
use crate::key::PrngKey;

/// One stochastic estimate of an objective and its gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveEstimate {
    pub value: f64,
    pub gradient: DVector<f64>,
}

/// A stochastic scalar objective of the proposal parameters.
pub trait Objective: Send + Sync {
    /// One estimate at `phi`. Tracked entries of `phi` carry their
    /// gradient into the result.
    fn estimate(&self, key: PrngKey, phi: &[Scalar]) -> Result<Scalar, GFIError>;

    fn value_and_grad_estimate(
        &self,
        key: PrngKey,
        params: &[f64],
    ) -> Result<ObjectiveEstimate, GFIError> {
        let params = Parameters::new(params)?;
        let est = self.estimate(key, params.scalars())?;
        Ok(ObjectiveEstimate {
            value: est.value(),
            gradient: params.gradient(&est)?,
        })
    }
}

/// Shared model/proposal/data wiring of both objectives.
#[derive(Debug, Clone)]
struct Variational {
    model: GenFn,
    model_args: Vec<Value>,
    proposal: GenFn,
    data: ChoiceMap,
}

impl Variational {
    fn new(model: GenFn, proposal: GenFn, data: ChoiceMap) -> Result<Self, GFIError> {
        if !proposal.is_reparameterized() {
            return Err(GFIError::NotReparameterized(proposal.name()));
        }
        Ok(Self {
            model,
            model_args: Vec::new(),
            proposal,
            data,
        })
    }

    /// `log p(data, z) - log q(z | data; phi)` for one `z ~ q`.
    fn log_weight(&self, key: PrngKey, phi: &[Scalar]) -> Result<Scalar, GFIError> {
        let (proposal_key, model_key) = key.split();
        let proposal_args = [
            Value::Map(self.data.clone()),
            Value::Tuple(phi.iter().cloned().map(Value::Real).collect()),
        ];
        let (log_q, z) = self.proposal.random_weighted(proposal_key, &proposal_args)?;
        let joint = self.data.merge(&z)?;
        let (log_p, _) = self.model.assess(model_key, &self.model_args, &joint)?;
        log_p - log_q
    }
}

/// The evidence lower bound `E_q[log p(data, z) - log q(z | data; phi)]`.
#[derive(Debug, Clone)]
pub struct Elbo {
    inner: Variational,
}

impl Elbo {
    /// # Errors
    ///
    /// `NotReparameterized` if `proposal` has a site without a pathwise gradient.
    pub fn new(
        model: impl Into<GenFn>,
        proposal: impl Into<GenFn>,
        data: ChoiceMap,
    ) -> Result<Self, GFIError> {
        Ok(Self {
            inner: Variational::new(model.into(), proposal.into(), data)?,
        })
    }

    /// Arguments passed to the model when it is assessed.
    pub fn with_model_args(mut self, args: Vec<Value>) -> Self {
        self.inner.model_args = args;
        self
    }
}

impl Objective for Elbo {
    fn estimate(&self, key: PrngKey, phi: &[Scalar]) -> Result<Scalar, GFIError> {
        self.inner.log_weight(key, phi)
    }
}

/// The importance-weighted bound with `M` proposal samples,
/// `logsumexp_j(log p(data, z_j) - log q(z_j | data; phi)) - ln M`.
///
/// `M = 1` is exactly [`Elbo`] under the same key.
#[derive(Debug, Clone)]
pub struct IwaeElbo {
    inner: Variational,
    samples: usize,
}

impl IwaeElbo {
    pub fn new(
        model: impl Into<GenFn>,
        proposal: impl Into<GenFn>,
        data: ChoiceMap,
        samples: usize,
    ) -> Result<Self, GFIError> {
        if samples == 0 {
            return Err(GFIError::InvalidParticleCount(samples));
        }
        Ok(Self {
            inner: Variational::new(model.into(), proposal.into(), data)?,
            samples,
        })
    }

    pub fn with_model_args(mut self, args: Vec<Value>) -> Self {
        self.inner.model_args = args;
        self
    }

    pub fn samples(&self) -> usize {
        self.samples
    }
}

impl Objective for IwaeElbo {
    fn estimate(&self, key: PrngKey, phi: &[Scalar]) -> Result<Scalar, GFIError> {
        if self.samples == 1 {
            return self.inner.log_weight(key, phi);
        }
        let weights = key
            .split_n(self.samples)
            .into_par_iter()
            .map(|k| self.inner.log_weight(k, phi))
            .collect::<Result<Vec<_>, _>>()?;
        scalar::logsumexp(&weights)? - (self.samples as f64).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{normal, normal_reparam};
    use crate::ir::{lit, var, Program};
    use approx::assert_abs_diff_eq;

    fn model() -> Program {
        Program::builder("model")
            .sample("x", normal_reparam(), vec![lit(0.0), lit(1.0)])
            .sample("y", normal_reparam(), vec![var("x"), lit(1.0)])
            .build()
    }

    /// `x ~ N(phi_0, exp(phi_1))`.
    fn guide() -> Program {
        Program::builder("guide")
            .param("data")
            .param("phi")
            .sample(
                "x",
                normal_reparam(),
                vec![var("phi").index(0), var("phi").index(1).exp()],
            )
            .build()
    }

    fn constants(params: &[f64]) -> Vec<Scalar> {
        params.iter().map(|&p| Scalar::constant(p)).collect()
    }

    fn data() -> ChoiceMap {
        ChoiceMap::from_pairs([("y", 2.0)]).unwrap()
    }

    #[test]
    fn test_non_reparameterized_proposal_rejected() {
        let bad = Program::builder("bad")
            .param("data")
            .param("phi")
            .sample("x", normal(), vec![var("phi").index(0), lit(1.0)])
            .build();
        assert_eq!(
            Elbo::new(model(), bad.clone(), data()).unwrap_err(),
            GFIError::NotReparameterized("bad".to_string())
        );
        assert!(IwaeElbo::new(model(), bad, data(), 2).is_err());
        assert_eq!(
            IwaeElbo::new(model(), guide(), data(), 0).unwrap_err(),
            GFIError::InvalidParticleCount(0)
        );
    }

    #[test]
    fn test_elbo_gradient_matches_finite_differences() {
        let elbo = Elbo::new(model(), guide(), data()).unwrap();
        let key = PrngKey::new(17);
        let params = [0.3, -0.2];
        let est = elbo.value_and_grad_estimate(key, &params).unwrap();

        let h = 1e-6;
        for i in 0..2 {
            let mut up = params;
            let mut down = params;
            up[i] += h;
            down[i] -= h;
            let fd = (elbo.estimate(key, &constants(&up)).unwrap().value()
                - elbo.estimate(key, &constants(&down)).unwrap().value())
                / (2.0 * h);
            assert_abs_diff_eq!(est.gradient[i], fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_single_sample_iwae_is_elbo() {
        let elbo = Elbo::new(model(), guide(), data()).unwrap();
        let iwae = IwaeElbo::new(model(), guide(), data(), 1).unwrap();
        for key in PrngKey::new(0).split_n(10) {
            let a = elbo.value_and_grad_estimate(key, &[0.1, 0.0]).unwrap();
            let b = iwae.value_and_grad_estimate(key, &[0.1, 0.0]).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_exact_posterior_gives_evidence() {
        // The posterior is N(1, sqrt(1/2)); with it as the guide every
        // estimate equals log p(y = 2) = log N(2; 0, sqrt 2).
        let elbo = Elbo::new(model(), guide(), data()).unwrap();
        let params = [1.0, 0.5f64.sqrt().ln()];
        let evidence = -1.0 - 0.5 * (4.0 * std::f64::consts::PI).ln();
        for key in PrngKey::new(1).split_n(5) {
            let est = elbo.value_and_grad_estimate(key, &params).unwrap();
            assert_abs_diff_eq!(est.value, evidence, epsilon = 1e-9);
        }
    }
}
