//! Primitive distributions.
//!
//! Each variant exposes exact sampling and an exact log density over a single
//! value, and acts as a generative function whose choice map is one leaf at
//! the root address.

use std::f64::consts::PI;

use rand::distributions::Distribution as _;
use rand::Rng;

use crate::core::address::Address;
use crate::core::choice_map::ChoiceMap;
use crate::core::gfi::{GenerativeFunction, Trace};
use crate::core::value::Value;
use crate::scalar::Scalar;
use crate::error::GFIError;
use crate::key::PrngKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// `normal(mu, sigma)` sampled ancestrally; the sample carries no gradient.
    Normal,
    /// `normal(mu, sigma)` sampled as `mu + sigma * eps`, `eps ~ N(0, 1)`.
    NormalReparam,
    /// `uniform()` on the unit interval or `uniform(low, high)`, sampled as
    /// `low + (high - low) * u`.
    Uniform,
    /// `bernoulli(p)` over booleans.
    Bernoulli,
}

pub fn normal() -> Distribution {
    Distribution::Normal
}

pub fn normal_reparam() -> Distribution {
    Distribution::NormalReparam
}

pub fn uniform() -> Distribution {
    Distribution::Uniform
}

pub fn bernoulli() -> Distribution {
    Distribution::Bernoulli
}

fn real_args<const N: usize>(
    name: &'static str,
    args: &[Value],
) -> Result<[Scalar; N], GFIError> {
    if args.len() != N {
        return Err(GFIError::Arity {
            callee: name.to_string(),
            expected: N,
            got: args.len(),
        });
    }
    let reals = args
        .iter()
        .map(|a| a.to_real())
        .collect::<Result<Vec<_>, _>>()?;
    reals.try_into().map_err(|_| GFIError::Arity {
        callee: name.to_string(),
        expected: N,
        got: args.len(),
    })
}

fn unsupported(distribution: &'static str, reason: String) -> GFIError {
    GFIError::InvalidSupport {
        distribution,
        reason,
    }
}

impl Distribution {
    pub fn label(&self) -> &'static str {
        match self {
            Distribution::Normal => "normal",
            Distribution::NormalReparam => "normal_reparam",
            Distribution::Uniform => "uniform",
            Distribution::Bernoulli => "bernoulli",
        }
    }

    pub fn reparameterized(&self) -> bool {
        matches!(self, Distribution::NormalReparam | Distribution::Uniform)
    }

    fn normal_params(&self, args: &[Value]) -> Result<(Scalar, Scalar), GFIError> {
        let [mu, sigma] = real_args::<2>(self.label(), args)?;
        if !(sigma.value() > 0.0 && sigma.value().is_finite()) || !mu.value().is_finite() {
            return Err(unsupported(
                self.label(),
                format!("mu = {}, sigma = {}", mu, sigma),
            ));
        }
        Ok((mu, sigma))
    }

    fn uniform_params(&self, args: &[Value]) -> Result<(Scalar, Scalar), GFIError> {
        let (low, high) = if args.is_empty() {
            (Scalar::constant(0.0), Scalar::constant(1.0))
        } else {
            let [low, high] = real_args::<2>(self.label(), args)?;
            (low, high)
        };
        if !(high.value() > low.value()) {
            return Err(unsupported(
                self.label(),
                format!("empty interval [{}, {}]", low, high),
            ));
        }
        Ok((low, high))
    }

    fn bernoulli_param(&self, args: &[Value]) -> Result<Scalar, GFIError> {
        let [p] = real_args::<1>(self.label(), args)?;
        if !(0.0..=1.0).contains(&p.value()) {
            return Err(unsupported(self.label(), format!("p = {}", p)));
        }
        Ok(p)
    }

    /// Draw one value.
    pub fn sample(&self, key: PrngKey, args: &[Value]) -> Result<Value, GFIError> {
        let mut rng = key.rng();
        match self {
            Distribution::Normal => {
                let (mu, sigma) = self.normal_params(args)?;
                let d = statrs::distribution::Normal::new(mu.value(), sigma.value())
                    .map_err(|e| unsupported(self.label(), e.to_string()))?;
                Ok(Value::from(d.sample(&mut rng)))
            }
            Distribution::NormalReparam => {
                let (mu, sigma) = self.normal_params(args)?;
                let noise = statrs::distribution::Normal::new(0.0, 1.0)
                    .map_err(|e| unsupported(self.label(), e.to_string()))?;
                let eps: f64 = noise.sample(&mut rng);
                Ok(Value::Real((mu + (sigma * eps)?)?))
            }
            Distribution::Uniform => {
                let (low, high) = self.uniform_params(args)?;
                let u: f64 = rng.gen();
                Ok(Value::Real((&low + &((high - &low)? * u)?)?))
            }
            Distribution::Bernoulli => {
                let p = self.bernoulli_param(args)?;
                let d = statrs::distribution::Bernoulli::new(p.value())
                    .map_err(|e| unsupported(self.label(), e.to_string()))?;
                let b: bool = d.sample(&mut rng);
                Ok(Value::Bool(b))
            }
        }
    }

    /// Exact log density of `value`.
    ///
    /// # Errors
    ///
    /// `InvalidSupport` for invalid parameters or a value outside the support,
    /// so that a NaN density is never returned.
    pub fn log_density(&self, value: &Value, args: &[Value]) -> Result<Scalar, GFIError> {
        match self {
            Distribution::Normal | Distribution::NormalReparam => {
                let (mu, sigma) = self.normal_params(args)?;
                let x = value.to_real()?;
                if !x.value().is_finite() {
                    return Err(unsupported(self.label(), format!("value {}", x)));
                }
                let z = ((x - mu)? / &sigma)?;
                let log_norm = (sigma.ln()? + 0.5 * (2.0 * PI).ln())?;
                (z.square()? * -0.5)? - log_norm
            }
            Distribution::Uniform => {
                let (low, high) = self.uniform_params(args)?;
                let x = value.to_real()?;
                if !(low.value()..=high.value()).contains(&x.value()) {
                    return Err(unsupported(
                        self.label(),
                        format!("value {} outside [{}, {}]", x, low, high),
                    ));
                }
                let log_width: Scalar = (high - low)?.ln()?;
                -log_width
            }
            Distribution::Bernoulli => {
                let p = self.bernoulli_param(args)?;
                if value.as_bool()? {
                    p.ln()
                } else {
                    (1.0 - p)?.ln()
                }
            }
        }
    }

    fn leaf_trace(&self, args: &[Value], value: Value, score: Scalar) -> Trace {
        Trace::new(
            (*self).into(),
            args.to_vec(),
            ChoiceMap::leaf(value.clone()),
            value,
            score,
        )
    }
}

impl GenerativeFunction for Distribution {
    fn name(&self) -> String {
        self.label().to_string()
    }

    fn simulate(&self, key: PrngKey, args: &[Value]) -> Result<Trace, GFIError> {
        let value = self.sample(key, args)?;
        let score = self.log_density(&value, args)?;
        Ok(self.leaf_trace(args, value, score))
    }

    fn generate(
        &self,
        key: PrngKey,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar), GFIError> {
        match constraints.root_value() {
            Some(value) => {
                let score = self.log_density(value, args)?;
                Ok((self.leaf_trace(args, value.clone(), score.clone()), score))
            }
            None => Ok((self.simulate(key, args)?, Scalar::constant(0.0))),
        }
    }

    fn assess(
        &self,
        _key: PrngKey,
        args: &[Value],
        choices: &ChoiceMap,
    ) -> Result<(Scalar, Value), GFIError> {
        let value = choices
            .root_value()
            .ok_or_else(|| GFIError::IncompleteChoiceMap {
                address: Address::root(),
            })?;
        Ok((self.log_density(value, args)?, value.clone()))
    }

    fn update(
        &self,
        _key: PrngKey,
        trace: &Trace,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar, ChoiceMap), GFIError> {
        let (value, discard) = match constraints.root_value() {
            Some(new_value) => (
                new_value.clone(),
                ChoiceMap::leaf(trace.get_retval().clone()),
            ),
            None => (trace.get_retval().clone(), ChoiceMap::new()),
        };
        let score = self.log_density(&value, args)?;
        let weight = (&score - trace.score())?;
        Ok((self.leaf_trace(args, value, score), weight, discard))
    }

    fn is_reparameterized(&self) -> bool {
        self.reparameterized()
    }
}
