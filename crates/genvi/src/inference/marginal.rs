//! Distributions over a subset of a generative function's addresses.

use std::sync::Arc;

use crate::core::address::Selection;
use crate::core::choice_map::ChoiceMap;
use crate::core::gfi::{GenFn, GenerativeFunction, Trace};
use crate::core::value::Value;
use crate::scalar::Scalar;
use crate::error::GFIError;
use crate::inference::sir::{ImportanceSampler, Target};
use crate::key::PrngKey;

/// The marginal of `family` over the addresses in `selection`.
///
/// The density of the selected choices is never computed exactly: the
/// latent (unselected) choices are integrated out by importance sampling,
/// so every density returned here is a Monte-Carlo estimate. Used inside an
/// objective, the estimate from [`Marginal::random_weighted`] yields a
/// stochastic lower bound.
#[derive(Debug, Clone)]
pub struct Marginal {
    selection: Selection,
    family: Arc<GenFn>,
    sampler: ImportanceSampler,
}

impl Marginal {
    pub fn new(selection: Selection, family: impl Into<GenFn>, sampler: ImportanceSampler) -> Self {
        Self {
            selection,
            family: Arc::new(family.into()),
            sampler,
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn family(&self) -> &GenFn {
        &self.family
    }

    /// Same family instance and selection; clones compare equal.
    pub fn same_as(&self, other: &Marginal) -> bool {
        Arc::ptr_eq(&self.family, &other.family) && self.selection == other.selection
    }

    /// Sample the selected choices together with a log-density estimate
    /// whose reciprocal is unbiased for `1 / q(choices)`.
    pub fn random_weighted(
        &self,
        key: PrngKey,
        args: &[Value],
    ) -> Result<(Scalar, ChoiceMap), GFIError> {
        let (sim_key, estimate_key) = key.split();
        let trace = self.family.simulate(sim_key, args)?;
        let selected = trace.get_choices().filter(&self.selection);
        let latents = trace.get_choices().filter(&!self.selection.clone());
        let target = Target::new(&self.family, args, &selected);
        let estimate = self.sampler.estimate_reciprocal_normalizing_constant(
            estimate_key,
            &target,
            &latents,
            trace.score().clone(),
        )?;
        Ok((estimate, selected))
    }

    /// Importance-sampling estimate of `log q(choices)`.
    ///
    /// # Errors
    ///
    /// `IncompleteChoiceMap` if some particle visits a selected address that
    /// `choices` does not provide.
    pub fn estimate_logpdf(
        &self,
        key: PrngKey,
        choices: &ChoiceMap,
        args: &[Value],
    ) -> Result<Scalar, GFIError> {
        let selected = choices.filter(&self.selection);
        let target = Target::new(&self.family, args, &selected);
        let particles =
            self.sampler
                .weighted_particles(key, &target, self.sampler.particles())?;
        let mut weights = Vec::with_capacity(particles.len());
        for (trace, w) in particles {
            self.check_covered(&trace, &selected)?;
            weights.push(w);
        }
        self.sampler.reduce(&weights)
    }

    fn check_covered(&self, trace: &Trace, selected: &ChoiceMap) -> Result<(), GFIError> {
        match trace
            .get_choices()
            .filter(&self.selection)
            .addresses()
            .into_iter()
            .find(|addr| !selected.contains(addr))
        {
            Some(address) => Err(GFIError::IncompleteChoiceMap { address }),
            None => Ok(()),
        }
    }

    fn trace(&self, args: &[Value], choices: ChoiceMap, score: Scalar) -> Trace {
        Trace::new(
            GenFn::Marginal(self.clone()),
            args.to_vec(),
            choices.clone(),
            Value::Map(choices),
            score,
        )
    }
}

impl GenerativeFunction for Marginal {
    fn name(&self) -> String {
        format!("marginal({})", self.family.name())
    }

    fn simulate(&self, key: PrngKey, args: &[Value]) -> Result<Trace, GFIError> {
        let (score, choices) = self.random_weighted(key, args)?;
        Ok(self.trace(args, choices, score))
    }

    fn generate(
        &self,
        key: PrngKey,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar), GFIError> {
        if constraints.is_empty() {
            return Ok((self.simulate(key, args)?, Scalar::constant(0.0)));
        }
        let choices = constraints.filter(&self.selection);
        let score = self.estimate_logpdf(key, &choices, args)?;
        Ok((self.trace(args, choices, score.clone()), score))
    }

    fn assess(
        &self,
        key: PrngKey,
        args: &[Value],
        choices: &ChoiceMap,
    ) -> Result<(Scalar, Value), GFIError> {
        let selected = choices.filter(&self.selection);
        let score = self.estimate_logpdf(key, &selected, args)?;
        Ok((score, Value::Map(selected)))
    }

    fn update(
        &self,
        key: PrngKey,
        trace: &Trace,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar, ChoiceMap), GFIError> {
        let (merged, discard) = trace
            .get_choices()
            .merge_override(&constraints.filter(&self.selection));
        let score = self.estimate_logpdf(key, &merged, args)?;
        let weight = (&score - trace.score())?;
        Ok((self.trace(args, merged, score), weight, discard))
    }

    fn is_reparameterized(&self) -> bool {
        self.family.is_reparameterized()
    }

    fn random_weighted(&self, key: PrngKey, args: &[Value]) -> Result<(Scalar, ChoiceMap), GFIError> {
        Marginal::random_weighted(self, key, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{normal, normal_reparam};
    use crate::ir::{lit, var, Program};
    use crate::{s, sym};
    use approx::assert_abs_diff_eq;

    /// `u ~ N(0, 1)`, `x ~ N(u, 1)`; marginally `x ~ N(0, sqrt 2)`.
    fn conjugate(sampler: ImportanceSampler) -> Marginal {
        let family = Program::builder("family")
            .sample("u", normal_reparam(), vec![lit(0.0), lit(1.0)])
            .sample("x", normal_reparam(), vec![var("u"), lit(1.0)])
            .build();
        Marginal::new(s!(x), family, sampler)
    }

    fn exact_logpdf(x: f64) -> f64 {
        -0.25 * x * x - 0.5 * (4.0 * std::f64::consts::PI).ln()
    }

    #[test]
    fn test_random_weighted_returns_selected_choices_only() {
        let m = conjugate(ImportanceSampler::new(3).unwrap());
        let (w, choices) = m.random_weighted(PrngKey::new(1), &[]).unwrap();
        assert_eq!(choices.addresses(), vec![sym!(x)]);
        assert!(w.value().is_finite());
        assert!(m.is_reparameterized());
    }

    #[test]
    fn test_single_particle_estimate_is_conditional_score() {
        let m = conjugate(ImportanceSampler::new(1).unwrap());
        let key = PrngKey::new(2);
        let (w, _) = m.random_weighted(key, &[]).unwrap();

        let (sim_key, _) = key.split();
        let tr = m.family().simulate(sim_key, &[]).unwrap();
        assert_abs_diff_eq!(
            w.value(),
            tr.project(&s!(x)).unwrap().value(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_estimate_logpdf_converges() {
        let m = conjugate(ImportanceSampler::new(4000).unwrap());
        let choices = ChoiceMap::from_pairs([("x", 0.7)]).unwrap();
        let est = m.estimate_logpdf(PrngKey::new(5), &choices, &[]).unwrap();
        assert_abs_diff_eq!(est.value(), exact_logpdf(0.7), epsilon = 0.05);

        let (a, _) = m.assess(PrngKey::new(5), &[], &choices).unwrap();
        assert_eq!(a.value(), est.value());
    }

    #[test]
    fn test_partial_constraint_is_incomplete() {
        let m = conjugate(ImportanceSampler::new(2).unwrap());
        let wrong = ChoiceMap::from_pairs([("u", 0.1)]).unwrap();
        assert_eq!(
            m.generate(PrngKey::new(0), &[], &wrong).unwrap_err(),
            GFIError::IncompleteChoiceMap { address: sym!(x) }
        );
    }

    #[test]
    fn test_generate_and_update() {
        let m = conjugate(ImportanceSampler::new(8).unwrap());
        let (tr, w) = m.generate(PrngKey::new(3), &[], &ChoiceMap::new()).unwrap();
        assert_eq!(w.value(), 0.0);
        let old_x = tr.get(&sym!(x)).unwrap().clone();

        let constraints = ChoiceMap::from_pairs([("x", -0.4)]).unwrap();
        let (new_tr, w, discard) = m.update(PrngKey::new(4), &tr, &[], &constraints).unwrap();
        assert_eq!(new_tr.get(&sym!(x)), Some(&Value::from(-0.4)));
        assert_eq!(discard.get(&sym!(x)), Some(&old_x));
        assert_abs_diff_eq!(
            w.value(),
            new_tr.get_score() - tr.get_score(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_marginal_inside_a_program() {
        let inner = conjugate(ImportanceSampler::new(2).unwrap());
        let outer = Program::builder("outer")
            .call(Some("m"), "m", inner, vec![])
            .sample("y", normal(), vec![var("m").get("x"), lit(1.0)])
            .build();
        let tr = outer.simulate(PrngKey::new(6), &[]).unwrap();
        assert!(tr.get(&crate::path!(m, x)).is_some());
        assert!(tr.get(&crate::path!(m, u)).is_none());
        assert!(tr.get(&sym!(y)).is_some());
    }

    #[test]
    fn test_identity() {
        let m = conjugate(ImportanceSampler::new(2).unwrap());
        assert!(m.same_as(&m.clone()));
        assert!(!m.same_as(&conjugate(ImportanceSampler::new(2).unwrap())));
        let narrower = Marginal {
            selection: s!(u),
            ..m.clone()
        };
        assert!(!m.same_as(&narrower));
    }
}
