use std::fmt::Debug;

use crate::core::address::{Address, Selection};
use crate::core::choice_map::ChoiceMap;
use crate::core::value::Value;
use crate::distributions::Distribution;
use crate::scalar::Scalar;
use crate::error::GFIError;
use crate::inference::marginal::Marginal;
use crate::ir::Program;
use crate::key::PrngKey;

/// Abstract trait for a generative function.
///
/// A generative function defines a probability distribution over execution
/// traces. Every operation is a pure function of its key and arguments.
pub trait GenerativeFunction: Debug + Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> String;

    /// Executes the generative function forward and returns a trace.
    ///
    /// Samples t ~ p(·; x); the trace score is log p(t; x).
    fn simulate(&self, key: PrngKey, args: &[Value]) -> Result<Trace, GFIError>;

    /// Generates a trace consistent with `constraints`.
    ///
    /// Constrained sites take their value from `constraints`, the rest are
    /// sampled. Returns the trace and the importance weight
    /// log [p(all choices; x) / q(sampled choices; constrained choices, x)],
    /// i.e. the summed log density of the constrained sites.
    fn generate(
        &self,
        key: PrngKey,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar), GFIError>;

    /// Computes log p(choices; x) for a complete choice map, together with
    /// the return value.
    ///
    /// Exact for primitive and composite functions; functions whose density
    /// is itself estimated consume `key`.
    ///
    /// # Errors
    ///
    /// `IncompleteChoiceMap` if a site visited by the program has no choice.
    fn assess(
        &self,
        key: PrngKey,
        args: &[Value],
        choices: &ChoiceMap,
    ) -> Result<(Scalar, Value), GFIError>;

    /// Updates a trace with new arguments and constraints.
    ///
    /// Returns the new trace, the weight
    /// log [p(t'; x') / p(t; x)] - log q(freshly sampled choices),
    /// and the choices of the old trace that were overwritten or dropped.
    fn update(
        &self,
        key: PrngKey,
        trace: &Trace,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar, ChoiceMap), GFIError>;

    /// Whether every sampling site draws through a reparameterization, so
    /// that sampled values carry pathwise gradients.
    fn is_reparameterized(&self) -> bool;

    /// Sample choices together with an estimate of their log density.
    fn random_weighted(&self, key: PrngKey, args: &[Value]) -> Result<(Scalar, ChoiceMap), GFIError> {
        let trace = self.simulate(key, args)?;
        Ok((trace.score.clone(), trace.choices))
    }

    /// Sample choices and return them with their log density and the return value.
    fn propose(&self, key: PrngKey, args: &[Value]) -> Result<(ChoiceMap, Scalar, Value), GFIError> {
        let trace = self.simulate(key, args)?;
        Ok((trace.choices, trace.score, trace.retval))
    }
}

/// The closed set of generative function kinds.
#[derive(Debug, Clone)]
pub enum GenFn {
    Distribution(Distribution),
    Program(Program),
    Marginal(Marginal),
}

impl GenFn {
    fn inner(&self) -> &dyn GenerativeFunction {
        match self {
            GenFn::Distribution(d) => d as &dyn GenerativeFunction,
            GenFn::Program(p) => p as &dyn GenerativeFunction,
            GenFn::Marginal(m) => m as &dyn GenerativeFunction,
        }
    }

    /// Whether `self` and `other` denote the same generative function, so
    /// that a trace of one is a valid trace of the other.
    pub fn same_as(&self, other: &GenFn) -> bool {
        match (self, other) {
            (GenFn::Distribution(a), GenFn::Distribution(b)) => a == b,
            (GenFn::Program(a), GenFn::Program(b)) => a.same_as(b),
            (GenFn::Marginal(a), GenFn::Marginal(b)) => a.same_as(b),
            _ => false,
        }
    }
}

impl From<Distribution> for GenFn {
    fn from(d: Distribution) -> Self {
        GenFn::Distribution(d)
    }
}

impl From<Program> for GenFn {
    fn from(p: Program) -> Self {
        GenFn::Program(p)
    }
}

impl From<Marginal> for GenFn {
    fn from(m: Marginal) -> Self {
        GenFn::Marginal(m)
    }
}

impl GenerativeFunction for GenFn {
    fn name(&self) -> String {
        self.inner().name()
    }

    fn simulate(&self, key: PrngKey, args: &[Value]) -> Result<Trace, GFIError> {
        self.inner().simulate(key, args)
    }

    fn generate(
        &self,
        key: PrngKey,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar), GFIError> {
        self.inner().generate(key, args, constraints)
    }

    fn assess(
        &self,
        key: PrngKey,
        args: &[Value],
        choices: &ChoiceMap,
    ) -> Result<(Scalar, Value), GFIError> {
        self.inner().assess(key, args, choices)
    }

    fn update(
        &self,
        key: PrngKey,
        trace: &Trace,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar, ChoiceMap), GFIError> {
        self.inner().update(key, trace, args, constraints)
    }

    fn is_reparameterized(&self) -> bool {
        self.inner().is_reparameterized()
    }

    fn random_weighted(&self, key: PrngKey, args: &[Value]) -> Result<(Scalar, ChoiceMap), GFIError> {
        self.inner().random_weighted(key, args)
    }
}

/// One recorded execution of a generative function.
///
/// The trace exclusively owns its choice map. Composite traces also keep the
/// sub-trace of every traced site so that `update` can reuse them and
/// `project` can attribute scores to addresses.
#[derive(Debug, Clone)]
pub struct Trace {
    gen_fn: GenFn,
    args: Vec<Value>,
    choices: ChoiceMap,
    retval: Value,
    score: Scalar,
    subtraces: Vec<(Address, Trace)>,
}

impl Trace {
    pub(crate) fn new(
        gen_fn: GenFn,
        args: Vec<Value>,
        choices: ChoiceMap,
        retval: Value,
        score: Scalar,
    ) -> Self {
        Self {
            gen_fn,
            args,
            choices,
            retval,
            score,
            subtraces: Vec::new(),
        }
    }

    pub(crate) fn with_subtraces(mut self, subtraces: Vec<(Address, Trace)>) -> Self {
        self.subtraces = subtraces;
        self
    }

    /// Returns the arguments used for this execution.
    pub fn get_args(&self) -> &[Value] {
        &self.args
    }

    pub fn get_retval(&self) -> &Value {
        &self.retval
    }

    pub fn get_choices(&self) -> &ChoiceMap {
        &self.choices
    }

    pub fn into_choices(self) -> ChoiceMap {
        self.choices
    }

    /// Log density of the choices under the producing function.
    pub fn get_score(&self) -> f64 {
        self.score.value()
    }

    /// The score with its parameter gradient.
    pub fn score(&self) -> &Scalar {
        &self.score
    }

    pub fn get_gen_fn(&self) -> &GenFn {
        &self.gen_fn
    }

    /// Gets a choice value by address.
    pub fn get(&self, addr: &Address) -> Option<&Value> {
        self.choices.get(addr)
    }

    /// The sub-trace recorded at a call site.
    pub fn subtrace(&self, addr: &Address) -> Option<&Trace> {
        self.subtraces
            .iter()
            .find(|(a, _)| a == addr)
            .map(|(_, t)| t)
    }

    pub(crate) fn subtraces(&self) -> &[(Address, Trace)] {
        &self.subtraces
    }

    /// Summed score of the selected sites.
    pub fn project(&self, selection: &Selection) -> Result<Scalar, GFIError> {
        if self.subtraces.is_empty() {
            return Ok(if selection.check() {
                self.score.clone()
            } else {
                Scalar::constant(0.0)
            });
        }
        let parts = self
            .subtraces
            .iter()
            .filter_map(|(addr, sub)| {
                let inner = selection.call(addr);
                (!inner.is_none()).then(|| sub.project(&inner))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Scalar::sum(parts)
    }
}
