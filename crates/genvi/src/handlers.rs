//! Interpreter for [`Program`]s.
//!
//! The interpreter walks the statement list and hands every traced site to a
//! [`TraceHandler`]; each GFI operation is one handler. Handlers record the
//! callee's sub-trace, namespace its choices under the site address, and
//! accumulate scores and weights.

use std::collections::HashSet;

use log::trace;

use crate::core::address::Address;
use crate::core::choice_map::ChoiceMap;
use crate::core::gfi::{GenFn, GenerativeFunction, Trace};
use crate::core::value::Value;
use crate::scalar::Scalar;
use crate::error::GFIError;
use crate::ir::{Env, Program, Stmt};
use crate::key::PrngKey;

/// Called once per traced site during interpretation.
pub trait TraceHandler {
    /// Handle the invocation of `callee` at `addr` and return its value.
    fn on_trace(&mut self, addr: &Address, callee: &GenFn, args: Vec<Value>) -> Result<Value, GFIError>;
}

/// Run `program` on `args`, delegating every traced site to `handler`.
pub fn execute(
    program: &Program,
    args: &[Value],
    handler: &mut dyn TraceHandler,
) -> Result<Value, GFIError> {
    if args.len() != program.params().len() {
        return Err(GFIError::Arity {
            callee: program.label().to_string(),
            expected: program.params().len(),
            got: args.len(),
        });
    }
    let mut env = Env::new();
    for (name, arg) in program.params().iter().zip(args) {
        env.set(name, arg.clone());
    }
    Ok(exec_block(program.body(), &mut env, handler)?.unwrap_or_else(Value::unit))
}

fn exec_block(
    stmts: &[Stmt],
    env: &mut Env,
    handler: &mut dyn TraceHandler,
) -> Result<Option<Value>, GFIError> {
    for stmt in stmts {
        match stmt {
            Stmt::Let(name, expr) => {
                let value = expr.eval(env)?;
                env.set(name, value);
            }
            Stmt::Trace {
                addr,
                callee,
                args,
                bind,
            } => {
                let args = args
                    .iter()
                    .map(|e| e.eval(env))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = handler.on_trace(addr, callee, args)?;
                if let Some(name) = bind {
                    env.set(name, value);
                }
            }
            Stmt::Branch {
                cond,
                then,
                otherwise,
            } => {
                let taken = if cond.eval(env)?.as_bool()? {
                    then
                } else {
                    otherwise
                };
                if let Some(ret) = exec_block(taken, env, handler)? {
                    return Ok(Some(ret));
                }
            }
            Stmt::Return(expr) => return Ok(Some(expr.eval(env)?)),
        }
    }
    Ok(None)
}

/// State shared by the trace-building handlers.
struct Recorder {
    key: PrngKey,
    sites: u64,
    visited: HashSet<Address>,
    choices: ChoiceMap,
    score: Scalar,
    subtraces: Vec<(Address, Trace)>,
}

impl Recorder {
    fn new(key: PrngKey) -> Self {
        Self {
            key,
            sites: 0,
            visited: HashSet::new(),
            choices: ChoiceMap::new(),
            score: Scalar::constant(0.0),
            subtraces: Vec::new(),
        }
    }

    /// Claim `addr` and return the key reserved for it.
    fn enter(&mut self, addr: &Address) -> Result<PrngKey, GFIError> {
        if !self.visited.insert(addr.clone()) {
            return Err(GFIError::AddressCollision {
                address: addr.clone(),
            });
        }
        let key = self.key.fold_in(self.sites);
        self.sites += 1;
        Ok(key)
    }

    fn record(&mut self, addr: &Address, sub: Trace) -> Result<Value, GFIError> {
        self.choices.insert_submap(addr, sub.get_choices())?;
        self.score = (&self.score + sub.score())?;
        let retval = sub.get_retval().clone();
        self.subtraces.push((addr.clone(), sub));
        Ok(retval)
    }

    fn finish(self, program: &Program, args: &[Value], retval: Value) -> Trace {
        Trace::new(
            GenFn::Program(program.clone()),
            args.to_vec(),
            self.choices,
            retval,
            self.score,
        )
        .with_subtraces(self.subtraces)
    }
}

pub struct SimulateHandler {
    rec: Recorder,
}

impl TraceHandler for SimulateHandler {
    fn on_trace(&mut self, addr: &Address, callee: &GenFn, args: Vec<Value>) -> Result<Value, GFIError> {
        let key = self.rec.enter(addr)?;
        let sub = callee.simulate(key, &args).map_err(|e| e.at(addr))?;
        trace!("simulate {} ~ {}: score {}", addr, callee.name(), sub.get_score());
        self.rec.record(addr, sub)
    }
}

pub struct GenerateHandler<'a> {
    rec: Recorder,
    constraints: &'a ChoiceMap,
    weight: Scalar,
}

impl TraceHandler for GenerateHandler<'_> {
    fn on_trace(&mut self, addr: &Address, callee: &GenFn, args: Vec<Value>) -> Result<Value, GFIError> {
        let key = self.rec.enter(addr)?;
        let constraints = self.constraints.get_submap(addr);
        let (sub, w) = callee
            .generate(key, &args, &constraints)
            .map_err(|e| e.at(addr))?;
        trace!("generate {} ~ {}: weight {}", addr, callee.name(), w);
        self.weight = (&self.weight + &w)?;
        self.rec.record(addr, sub)
    }
}

pub struct AssessHandler<'a> {
    key: PrngKey,
    sites: u64,
    visited: HashSet<Address>,
    choices: &'a ChoiceMap,
    score: Scalar,
}

impl TraceHandler for AssessHandler<'_> {
    fn on_trace(&mut self, addr: &Address, callee: &GenFn, args: Vec<Value>) -> Result<Value, GFIError> {
        if !self.visited.insert(addr.clone()) {
            return Err(GFIError::AddressCollision {
                address: addr.clone(),
            });
        }
        let key = self.key.fold_in(self.sites);
        self.sites += 1;
        let sub = self.choices.get_submap(addr);
        let (score, retval) = callee.assess(key, &args, &sub).map_err(|e| e.at(addr))?;
        trace!("assess {} ~ {}: score {}", addr, callee.name(), score);
        self.score = (&self.score + &score)?;
        Ok(retval)
    }
}

pub struct UpdateHandler<'a> {
    rec: Recorder,
    prev: &'a Trace,
    constraints: &'a ChoiceMap,
    weight: Scalar,
    discard: ChoiceMap,
}

impl TraceHandler for UpdateHandler<'_> {
    fn on_trace(&mut self, addr: &Address, callee: &GenFn, args: Vec<Value>) -> Result<Value, GFIError> {
        let key = self.rec.enter(addr)?;
        let constraints = self.constraints.get_submap(addr);
        // A site whose callee changed starts over: the old sub-trace is
        // dropped as if unvisited and the new callee generates afresh.
        let prev = match self.prev.subtrace(addr) {
            Some(old) if !old.get_gen_fn().same_as(callee) => {
                trace!("update {} ~ {}: callee changed", addr, callee.name());
                self.weight = (&self.weight - old.score())?;
                self.discard.insert_submap(addr, old.get_choices())?;
                None
            }
            other => other,
        };
        let sub = match prev {
            Some(old) if constraints.is_empty() && old.get_args() == args.as_slice() => {
                trace!("update {} ~ {}: reused", addr, callee.name());
                old.clone()
            }
            Some(old) => {
                let (sub, w, discard) = callee
                    .update(key, old, &args, &constraints)
                    .map_err(|e| e.at(addr))?;
                trace!("update {} ~ {}: weight {}", addr, callee.name(), w);
                self.weight = (&self.weight + &w)?;
                self.discard.insert_submap(addr, &discard)?;
                sub
            }
            None => {
                let (sub, w) = callee
                    .generate(key, &args, &constraints)
                    .map_err(|e| e.at(addr))?;
                trace!("update {} ~ {}: new site, weight {}", addr, callee.name(), w);
                self.weight = (&self.weight + &w)?;
                sub
            }
        };
        self.rec.record(addr, sub)
    }
}

impl UpdateHandler<'_> {
    /// Account for old sites the new execution never visited.
    fn drop_unvisited(&mut self) -> Result<(), GFIError> {
        for (addr, old) in self.prev.subtraces() {
            if !self.rec.visited.contains(addr) {
                self.weight = (&self.weight - old.score())?;
                self.discard.insert_submap(addr, old.get_choices())?;
            }
        }
        Ok(())
    }
}

impl GenerativeFunction for Program {
    fn name(&self) -> String {
        self.label().to_string()
    }

    fn simulate(&self, key: PrngKey, args: &[Value]) -> Result<Trace, GFIError> {
        let mut handler = SimulateHandler {
            rec: Recorder::new(key),
        };
        let retval = execute(self, args, &mut handler)?;
        Ok(handler.rec.finish(self, args, retval))
    }

    fn generate(
        &self,
        key: PrngKey,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar), GFIError> {
        let mut handler = GenerateHandler {
            rec: Recorder::new(key),
            constraints,
            weight: Scalar::constant(0.0),
        };
        let retval = execute(self, args, &mut handler)?;
        let weight = handler.weight;
        Ok((handler.rec.finish(self, args, retval), weight))
    }

    fn assess(
        &self,
        key: PrngKey,
        args: &[Value],
        choices: &ChoiceMap,
    ) -> Result<(Scalar, Value), GFIError> {
        let mut handler = AssessHandler {
            key,
            sites: 0,
            visited: HashSet::new(),
            choices,
            score: Scalar::constant(0.0),
        };
        let retval = execute(self, args, &mut handler)?;
        Ok((handler.score, retval))
    }

    fn update(
        &self,
        key: PrngKey,
        trace: &Trace,
        args: &[Value],
        constraints: &ChoiceMap,
    ) -> Result<(Trace, Scalar, ChoiceMap), GFIError> {
        let mut handler = UpdateHandler {
            rec: Recorder::new(key),
            prev: trace,
            constraints,
            weight: Scalar::constant(0.0),
            discard: ChoiceMap::new(),
        };
        let retval = execute(self, args, &mut handler)?;
        handler.drop_unvisited()?;
        let UpdateHandler {
            rec,
            weight,
            discard,
            ..
        } = handler;
        Ok((rec.finish(self, args, retval), weight, discard))
    }

    fn is_reparameterized(&self) -> bool {
        self.callees().iter().all(|c| c.is_reparameterized())
    }
}
