//! The composable program representation.
//!
//! A [`Program`] is a flat list of statements: deterministic bindings,
//! traced invocations of other generative functions at named addresses,
//! branches, and a return. Programs are built with [`ProgramBuilder`] and
//! interpreted by the handlers in [`crate::handlers`].

use std::collections::HashMap;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use crate::core::address::Address;
use crate::core::gfi::GenFn;
use crate::core::value::Value;
use crate::error::GFIError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Powi(i32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
}

/// Deterministic expressions over [`Value`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Leaf of a choice-map value.
    Get(Box<Expr>, Address),
    /// Element of a tuple value.
    Index(Box<Expr>, usize),
    Tuple(Vec<Expr>),
    /// `if cond then a else b`; only the taken arm is evaluated.
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Const(value.into())
}

pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    Expr::Tuple(items)
}

pub fn select(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::Select(Box::new(cond), Box::new(then), Box::new(otherwise))
}

impl Expr {
    fn unary(self, op: UnaryOp) -> Expr {
        Expr::Unary(op, Box::new(self))
    }

    fn binary(self, op: BinaryOp, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(self), Box::new(rhs))
    }

    pub fn exp(self) -> Expr {
        self.unary(UnaryOp::Exp)
    }

    pub fn ln(self) -> Expr {
        self.unary(UnaryOp::Ln)
    }

    pub fn sqrt(self) -> Expr {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn sin(self) -> Expr {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(self) -> Expr {
        self.unary(UnaryOp::Cos)
    }

    pub fn powi(self, n: i32) -> Expr {
        self.unary(UnaryOp::Powi(n))
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, rhs.into())
    }

    pub fn get(self, addr: impl Into<Address>) -> Expr {
        Expr::Get(Box::new(self), addr.into())
    }

    pub fn index(self, i: usize) -> Expr {
        Expr::Index(Box::new(self), i)
    }

    /// Evaluate against `env`.
    pub fn eval(&self, env: &Env) -> Result<Value, GFIError> {
        match self {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Var(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| GFIError::UnboundVariable(name.clone())),
            Expr::Unary(op, e) => {
                let x = e.eval(env)?.to_real()?;
                let y = match op {
                    UnaryOp::Neg => -x,
                    UnaryOp::Exp => x.exp(),
                    UnaryOp::Ln => x.ln(),
                    UnaryOp::Sqrt => x.sqrt(),
                    UnaryOp::Sin => x.sin(),
                    UnaryOp::Cos => x.cos(),
                    UnaryOp::Powi(n) => x.powi(*n),
                }?;
                Ok(Value::Real(y))
            }
            Expr::Binary(op, a, b) => {
                let a = a.eval(env)?.to_real()?;
                let b = b.eval(env)?.to_real()?;
                Ok(match op {
                    BinaryOp::Add => Value::Real((a + b)?),
                    BinaryOp::Sub => Value::Real((a - b)?),
                    BinaryOp::Mul => Value::Real((a * b)?),
                    BinaryOp::Div => Value::Real((a / b)?),
                    BinaryOp::Lt => Value::Bool(a.value() < b.value()),
                })
            }
            Expr::Get(e, addr) => {
                let map = e.eval(env)?;
                map.as_map()?
                    .get(addr)
                    .cloned()
                    .ok_or_else(|| GFIError::IncompleteChoiceMap {
                        address: addr.clone(),
                    })
            }
            Expr::Index(e, i) => {
                let v = e.eval(env)?;
                let items = v.as_tuple()?;
                items.get(*i).cloned().ok_or_else(|| GFIError::TypeMismatch {
                    expected: "tuple with enough elements",
                    got: format!("tuple of length {}", items.len()),
                })
            }
            Expr::Tuple(items) => Ok(Value::Tuple(
                items
                    .iter()
                    .map(|e| e.eval(env))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Select(cond, then, otherwise) => {
                if cond.eval(env)?.as_bool()? {
                    then.eval(env)
                } else {
                    otherwise.eval(env)
                }
            }
        }
    }
}

impl From<f64> for Expr {
    fn from(x: f64) -> Self {
        lit(x)
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Const(v)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.unary(UnaryOp::Neg)
    }
}

macro_rules! expr_binop {
    ($tr:ident, $method:ident, $op:expr) => {
        impl $tr<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                self.binary($op, rhs)
            }
        }

        impl $tr<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                self.binary($op, lit(rhs))
            }
        }

        impl $tr<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                lit(self).binary($op, rhs)
            }
        }
    };
}

expr_binop!(Add, add, BinaryOp::Add);
expr_binop!(Sub, sub, BinaryOp::Sub);
expr_binop!(Mul, mul, BinaryOp::Mul);
expr_binop!(Div, div, BinaryOp::Div);

/// Variable bindings of one program execution.
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: HashMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), value);
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let(String, Expr),
    /// Invoke `callee` at `addr`, namespacing its choices under `addr`.
    Trace {
        addr: Address,
        callee: GenFn,
        args: Vec<Expr>,
        bind: Option<String>,
    },
    Branch {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Return(Expr),
}

/// A composite generative function. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Program {
    name: Arc<str>,
    params: Arc<[String]>,
    body: Arc<[Stmt]>,
}

impl Program {
    pub fn builder(name: &str) -> ProgramBuilder {
        ProgramBuilder {
            name: name.to_string(),
            params: Vec::new(),
            body: Block::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &[Stmt] {
        &self.body
    }

    /// Identity of the built program; clones share it.
    pub fn same_as(&self, other: &Program) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    /// Every callee reachable from the body, through both arms of each branch.
    pub fn callees(&self) -> Vec<&GenFn> {
        fn walk<'a>(stmts: &'a [Stmt], out: &mut Vec<&'a GenFn>) {
            for stmt in stmts {
                match stmt {
                    Stmt::Trace { callee, .. } => out.push(callee),
                    Stmt::Branch {
                        then, otherwise, ..
                    } => {
                        walk(then, out);
                        walk(otherwise, out);
                    }
                    Stmt::Let(..) | Stmt::Return(_) => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.body, &mut out);
        out
    }
}

/// A statement list under construction, used for program bodies and
/// branch arms.
#[derive(Debug, Clone, Default)]
pub struct Block {
    stmts: Vec<Stmt>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, expr: impl Into<Expr>) -> Self {
        self.stmts.push(Stmt::Let(name.to_string(), expr.into()));
        self
    }

    /// Trace `callee` at address `name` and bind its value to the variable `name`.
    pub fn sample(self, name: &str, callee: impl Into<GenFn>, args: Vec<Expr>) -> Self {
        self.call(Some(name), name, callee, args)
    }

    /// Trace `callee` at `addr`, optionally binding its return value.
    pub fn call(
        mut self,
        bind: Option<&str>,
        addr: impl Into<Address>,
        callee: impl Into<GenFn>,
        args: Vec<Expr>,
    ) -> Self {
        self.stmts.push(Stmt::Trace {
            addr: addr.into(),
            callee: callee.into(),
            args,
            bind: bind.map(str::to_string),
        });
        self
    }

    pub fn branch(mut self, cond: Expr, then: Block, otherwise: Block) -> Self {
        self.stmts.push(Stmt::Branch {
            cond,
            then: then.stmts,
            otherwise: otherwise.stmts,
        });
        self
    }

    pub fn returns(mut self, expr: impl Into<Expr>) -> Self {
        self.stmts.push(Stmt::Return(expr.into()));
        self
    }
}

pub struct ProgramBuilder {
    name: String,
    params: Vec<String>,
    body: Block,
}

impl ProgramBuilder {
    pub fn param(mut self, name: &str) -> Self {
        self.params.push(name.to_string());
        self
    }

    pub fn bind(mut self, name: &str, expr: impl Into<Expr>) -> Self {
        self.body = self.body.bind(name, expr);
        self
    }

    pub fn sample(mut self, name: &str, callee: impl Into<GenFn>, args: Vec<Expr>) -> Self {
        self.body = self.body.sample(name, callee, args);
        self
    }

    pub fn call(
        mut self,
        bind: Option<&str>,
        addr: impl Into<Address>,
        callee: impl Into<GenFn>,
        args: Vec<Expr>,
    ) -> Self {
        self.body = self.body.call(bind, addr, callee, args);
        self
    }

    pub fn branch(mut self, cond: Expr, then: Block, otherwise: Block) -> Self {
        self.body = self.body.branch(cond, then, otherwise);
        self
    }

    pub fn returns(mut self, expr: impl Into<Expr>) -> Self {
        self.body = self.body.returns(expr);
        self
    }

    pub fn build(self) -> Program {
        Program {
            name: self.name.into(),
            params: self.params.into(),
            body: self.body.stmts.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::choice_map::ChoiceMap;
    use crate::distributions::normal;
    use crate::scalar::Parameters;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_arithmetic_and_gradients() {
        let params = Parameters::new(&[2.0]).unwrap();
        let mut env = Env::new();
        env.set("a", Value::Real(params.scalars()[0].clone()));

        let e = (var("a").powi(2) + 1.0).sqrt() * 2.0;
        let v = e.eval(&env).unwrap().to_real().unwrap();
        assert_abs_diff_eq!(v.value(), 2.0 * 5f64.sqrt(), epsilon = 1e-12);
        // d/da 2 sqrt(a^2 + 1) = 2a / sqrt(a^2 + 1)
        assert_abs_diff_eq!(
            params.gradient(&v).unwrap()[0],
            4.0 / 5f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_structured_values() {
        let data = ChoiceMap::from_pairs([("z", 5.0)]).unwrap();
        let mut env = Env::new();
        env.set("data", Value::Map(data));
        env.set("phi", Value::Tuple(vec![Value::from(0.5), Value::from(-1.0)]));

        let z = var("data").get("z").eval(&env).unwrap();
        assert_eq!(z, Value::from(5.0));
        let second = var("phi").index(1).eval(&env).unwrap();
        assert_eq!(second, Value::from(-1.0));

        let picked = select(var("z").lt(1.0), lit(1.0), lit(2.0));
        env.set("z", z);
        assert_eq!(picked.eval(&env).unwrap(), Value::from(2.0));

        assert!(matches!(
            var("data").get("w").eval(&env),
            Err(GFIError::IncompleteChoiceMap { .. })
        ));
        assert!(matches!(
            var("phi").index(4).eval(&env),
            Err(GFIError::TypeMismatch { .. })
        ));
        assert_eq!(
            var("nope").eval(&env),
            Err(GFIError::UnboundVariable("nope".to_string()))
        );
    }

    #[test]
    fn test_builder_collects_callees() {
        let p = Program::builder("p")
            .param("flag")
            .branch(
                var("flag"),
                Block::new().sample("a", normal(), vec![lit(0.0), lit(1.0)]),
                Block::new().sample("b", normal(), vec![lit(0.0), lit(1.0)]),
            )
            .returns(var("flag"))
            .build();
        assert_eq!(p.label(), "p");
        assert_eq!(p.params(), ["flag".to_string()]);
        assert_eq!(p.callees().len(), 2);
        assert_eq!(p.body().len(), 2);

        let rebuilt = Program::builder("p").param("flag").build();
        assert!(p.same_as(&p.clone()));
        assert!(!p.same_as(&rebuilt));
    }
}
