//! Differentiable reals on top of candle.
//!
//! A [`Scalar`] is either a plain constant or a rank-0 candle [`Tensor`] that
//! belongs to the autograd graph of some trainable [`Parameters`]. Constants
//! never touch candle, so the bulk of the arithmetic inside a model stays on
//! `f64`. As soon as one operand is tracked the operation is recorded on the
//! graph, and [`Parameters::gradient`] reads the result back through
//! `backward()`.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use candle_core::{Device, Tensor, Var};
use nalgebra::DVector;

use crate::error::GFIError;

#[derive(Clone, Debug)]
pub struct Scalar {
    value: f64,
    node: Option<Tensor>,
}

impl Scalar {
    pub fn constant(value: f64) -> Self {
        Self { value, node: None }
    }

    fn from_tensor(node: Tensor) -> Result<Self, GFIError> {
        Ok(Self {
            value: node.to_scalar::<f64>()?,
            node: Some(node),
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// No parameter gradient flows through this scalar.
    pub fn is_constant(&self) -> bool {
        self.node.is_none()
    }

    /// The graph node, lifting constants to a fresh rank-0 tensor.
    pub fn tensor(&self) -> Result<Tensor, GFIError> {
        match &self.node {
            Some(t) => Ok(t.clone()),
            None => Ok(Tensor::new(self.value, &Device::Cpu)?),
        }
    }

    fn unary(
        &self,
        f: impl Fn(f64) -> f64,
        op: impl Fn(&Tensor) -> candle_core::Result<Tensor>,
    ) -> Result<Self, GFIError> {
        match &self.node {
            None => Ok(Scalar::constant(f(self.value))),
            Some(t) => Scalar::from_tensor(op(t)?),
        }
    }

    fn binary(
        &self,
        rhs: &Scalar,
        f: impl Fn(f64, f64) -> f64,
        op: impl Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
    ) -> Result<Self, GFIError> {
        if self.is_constant() && rhs.is_constant() {
            return Ok(Scalar::constant(f(self.value, rhs.value)));
        }
        Scalar::from_tensor(op(&self.tensor()?, &rhs.tensor()?)?)
    }

    pub fn exp(&self) -> Result<Self, GFIError> {
        self.unary(f64::exp, |t| t.exp())
    }

    pub fn ln(&self) -> Result<Self, GFIError> {
        self.unary(f64::ln, |t| t.log())
    }

    pub fn sqrt(&self) -> Result<Self, GFIError> {
        self.unary(f64::sqrt, |t| t.sqrt())
    }

    pub fn sin(&self) -> Result<Self, GFIError> {
        self.unary(f64::sin, |t| t.sin())
    }

    pub fn cos(&self) -> Result<Self, GFIError> {
        self.unary(f64::cos, |t| t.cos())
    }

    pub fn square(&self) -> Result<Self, GFIError> {
        self.unary(|x| x * x, |t| t.sqr())
    }

    /// Integer power by repeated products; candle's `powf` goes through
    /// `ln`, which is undefined for negative bases.
    pub fn powi(&self, n: i32) -> Result<Self, GFIError> {
        if self.is_constant() {
            return Ok(Scalar::constant(self.value.powi(n)));
        }
        let mut acc = Scalar::constant(1.0);
        for _ in 0..n.unsigned_abs() {
            acc = (&acc * self)?;
        }
        if n < 0 {
            1.0 / acc
        } else {
            Ok(acc)
        }
    }

    pub fn sum<I: IntoIterator<Item = Scalar>>(items: I) -> Result<Self, GFIError> {
        items
            .into_iter()
            .try_fold(Scalar::constant(0.0), |acc, x| &acc + &x)
    }
}

/// Scalars compare by value.
impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::constant(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Neg for &Scalar {
    type Output = Result<Scalar, GFIError>;
    fn neg(self) -> Self::Output {
        self.unary(|x| -x, |t| t.neg())
    }
}

impl Neg for Scalar {
    type Output = Result<Scalar, GFIError>;
    fn neg(self) -> Self::Output {
        -&self
    }
}

macro_rules! scalar_binop {
    ($tr:ident, $method:ident, $f:expr) => {
        impl<'a> $tr<&'a Scalar> for &'a Scalar {
            type Output = Result<Scalar, GFIError>;
            fn $method(self, rhs: &Scalar) -> Self::Output {
                self.binary(rhs, $f, |a, b| a.$method(b))
            }
        }

        impl $tr<Scalar> for Scalar {
            type Output = Result<Scalar, GFIError>;
            fn $method(self, rhs: Scalar) -> Self::Output {
                (&self).$method(&rhs)
            }
        }

        impl<'a> $tr<&'a Scalar> for Scalar {
            type Output = Result<Scalar, GFIError>;
            fn $method(self, rhs: &Scalar) -> Self::Output {
                (&self).$method(rhs)
            }
        }

        impl $tr<f64> for Scalar {
            type Output = Result<Scalar, GFIError>;
            fn $method(self, rhs: f64) -> Self::Output {
                (&self).$method(&Scalar::constant(rhs))
            }
        }

        impl $tr<f64> for &Scalar {
            type Output = Result<Scalar, GFIError>;
            fn $method(self, rhs: f64) -> Self::Output {
                self.$method(&Scalar::constant(rhs))
            }
        }

        impl $tr<Scalar> for f64 {
            type Output = Result<Scalar, GFIError>;
            fn $method(self, rhs: Scalar) -> Self::Output {
                (&Scalar::constant(self)).$method(&rhs)
            }
        }
    };
}

scalar_binop!(Add, add, |a, b| a + b);
scalar_binop!(Sub, sub, |a, b| a - b);
scalar_binop!(Mul, mul, |a, b| a * b);
scalar_binop!(Div, div, |a, b| a / b);

/// Log-sum-exp stabilised by the largest value; `-inf` when every input is
/// `-inf`. Entries at `-inf` contribute neither value nor gradient.
pub fn logsumexp(xs: &[Scalar]) -> Result<Scalar, GFIError> {
    let values: Vec<f64> = xs.iter().map(Scalar::value).collect();
    let mx = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !mx.is_finite() || xs.iter().all(Scalar::is_constant) {
        return Ok(Scalar::constant(crate::utils::logsumexp(&values)));
    }
    let shifted = xs
        .iter()
        .filter(|x| x.value() > f64::NEG_INFINITY)
        .map(|x| (x - mx)?.exp())
        .collect::<Result<Vec<_>, _>>()?;
    Scalar::sum(shifted)?.ln()? + mx
}

/// Trainable parameters as candle variables.
pub struct Parameters {
    vars: Vec<Var>,
    scalars: Vec<Scalar>,
}

impl Parameters {
    pub fn new(values: &[f64]) -> Result<Self, GFIError> {
        let vars = values
            .iter()
            .map(|&v| Var::new(v, &Device::Cpu))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let scalars = vars
            .iter()
            .zip(values)
            .map(|(var, &value)| Scalar {
                value,
                node: Some(var.as_tensor().clone()),
            })
            .collect();
        Ok(Self { vars, scalars })
    }

    /// The parameters as tracked scalars.
    pub fn scalars(&self) -> &[Scalar] {
        &self.scalars
    }

    /// `d output / d params`; parameters `output` does not depend on get `0`.
    pub fn gradient(&self, output: &Scalar) -> Result<DVector<f64>, GFIError> {
        let mut grad = DVector::zeros(self.vars.len());
        let Some(node) = &output.node else {
            return Ok(grad);
        };
        let grads = node.backward()?;
        for (i, var) in self.vars.iter().enumerate() {
            if let Some(g) = grads.get(var.as_tensor()) {
                grad[i] = g.to_scalar::<f64>()?;
            }
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn finite_difference(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-6;
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn test_arithmetic_gradients() {
        let params = Parameters::new(&[1.5, -0.7]).unwrap();
        let (a, b) = (&params.scalars()[0], &params.scalars()[1]);

        let y = ((a * b).unwrap() + (a / b).unwrap()).unwrap();
        let g = params.gradient(&y).unwrap();
        assert_abs_diff_eq!(g[0], b.value() + 1.0 / b.value(), epsilon = 1e-12);
        assert_abs_diff_eq!(
            g[1],
            a.value() - a.value() / (b.value() * b.value()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_unary_gradients() {
        let x0 = 0.8;
        let params = Parameters::new(&[x0]).unwrap();
        let x = &params.scalars()[0];
        let f = |x: f64| (x.sin() * x.exp()).sqrt() + x.cos().powi(3) - x.ln();

        let y = (x.sin().unwrap() * x.exp().unwrap()).unwrap().sqrt().unwrap();
        let y = (y + x.cos().unwrap().powi(3).unwrap()).unwrap();
        let y = (y - x.ln().unwrap()).unwrap();
        assert_abs_diff_eq!(y.value(), f(x0), epsilon = 1e-12);
        assert_abs_diff_eq!(
            params.gradient(&y).unwrap()[0],
            finite_difference(f, x0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_powi_of_negative_base() {
        let params = Parameters::new(&[-2.0]).unwrap();
        let x = &params.scalars()[0];
        let y = x.powi(2).unwrap();
        assert_abs_diff_eq!(y.value(), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(params.gradient(&y).unwrap()[0], -4.0, epsilon = 1e-12);

        let inv = x.powi(-1).unwrap();
        assert_abs_diff_eq!(inv.value(), -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(params.gradient(&inv).unwrap()[0], -0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_constants_stay_off_the_graph() {
        let c = ((Scalar::constant(2.0) * Scalar::constant(3.0)).unwrap() + 1.0).unwrap();
        assert_eq!(c.value(), 7.0);
        assert!(c.is_constant());

        let params = Parameters::new(&[0.0, 1.0, 2.0]).unwrap();
        assert_eq!(params.gradient(&c).unwrap(), DVector::zeros(3));

        let tracked = (&params.scalars()[1] * 2.0).unwrap();
        assert!(!tracked.is_constant());
        assert_eq!(
            params.gradient(&tracked).unwrap(),
            DVector::from_vec(vec![0.0, 2.0, 0.0])
        );
    }

    #[test]
    fn test_logsumexp() {
        let params = Parameters::new(&[0.1, 2.0, -1.0]).unwrap();
        let y = logsumexp(params.scalars()).unwrap();
        let expected = (0.1f64.exp() + 2.0f64.exp() + (-1.0f64).exp()).ln();
        assert_abs_diff_eq!(y.value(), expected, epsilon = 1e-12);

        let g = params.gradient(&y).unwrap();
        assert_abs_diff_eq!(g.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g[1], (2.0 - expected).exp(), epsilon = 1e-12);

        let all_neg_inf = logsumexp(&vec![Scalar::constant(f64::NEG_INFINITY); 2]).unwrap();
        assert_eq!(all_neg_inf.value(), f64::NEG_INFINITY);

        let mixed = [
            params.scalars()[0].clone(),
            Scalar::constant(f64::NEG_INFINITY),
        ];
        let y = logsumexp(&mixed).unwrap();
        assert_abs_diff_eq!(y.value(), 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(params.gradient(&y).unwrap()[0], 1.0, epsilon = 1e-12);
    }
}
