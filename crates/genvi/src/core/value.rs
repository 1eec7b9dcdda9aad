use std::fmt::{self, Display};

use num_traits::ToPrimitive;

use crate::core::choice_map::ChoiceMap;
use crate::scalar::Scalar;
use crate::error::GFIError;

/// Runtime values flowing through programs: arguments, choices and return
/// values. Reals are [`Scalar`]s so that parameter gradients follow them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Real(Scalar),
    Int(i64),
    Bool(bool),
    Tuple(Vec<Value>),
    Map(ChoiceMap),
}

impl Value {
    pub fn unit() -> Self {
        Value::Tuple(vec![])
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Real(_) => "real",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "choice map",
        }
    }

    fn mismatch(&self, expected: &'static str) -> GFIError {
        GFIError::TypeMismatch {
            expected,
            got: self.kind().to_string(),
        }
    }

    /// Numeric view, promoting integers to constants.
    pub fn to_real(&self) -> Result<Scalar, GFIError> {
        match self {
            Value::Real(x) => Ok(x.clone()),
            Value::Int(i) => Ok(Scalar::constant(*i as f64)),
            other => Err(other.mismatch("real")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, GFIError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_map(&self) -> Result<&ChoiceMap, GFIError> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(other.mismatch("choice map")),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Value], GFIError> {
        match self {
            Value::Tuple(items) => Ok(items),
            other => Err(other.mismatch("tuple")),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Real(x) => write!(f, "{}", x),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Tuple(items) => write!(
                f,
                "({})",
                items
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Map(m) => write!(f, "{}", m),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(Scalar::constant(x))
    }
}

impl From<Scalar> for Value {
    fn from(x: Scalar) -> Self {
        Value::Real(x)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ChoiceMap> for Value {
    fn from(m: ChoiceMap) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Tuple(items)
    }
}

impl ToPrimitive for Value {
    fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(x.value()),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            other => other.to_f64()?.to_i64(),
        }
    }

    fn to_u64(&self) -> Option<u64> {
        self.to_i64()?.to_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(2.5).to_f64(), Some(2.5));
        assert_eq!(Value::from(3i64).to_real().unwrap().value(), 3.0);
        assert_eq!(Value::from(true).to_i64(), Some(1));
        assert!(Value::unit().to_f64().is_none());

        let err = Value::from(true).to_real().unwrap_err();
        assert_eq!(
            err,
            GFIError::TypeMismatch {
                expected: "real",
                got: "bool".to_string()
            }
        );
    }
}
