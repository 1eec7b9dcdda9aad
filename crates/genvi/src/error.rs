//! Error types for generative function interface operations.

use thiserror::Error;

use crate::core::address::Address;

/// Errors that can occur during generative function interface operations.
///
/// Every error is local to the call that raised it. Batched callers
/// (importance sampling, objective estimation) abort the whole batch on the
/// first failing particle instead of dropping it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GFIError {
    /// A choice required by the program's control flow is missing.
    #[error("incomplete choice map: no choice at address {address}")]
    IncompleteChoiceMap { address: Address },

    /// Two sites, or a merge, wrote the same address.
    #[error("address collision at {address}")]
    AddressCollision { address: Address },

    /// A parameter or a value lies outside a distribution's support.
    #[error("invalid support for {distribution}: {reason}")]
    InvalidSupport {
        distribution: &'static str,
        reason: String,
    },

    /// Every importance weight underflowed or is NaN.
    #[error("numeric instability: {reason}")]
    NumericInstability { reason: String },

    /// A value of the wrong kind was supplied.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: &'static str, got: String },

    /// A variable was read before it was bound.
    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    /// Wrong number of arguments supplied to a generative function.
    #[error("{callee} expects {expected} arguments, got {got}")]
    Arity {
        callee: String,
        expected: usize,
        got: usize,
    },

    /// The proposal has a sampling site without a reparameterization.
    #[error("{0} is not reparameterized; pathwise gradients are unavailable")]
    NotReparameterized(String),

    /// A particle count of zero was requested.
    #[error("particle count must be at least 1, got {0}")]
    InvalidParticleCount(usize),

    /// Invalid training configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The autodiff backend failed to build or differentiate a graph.
    #[error("autodiff: {0}")]
    Autodiff(String),
}

impl From<candle_core::Error> for GFIError {
    fn from(e: candle_core::Error) -> Self {
        GFIError::Autodiff(e.to_string())
    }
}

impl GFIError {
    /// Re-address an error raised inside a callee under the call-site address.
    pub fn at(self, prefix: &Address) -> Self {
        match self {
            GFIError::IncompleteChoiceMap { address } => GFIError::IncompleteChoiceMap {
                address: prefix.join(&address),
            },
            GFIError::AddressCollision { address } => GFIError::AddressCollision {
                address: prefix.join(&address),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_prefixing() {
        let err = GFIError::IncompleteChoiceMap {
            address: Address::from("x"),
        };
        let outer = err.at(&Address::from("q"));
        assert_eq!(
            outer,
            GFIError::IncompleteChoiceMap {
                address: Address::Path(vec![Address::from("q"), Address::from("x")])
            }
        );
        assert_eq!(
            outer.to_string(),
            "incomplete choice map: no choice at address q/x"
        );

        let untouched = GFIError::InvalidParticleCount(0).at(&Address::from("q"));
        assert_eq!(untouched, GFIError::InvalidParticleCount(0));
    }
}
