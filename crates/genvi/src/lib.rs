pub mod core;
pub mod distributions;
pub mod error;
pub mod handlers;
pub mod inference;
pub mod ir;
pub mod key;
pub mod scalar;
pub mod utils;

pub use crate::core::address::{Address, Selection};
pub use crate::core::choice_map::ChoiceMap;
pub use crate::core::gfi::{GenFn, GenerativeFunction, Trace};
pub use crate::core::value::Value;
pub use distributions::{bernoulli, normal, normal_reparam, uniform, Distribution};
pub use error::GFIError;
pub use inference::marginal::Marginal;
pub use inference::sir::{ImportanceSampler, SirOutcome, Target};
pub use inference::train::{train, TrainConfig, TrainReport};
pub use inference::vi::{Elbo, IwaeElbo, Objective, ObjectiveEstimate};
pub use ir::{lit, select, tuple, var, Block, Expr, Program, ProgramBuilder};
pub use key::PrngKey;
pub use scalar::{Parameters, Scalar};
