#![allow(dead_code)]

use std::f64::consts::PI;

use genvi::{
    lit, normal_reparam, s, uniform, var, ChoiceMap, ImportanceSampler, Marginal, Program, Value,
};

/// `x, y ~ N(0, 10)`, `z ~ N(x^2 + y^2, 0.1 + (x^2 + y^2) / 100)`.
pub fn cone_model() -> Program {
    Program::builder("cone")
        .sample("x", normal_reparam(), vec![lit(0.0), lit(10.0)])
        .sample("y", normal_reparam(), vec![lit(0.0), lit(10.0)])
        .bind("rs", var("x").powi(2) + var("y").powi(2))
        .sample(
            "z",
            normal_reparam(),
            vec![var("rs"), 0.1 + var("rs") / 100.0],
        )
        .build()
}

/// A ring around `sqrt(z)` with an auxiliary angle `u`; `phi` holds the two
/// log scales.
pub fn ring_family() -> Program {
    Program::builder("ring")
        .param("data")
        .param("phi")
        .bind("z", var("data").get("z"))
        .sample("u", uniform(), vec![])
        .bind("theta", 2.0 * PI * var("u"))
        .sample(
            "x",
            normal_reparam(),
            vec![
                var("z").sqrt() * var("theta").cos(),
                var("phi").index(0).exp(),
            ],
        )
        .sample(
            "y",
            normal_reparam(),
            vec![
                var("z").sqrt() * var("theta").sin(),
                var("phi").index(1).exp(),
            ],
        )
        .build()
}

/// The ring family marginalised over `u`.
pub fn ring_marginal(particles: usize) -> Marginal {
    Marginal::new(
        s!(x) | s!(y),
        ring_family(),
        ImportanceSampler::new(particles).unwrap(),
    )
}

pub fn cone_data() -> ChoiceMap {
    ChoiceMap::from_pairs([("z", 5.0)]).unwrap()
}

/// Proposal arguments `(data, phi)` with constant parameters.
pub fn family_args(data: &ChoiceMap, phi: &[f64]) -> Vec<Value> {
    vec![
        Value::Map(data.clone()),
        Value::Tuple(phi.iter().map(|&p| Value::from(p)).collect()),
    ]
}

/// `x ~ N(0, 1)`, `y ~ N(x, 1)`.
pub fn gaussian_model() -> Program {
    Program::builder("gaussian")
        .sample("x", normal_reparam(), vec![lit(0.0), lit(1.0)])
        .sample("y", normal_reparam(), vec![var("x"), lit(1.0)])
        .build()
}

/// `x ~ N(phi_0, exp(phi_1))`.
pub fn gaussian_guide() -> Program {
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

pub fn mean_and_standard_error(values: &[f64]) -> (f64, f64) {
    let (mean, variance) = genvi::utils::mean_and_variance(values);
    (mean, (variance / values.len() as f64).sqrt())
}
