use num_traits::ToPrimitive;

use crate::core::address::Address;
use crate::core::gfi::Trace;

/// Numerically stable `ln(sum(exp(xs)))`; `-inf` for an empty or all `-inf` input.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let mx = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !mx.is_finite() {
        return mx;
    }
    mx + xs.iter().map(|x| (x - mx).exp()).sum::<f64>().ln()
}

/// Sample mean and (population) variance; `(0, 0)` for an empty slice.
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Mean and variance of the numeric value at `addr` across traces.
/// Traces without a numeric choice at `addr` are skipped.
pub fn compute_mean_and_variance(traces: &[Trace], addr: &Address) -> (f64, f64) {
    let values: Vec<f64> = traces
        .iter()
        .filter_map(|t| t.get(addr).and_then(|v| v.to_f64()))
        .collect();
    mean_and_variance(&values)
}
