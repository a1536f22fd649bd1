//! Ancestor selection for resampling.
//!
//! Both schemes select ancestor `i` with expected count
//! `count * weights[i] / sum(weights)` and never select a zero-weight
//! ancestor.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PfError, PfResult};

/// Resampling scheme used within each partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingScheme {
    /// One uniform offset, evenly spaced pointers. Low variance.
    #[default]
    Systematic,
    /// Independent weighted draws with replacement.
    Multinomial,
}

/// Draws `count` ancestor indices into `weights`.
///
/// Returns an empty vector when `count` is 0 or no weight is positive.
pub fn draw<R: Rng + ?Sized>(
    scheme: ResamplingScheme,
    weights: &[f64],
    count: usize,
    rng: &mut R,
) -> PfResult<Vec<usize>> {
    match scheme {
        ResamplingScheme::Systematic => Ok(systematic(weights, count, rng)),
        ResamplingScheme::Multinomial => multinomial(weights, count, rng),
    }
}

/// Systematic resampling.
#[allow(clippy::cast_precision_loss)]
pub fn systematic<R: Rng + ?Sized>(weights: &[f64], count: usize, rng: &mut R) -> Vec<usize> {
    let total: f64 = weights.iter().sum();
    let Some(last_positive) = weights.iter().rposition(|w| *w > 0.0) else {
        return Vec::new();
    };
    if count == 0 || total <= 0.0 {
        return Vec::new();
    }

    let step = total / count as f64;
    let offset = rng.gen::<f64>() * step;

    let mut out = Vec::with_capacity(count);
    let mut idx = 0;
    let mut cumulative = weights[0];
    for k in 0..count {
        let pointer = offset + k as f64 * step;
        // Stopping at the last positive weight absorbs rounding at the top end.
        while pointer >= cumulative && idx < last_positive {
            idx += 1;
            cumulative += weights[idx];
        }
        out.push(idx);
    }
    out
}

/// Multinomial resampling.
pub fn multinomial<R: Rng + ?Sized>(weights: &[f64], count: usize, rng: &mut R) -> PfResult<Vec<usize>> {
    if count == 0 || !weights.iter().any(|w| *w > 0.0) {
        return Ok(Vec::new());
    }
    let dist = WeightedIndex::<f64>::new(weights)
        .map_err(|e| PfError::internal(format!("invalid resampling weights: {e}")))?;
    Ok((0..count).map(|_| dist.sample(rng)).collect())
}
