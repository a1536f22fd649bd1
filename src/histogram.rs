//! Weighted histograms over query outcomes.
//!
//! A histogram is rebuilt for every answer call by walking a particle
//! population and bucketing each particle's outcome under its weight.
//! The total weight is tracked alongside the buckets so probabilities
//! never need a second pass.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::value::OutcomeValue;

/// Mapping from outcome to accumulated weight.
///
/// Invariant: the sum of bucket weights equals `total_weight()`, which
/// equals the sum of weights passed to `add`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Histogram {
    buckets: BTreeMap<OutcomeValue, f64>,
    total_weight: f64,
}

/// A single histogram entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramEntry {
    pub value: OutcomeValue,
    pub weight: f64,
    pub probability: f64,
}

impl Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to the bucket for `value`.
    ///
    /// Samples with zero (or non-finite) weight are dead and leave no
    /// bucket behind.
    pub fn add(&mut self, value: OutcomeValue, weight: f64) {
        if !(weight.is_finite() && weight > 0.0) {
            return;
        }
        *self.buckets.entry(value).or_insert(0.0) += weight;
        self.total_weight += weight;
    }

    #[must_use]
    pub const fn total_weight(&self) -> f64 {
        self.total_weight
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Accumulated weight of one outcome.
    #[must_use]
    pub fn weight_of(&self, value: &OutcomeValue) -> f64 {
        self.buckets.get(value).copied().unwrap_or(0.0)
    }

    /// Normalized probability of one outcome, `None` when the histogram is empty.
    #[must_use]
    pub fn probability(&self, value: &OutcomeValue) -> Option<f64> {
        if self.total_weight > 0.0 {
            Some(self.weight_of(value) / self.total_weight)
        } else {
            None
        }
    }

    /// Iterates `(outcome, weight)` pairs in outcome order.
    pub fn iter(&self) -> impl Iterator<Item = (&OutcomeValue, f64)> {
        self.buckets.iter().map(|(v, w)| (v, *w))
    }

    /// Entries sorted by outcome, with probabilities.
    #[must_use]
    pub fn entries(&self) -> Vec<HistogramEntry> {
        self.buckets
            .iter()
            .map(|(value, weight)| HistogramEntry {
                value: value.clone(),
                weight: *weight,
                probability: weight / self.total_weight,
            })
            .collect()
    }

    /// Most probable outcome; ties resolve to the smallest outcome.
    #[must_use]
    pub fn mode(&self) -> Option<&OutcomeValue> {
        let mut best: Option<(&OutcomeValue, f64)> = None;
        for (value, weight) in &self.buckets {
            match best {
                Some((_, w)) if *weight <= w => {}
                _ => best = Some((value, *weight)),
            }
        }
        best.map(|(v, _)| v)
    }

    /// Weighted average of the outcomes.
    ///
    /// Returns `None` when the histogram is empty or any outcome has no
    /// numeric value (see [`OutcomeValue::as_f64`]).
    #[must_use]
    pub fn weighted_mean(&self) -> Option<f64> {
        if self.total_weight <= 0.0 {
            return None;
        }
        let mut acc = 0.0;
        for (value, weight) in &self.buckets {
            acc += value.as_f64()? * (weight / self.total_weight);
        }
        Some(acc)
    }

    /// Smallest outcome whose cumulative probability reaches `q`.
    ///
    /// `q` must lie in `[0, 1]`. Uses the outcome order, so the result is
    /// meaningful for numeric outcomes and deterministic for all others.
    #[must_use]
    pub fn weighted_quantile(&self, q: f64) -> Option<&OutcomeValue> {
        if !(0.0..=1.0).contains(&q) || self.total_weight <= 0.0 {
            return None;
        }
        let target = q * self.total_weight;
        let mut cumulative = 0.0;
        let mut last = None;
        for (value, weight) in &self.buckets {
            cumulative += weight;
            last = Some(value);
            if cumulative >= target {
                return Some(value);
            }
        }
        // Rounding can leave the running sum a hair under the total.
        last
    }

    /// Weighted median, shorthand for `weighted_quantile(0.5)`.
    #[must_use]
    pub fn median(&self) -> Option<&OutcomeValue> {
        self.weighted_quantile(0.5)
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.total_weight = 0.0;
    }
}

impl FromIterator<(OutcomeValue, f64)> for Histogram {
    fn from_iter<I: IntoIterator<Item = (OutcomeValue, f64)>>(iter: I) -> Self {
        let mut histogram = Self::new();
        for (value, weight) in iter {
            histogram.add(value, weight);
        }
        histogram
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample() -> Histogram {
        [
            (OutcomeValue::Int(1), 1.0),
            (OutcomeValue::Int(3), 2.0),
            (OutcomeValue::Int(1), 1.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_buckets_accumulate() {
        let h = sample();
        assert_eq!(h.len(), 2);
        assert!((h.weight_of(&OutcomeValue::Int(1)) - 2.0).abs() < 1e-12);
        assert!((h.total_weight() - 4.0).abs() < 1e-12);
        assert_eq!(h.probability(&OutcomeValue::Int(3)), Some(0.5));
    }

    #[test]
    fn test_zero_weight_leaves_no_bucket() {
        let mut h = Histogram::new();
        h.add(OutcomeValue::Int(9), 0.0);
        h.add(OutcomeValue::Int(9), f64::NAN);
        assert!(h.is_empty());
        assert!(h.probability(&OutcomeValue::Int(9)).is_none());
    }

    #[test]
    fn test_weighted_mean() {
        let h = sample();
        assert!((h.weighted_mean().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_mean_non_numeric() {
        let mut h = sample();
        h.add(OutcomeValue::Symbol("x".into()), 1.0);
        assert!(h.weighted_mean().is_none());
        assert!(Histogram::new().weighted_mean().is_none());
    }

    #[test]
    fn test_weighted_mean_bool_counts_true() {
        let h: Histogram = [(OutcomeValue::Bool(true), 3.0), (OutcomeValue::Bool(false), 1.0)]
            .into_iter()
            .collect();
        assert!((h.weighted_mean().unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_quantiles() {
        let h: Histogram = [
            (OutcomeValue::Int(10), 1.0),
            (OutcomeValue::Int(20), 1.0),
            (OutcomeValue::Int(30), 2.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(h.weighted_quantile(0.0), Some(&OutcomeValue::Int(10)));
        assert_eq!(h.weighted_quantile(0.25), Some(&OutcomeValue::Int(10)));
        assert_eq!(h.median(), Some(&OutcomeValue::Int(20)));
        assert_eq!(h.weighted_quantile(0.51), Some(&OutcomeValue::Int(30)));
        assert_eq!(h.weighted_quantile(1.0), Some(&OutcomeValue::Int(30)));
        assert!(h.weighted_quantile(1.5).is_none());
    }

    #[test]
    fn test_mode_prefers_smallest_on_tie() {
        let h: Histogram = [(OutcomeValue::Int(2), 1.0), (OutcomeValue::Int(1), 1.0)]
            .into_iter()
            .collect();
        assert_eq!(h.mode(), Some(&OutcomeValue::Int(1)));
    }

    #[test]
    fn test_entries_sorted() {
        let entries = sample().entries();
        assert_eq!(entries[0].value, OutcomeValue::Int(1));
        assert_eq!(entries[1].value, OutcomeValue::Int(3));
        assert!((entries[0].probability - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_bucket_weights_sum_to_total(samples in prop::collection::vec((0i64..6, 0.0f64..10.0), 0..64)) {
            let expected: f64 = samples.iter().map(|(_, w)| *w).filter(|w| *w > 0.0).sum();
            let h: Histogram = samples
                .into_iter()
                .map(|(v, w)| (OutcomeValue::Int(v), w))
                .collect();
            let bucket_sum: f64 = h.iter().map(|(_, w)| w).sum();
            prop_assert!((bucket_sum - expected).abs() < 1e-9);
            prop_assert!((h.total_weight() - expected).abs() < 1e-9);
        }
    }
}
