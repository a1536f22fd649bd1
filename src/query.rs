//! Queries and their latest answers.
//!
//! A query is a read-only argument spec (the quantity to read from each
//! particle's world) paired with the histogram of its latest answer. The
//! histogram is overwritten on every answer call.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::evidence::instantiate_time_step;
use crate::histogram::Histogram;

/// Position of a query within its registered template list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(usize);

impl QueryId {
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A query instantiated for one time step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    id: QueryId,
    arg_spec: String,
    histogram: Histogram,
}

impl Query {
    pub fn new(id: QueryId, arg_spec: impl Into<String>) -> Self {
        Self {
            id,
            arg_spec: arg_spec.into(),
            histogram: Histogram::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> QueryId {
        self.id
    }

    /// The quantity this query observes, e.g. `Position(@3)`.
    #[must_use]
    pub fn arg_spec(&self) -> &str {
        &self.arg_spec
    }

    /// Histogram from the latest answer call.
    #[must_use]
    pub const fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub(crate) fn set_histogram(&mut self, histogram: Histogram) {
        self.histogram = histogram;
    }

    /// Weighted average of the latest answer, if all outcomes are numeric.
    #[must_use]
    pub fn weighted_mean(&self) -> Option<f64> {
        self.histogram.weighted_mean()
    }

    /// `<arg spec>\t[<outcome>:<probability>]...` with 9-digit probabilities,
    /// entries sorted by outcome.
    #[must_use]
    pub fn format_results(&self) -> String {
        let mut out = self.arg_spec.clone();
        for entry in self.histogram.entries() {
            let _ = write!(out, "\t[{}:{:.9}]", entry.value, entry.probability);
        }
        out
    }
}

/// Registered query strings, instantiated once per time step.
///
/// Instantiations are cached until the time step changes or the cache is
/// invalidated.
#[derive(Debug, Clone, Default)]
pub struct QueryTemplates {
    templates: Vec<String>,
    cache: Option<(u64, Vec<Query>)>,
}

impl QueryTemplates {
    #[must_use]
    pub fn new(templates: Vec<String>) -> Self {
        Self {
            templates,
            cache: None,
        }
    }

    #[must_use]
    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Queries for `time_step`, with empty histograms.
    pub fn for_time_step(&mut self, time_step: u64) -> &[Query] {
        let stale = !matches!(&self.cache, Some((t, _)) if *t == time_step);
        if stale {
            let queries = self
                .templates
                .iter()
                .enumerate()
                .map(|(idx, template)| Query::new(QueryId(idx), instantiate_time_step(template, time_step)))
                .collect();
            self.cache = Some((time_step, queries));
        }
        match &self.cache {
            Some((_, queries)) => queries.as_slice(),
            None => &[],
        }
    }
}
