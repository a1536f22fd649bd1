//! Model-evaluation engine contract.
//!
//! The filter never looks inside a world. Everything it needs (applying
//! evidence, reading query outcomes, computing signatures) goes through
//! this trait. The engine itself is immutable and shared via `Arc` by the
//! filter and the runner.

use std::fmt;

use rand::RngCore;

use crate::error::ModelError;
use crate::evidence::Evidence;
use crate::query::Query;
use crate::signature::ObservabilitySignature;
use crate::value::OutcomeValue;

/// A probabilistic model the particle filter runs over.
///
/// # World ownership
/// Each particle owns its world exclusively. Resampling clones the world,
/// so `World: Clone` must produce an independent copy (no shared interior
/// mutability between clones).
pub trait ModelEngine: Send + Sync {
    /// Per-particle sampled state.
    type World: Clone + fmt::Debug;

    /// Samples a fresh world for time step 0.
    fn sample_initial_world(&self, rng: &mut dyn RngCore) -> Result<Self::World, ModelError>;

    /// Extends `world` up to `time_step` and applies `evidence` to it.
    ///
    /// Returns the relative likelihood of the evidence under the world.
    /// `0.0` marks the world as inconsistent with the evidence. Must fail
    /// with `ModelError::UndefinedEntity` when the evidence names something
    /// the model does not define.
    fn apply(
        &self,
        world: &mut Self::World,
        evidence: &Evidence,
        time_step: u64,
        rng: &mut dyn RngCore,
    ) -> Result<f64, ModelError>;

    /// Reads the outcome of `query` in `world`.
    ///
    /// Only quantities up to the world's latest applied time step are
    /// guaranteed to be readable.
    fn evaluate(&self, world: &Self::World, query: &Query) -> Result<OutcomeValue, ModelError>;

    /// Signature of the world's distinguishable history.
    fn signature(&self, world: &Self::World) -> ObservabilitySignature;

    /// One-line rendering for diagnostics.
    fn describe(&self, world: &Self::World) -> String {
        format!("{world:?}")
    }
}
