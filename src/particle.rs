//! Weighted hypothesis samples.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signature::ObservabilitySignature;

/// Identifier of a particle, unique within one filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleId(u64);

impl ParticleId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A weighted sample owning its world exclusively.
///
/// Invariants:
/// - `weight` is finite and never negative.
/// - `timestamp` never decreases.
#[derive(Debug, Clone)]
pub struct Particle<W> {
    id: ParticleId,
    ancestor: Option<ParticleId>,
    weight: f64,
    world: W,
    timestamp: u64,
    signature: ObservabilitySignature,
}

impl<W> Particle<W> {
    /// Creates a particle with unit weight.
    pub fn new(id: ParticleId, world: W, signature: ObservabilitySignature, timestamp: u64) -> Self {
        Self {
            id,
            ancestor: None,
            weight: 1.0,
            world,
            timestamp,
            signature,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ParticleId {
        self.id
    }

    /// The particle this one was resampled from, if any.
    #[must_use]
    pub const fn ancestor(&self) -> Option<ParticleId> {
        self.ancestor
    }

    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Zero-weight particles are logically dead until the next resample drops them.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.weight > 0.0
    }

    #[must_use]
    pub const fn world(&self) -> &W {
        &self.world
    }

    pub(crate) fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub const fn signature(&self) -> &ObservabilitySignature {
        &self.signature
    }

    pub(crate) fn scale_weight(&mut self, likelihood: f64) {
        debug_assert!(likelihood.is_finite() && likelihood >= 0.0);
        self.weight *= likelihood;
    }

    pub(crate) fn set_signature(&mut self, signature: ObservabilitySignature) {
        self.signature = signature;
    }

    pub(crate) fn advance_to(&mut self, timestamp: u64) {
        self.timestamp = self.timestamp.max(timestamp);
    }
}

impl<W: Clone> Particle<W> {
    /// A resampled copy with its own clone of the world.
    pub(crate) fn descendant(&self, id: ParticleId, weight: f64) -> Self {
        Self {
            id,
            ancestor: Some(self.id),
            weight,
            world: self.world.clone(),
            timestamp: self.timestamp,
            signature: self.signature.clone(),
        }
    }
}
