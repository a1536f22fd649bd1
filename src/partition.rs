//! Partition manager: groups particles by observability signature.
//!
//! Key invariants:
//! - After `repartition`, every particle index appears in exactly one partition.
//! - A partition id survives a `repartition` only if its signature does.
//! - Ids of vanished signatures are never handed out again.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signature::ObservabilitySignature;

/// Identifier of a live partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(u64);

impl PartitionId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group of particles sharing one signature.
///
/// Members are indices into the population the partition was built from,
/// in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    id: PartitionId,
    signature: ObservabilitySignature,
    members: Vec<usize>,
}

impl Partition {
    #[must_use]
    pub const fn id(&self) -> PartitionId {
        self.id
    }

    #[must_use]
    pub const fn signature(&self) -> &ObservabilitySignature {
        &self.signature
    }

    #[must_use]
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Partition ids created and removed by one `repartition` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepartitionDelta {
    pub created: Vec<PartitionId>,
    pub removed: Vec<PartitionId>,
}

impl RepartitionDelta {
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Maintains the signature to partition mapping over a population.
#[derive(Debug, Default, Clone)]
pub struct PartitionManager {
    partitions: BTreeMap<PartitionId, Partition>,
    by_signature: HashMap<ObservabilitySignature, PartitionId>,
    next_id: u64,
}

impl PartitionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes membership from scratch.
    ///
    /// `signatures` yields the current signature of each particle, in
    /// population order; particle `i` lands in the partition of the `i`-th
    /// signature. Runs in time linear in the population.
    pub fn repartition<'a, I>(&mut self, signatures: I) -> RepartitionDelta
    where
        I: IntoIterator<Item = &'a ObservabilitySignature>,
    {
        let mut by_signature: HashMap<ObservabilitySignature, PartitionId> = HashMap::new();
        let mut partitions: BTreeMap<PartitionId, Partition> = BTreeMap::new();
        let mut created = Vec::new();

        for (idx, signature) in signatures.into_iter().enumerate() {
            let id = match by_signature.get(signature) {
                Some(id) => *id,
                None => {
                    let id = match self.by_signature.get(signature) {
                        Some(existing) => *existing,
                        None => {
                            let id = PartitionId(self.next_id);
                            self.next_id += 1;
                            created.push(id);
                            id
                        }
                    };
                    by_signature.insert(signature.clone(), id);
                    partitions.insert(
                        id,
                        Partition {
                            id,
                            signature: signature.clone(),
                            members: Vec::new(),
                        },
                    );
                    id
                }
            };
            if let Some(partition) = partitions.get_mut(&id) {
                partition.members.push(idx);
            }
        }

        let removed = self
            .partitions
            .keys()
            .filter(|id| !partitions.contains_key(id))
            .copied()
            .collect();

        self.partitions = partitions;
        self.by_signature = by_signature;

        RepartitionDelta { created, removed }
    }

    /// Reports whether every partition holds at least `min_size` particles.
    ///
    /// A failing check indicates weight collapsing into too few branches.
    /// What to do about it is the caller's decision.
    #[must_use]
    pub fn check_partition(&self, min_size: usize) -> bool {
        self.partitions.values().all(|p| p.len() >= min_size)
    }

    #[must_use]
    pub fn get(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: PartitionId) -> bool {
        self.partitions.contains_key(&id)
    }

    /// Id of the partition holding `signature`, if it is live.
    #[must_use]
    pub fn id_of(&self, signature: &ObservabilitySignature) -> Option<PartitionId> {
        self.by_signature.get(signature).copied()
    }

    #[must_use]
    pub const fn partitions(&self) -> &BTreeMap<PartitionId, Partition> {
        &self.partitions
    }

    /// Live partition ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// The partition with the fewest members.
    #[must_use]
    pub fn smallest(&self) -> Option<&Partition> {
        self.partitions.values().min_by_key(|p| p.len())
    }
}
