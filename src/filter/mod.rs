//! Partitioned particle filter core.
//!
//! The filter owns the particle population and the partition index over
//! it. One observation step runs `empty_cache`, `take`, `answer`,
//! `repartition` and `resample_partition_and_particles` in that order;
//! decisions are applied per partition with `take_with_partition`.
//!
//! Key invariants:
//! - Weights are finite and non-negative.
//! - Resampling never mixes partitions and conserves each partition's share
//!   of the total weight; afterwards the mean weight is 1.
//! - Every resampled particle owns a fresh clone of its ancestor's world.

/// Ancestor selection schemes.
pub mod resample;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::error::{ModelError, PfResult, ValidationError};
use crate::evidence::Evidence;
use crate::histogram::Histogram;
use crate::model::ModelEngine;
use crate::particle::{Particle, ParticleId};
use crate::partition::{Partition, PartitionId, PartitionManager, RepartitionDelta};
use crate::query::Query;

pub use resample::ResamplingScheme;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: Option<PartitionId>,
    arg_spec: String,
}

/// Outcome of one resampling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResampleReport {
    pub partitions: usize,
    /// Partitions whose particles all had zero weight.
    pub exhausted_partitions: usize,
    /// Whether exhausted partitions were dropped from the population.
    pub dropped_exhausted: bool,
    pub population_before: usize,
    pub population_after: usize,
}

/// Saved population, used to re-run a step.
#[derive(Debug, Clone)]
pub struct FilterCheckpoint<W> {
    particles: Vec<Particle<W>>,
    partitions: PartitionManager,
}

impl<W> FilterCheckpoint<W> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// Particle filter over a model engine.
pub struct ParticleFilter<M: ModelEngine> {
    model: Arc<M>,
    config: FilterConfig,
    rng: StdRng,
    particles: Vec<Particle<M::World>>,
    partitions: PartitionManager,
    cache: HashMap<CacheKey, Histogram>,
    next_id: u64,
}

impl<M: ModelEngine> ParticleFilter<M> {
    /// Samples the initial population and partitions it.
    pub fn new(model: Arc<M>, config: FilterConfig) -> PfResult<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut particles = Vec::with_capacity(config.num_particles);
        let mut next_id = 0;
        for _ in 0..config.num_particles {
            let world = model.sample_initial_world(&mut rng)?;
            let signature = model.signature(&world);
            particles.push(Particle::new(
                ParticleId::new(next_id),
                world,
                signature,
                config.initial_time_step,
            ));
            next_id += 1;
        }

        let mut filter = Self {
            model,
            config,
            rng,
            particles,
            partitions: PartitionManager::new(),
            cache: HashMap::new(),
            next_id,
        };
        filter.repartition();

        debug!(
            particles = filter.particles.len(),
            partitions = filter.partitions.len(),
            "particle filter initialized"
        );
        Ok(filter)
    }

    #[must_use]
    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    #[must_use]
    pub const fn config(&self) -> &FilterConfig {
        &self.config
    }

    #[must_use]
    pub fn particles(&self) -> &[Particle<M::World>] {
        &self.particles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.particles.iter().map(Particle::weight).sum()
    }

    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.particles.iter().filter(|p| p.is_alive()).count()
    }

    /// Live partitions; member indices point into [`Self::particles`].
    #[must_use]
    pub const fn partitions(&self) -> &BTreeMap<PartitionId, Partition> {
        self.partitions.partitions()
    }

    #[must_use]
    pub const fn partition_manager(&self) -> &PartitionManager {
        &self.partitions
    }

    #[must_use]
    pub fn check_partition(&self, min_size: usize) -> bool {
        self.partitions.check_partition(min_size)
    }

    /// Clears memoized query answers.
    pub fn empty_cache(&mut self) {
        self.cache.clear();
    }

    /// Applies observation evidence to every particle.
    ///
    /// Each weight is multiplied by the likelihood the model reports.
    /// Particles inconsistent with the evidence end up with weight 0 and
    /// stay in the population until the next resample.
    pub fn take(&mut self, evidence: &Evidence, time_step: u64) -> PfResult<()> {
        self.cache.clear();
        for particle in &mut self.particles {
            apply_evidence(self.model.as_ref(), particle, evidence, time_step, &mut self.rng)?;
        }

        let alive = self.alive_count();
        debug!(
            time_step,
            statements = evidence.len(),
            alive,
            population = self.particles.len(),
            "evidence applied"
        );
        if alive == 0 {
            warn!(time_step, evidence = %evidence, "no particle is consistent with the evidence");
        }
        Ok(())
    }

    /// Applies decision evidence to the particles of one partition.
    ///
    /// Returns `Ok(false)` without touching any particle when `id` is not
    /// a live partition. Membership is not recomputed; call
    /// [`Self::repartition`] afterwards.
    pub fn take_with_partition(
        &mut self,
        evidence: &Evidence,
        id: PartitionId,
        time_step: u64,
    ) -> PfResult<bool> {
        let Some(partition) = self.partitions.get(id) else {
            warn!(partition = %id, evidence = %evidence, "partition no longer exists; decision skipped");
            return Ok(false);
        };

        self.cache.clear();
        for &idx in partition.members() {
            apply_evidence(
                self.model.as_ref(),
                &mut self.particles[idx],
                evidence,
                time_step,
                &mut self.rng,
            )?;
        }
        debug!(partition = %id, members = partition.len(), statements = evidence.len(), "decision applied");
        Ok(true)
    }

    /// Answers every query over the whole population.
    pub fn answer(&mut self, queries: &mut [Query]) -> PfResult<()> {
        for query in queries.iter_mut() {
            let key = CacheKey {
                scope: None,
                arg_spec: query.arg_spec().to_string(),
            };
            let histogram = match self.cache.get(&key) {
                Some(cached) => cached.clone(),
                None => {
                    let histogram = build_histogram(self.model.as_ref(), query, self.particles.iter())?;
                    self.cache.insert(key, histogram.clone());
                    histogram
                }
            };
            query.set_histogram(histogram);
        }
        Ok(())
    }

    /// Answers every query over one partition.
    ///
    /// Returns `Ok(false)` and leaves the queries untouched when `id` is
    /// not a live partition.
    pub fn answer_with_partition(&mut self, queries: &mut [Query], id: PartitionId) -> PfResult<bool> {
        let Some(partition) = self.partitions.get(id) else {
            warn!(partition = %id, "partition no longer exists; answer skipped");
            return Ok(false);
        };

        for query in queries.iter_mut() {
            let key = CacheKey {
                scope: Some(id),
                arg_spec: query.arg_spec().to_string(),
            };
            let histogram = match self.cache.get(&key) {
                Some(cached) => cached.clone(),
                None => {
                    let members = partition.members().iter().map(|&idx| &self.particles[idx]);
                    let histogram = build_histogram(self.model.as_ref(), query, members)?;
                    self.cache.insert(key, histogram.clone());
                    histogram
                }
            };
            query.set_histogram(histogram);
        }
        Ok(true)
    }

    /// Recomputes partition membership from current signatures.
    pub fn repartition(&mut self) -> RepartitionDelta {
        let delta = self
            .partitions
            .repartition(self.particles.iter().map(Particle::signature));
        if !delta.is_unchanged() {
            self.cache.clear();
            debug!(
                partitions = self.partitions.len(),
                created = delta.created.len(),
                removed = delta.removed.len(),
                "repartitioned"
            );
        }
        delta
    }

    /// Resamples each partition independently.
    ///
    /// A partition of `n` particles yields `multiplier * n` equally
    /// weighted descendants. Weights are then rescaled so the population
    /// averages weight 1 while each partition keeps its share of the total
    /// weight; a step's likelihoods never accumulate into underflow.
    /// Partitions whose total weight is zero have no descendants. When no
    /// partition has weight left the population is carried over unchanged
    /// instead.
    #[allow(clippy::cast_precision_loss)]
    pub fn resample_partition_and_particles(&mut self, multiplier: usize) -> PfResult<ResampleReport> {
        if multiplier == 0 {
            return Err(ValidationError::InvalidMultiplier { multiplier }.into());
        }

        let population_before = self.particles.len();
        let mut next = Vec::with_capacity(population_before.saturating_mul(multiplier));
        let mut exhausted_partitions = 0;
        // A dead branch is dropped unless every branch is dead.
        let any_alive = self.particles.iter().any(Particle::is_alive);
        let live_total: f64 = self.particles.iter().map(Particle::weight).sum();
        let live_count: usize = self
            .partitions
            .iter()
            .filter(|p| p.members().iter().any(|&idx| self.particles[idx].is_alive()))
            .map(|p| p.len() * multiplier)
            .sum();

        for partition in self.partitions.iter() {
            let members = partition.members();
            let weights: Vec<f64> = members.iter().map(|&idx| self.particles[idx].weight()).collect();
            let total: f64 = weights.iter().sum();

            if total <= 0.0 {
                exhausted_partitions += 1;
                if any_alive {
                    debug!(partition = %partition.id(), size = members.len(), "dropping partition with no weight");
                } else {
                    next.extend(members.iter().map(|&idx| self.particles[idx].clone()));
                }
                continue;
            }

            let count = members.len() * multiplier;
            let ancestors = resample::draw(self.config.resampling, &weights, count, &mut self.rng)?;
            // Share of the live weight, spread over this partition's descendants.
            let weight = (total / live_total) * (live_count as f64 / count as f64);
            for ancestor in ancestors {
                let id = ParticleId::new(self.next_id);
                self.next_id += 1;
                next.push(self.particles[members[ancestor]].descendant(id, weight));
            }
        }

        if !any_alive {
            warn!(
                partitions = exhausted_partitions,
                population = population_before,
                "no partition has weight left; population carried over without resampling"
            );
        }

        let report = ResampleReport {
            partitions: self.partitions.len(),
            exhausted_partitions,
            dropped_exhausted: any_alive && exhausted_partitions > 0,
            population_before,
            population_after: next.len(),
        };

        self.particles = next;
        self.cache.clear();
        self.repartition();

        debug!(
            partitions = report.partitions,
            before = report.population_before,
            after = report.population_after,
            "resampled"
        );
        Ok(report)
    }

    /// Snapshot of the population and partition index.
    #[must_use]
    pub fn checkpoint(&self) -> FilterCheckpoint<M::World> {
        FilterCheckpoint {
            particles: self.particles.clone(),
            partitions: self.partitions.clone(),
        }
    }

    /// Restores a snapshot taken by [`Self::checkpoint`].
    ///
    /// Particle ids handed out since the snapshot are not reused.
    pub fn restore(&mut self, checkpoint: &FilterCheckpoint<M::World>) {
        self.particles.clone_from(&checkpoint.particles);
        self.partitions = checkpoint.partitions.clone();
        self.cache.clear();
    }

    /// Rendering of the first particle's world, for diagnostics.
    #[must_use]
    pub fn describe_first_world(&self) -> Option<String> {
        self.particles.first().map(|p| self.model.describe(p.world()))
    }
}

fn apply_evidence<M: ModelEngine>(
    model: &M,
    particle: &mut Particle<M::World>,
    evidence: &Evidence,
    time_step: u64,
    rng: &mut StdRng,
) -> PfResult<()> {
    let likelihood = model.apply(particle.world_mut(), evidence, time_step, rng)?;
    if !(likelihood.is_finite() && likelihood >= 0.0) {
        return Err(ModelError::InvalidLikelihood {
            value: likelihood,
            evidence: evidence.to_string(),
        }
        .into());
    }
    particle.scale_weight(likelihood);
    particle.advance_to(time_step);
    particle.set_signature(model.signature(particle.world()));
    Ok(())
}

fn build_histogram<'a, M, I>(model: &M, query: &Query, particles: I) -> PfResult<Histogram>
where
    M: ModelEngine,
    M::World: 'a,
    I: Iterator<Item = &'a Particle<M::World>>,
{
    let mut histogram = Histogram::new();
    for particle in particles {
        let outcome = model.evaluate(particle.world(), query)?;
        histogram.add(outcome, particle.weight());
    }
    Ok(histogram)
}
