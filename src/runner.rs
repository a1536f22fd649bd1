//! Two-phase controller.
//!
//! Each time step runs two phases:
//! 1. Observation: pull the next record, apply it to the population,
//!    answer queries, repartition, resample, write output.
//! 2. Decision: ask the source for one decision per partition and apply
//!    it to that partition only.
//!
//! The loop ends when phase 1 finds the source exhausted or after the
//! configured maximum time step has been written.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{DegeneracyPolicy, RunnerConfig};
use crate::error::{PfError, PfResult};
use crate::evidence::Evidence;
use crate::filter::{FilterCheckpoint, ParticleFilter};
use crate::model::ModelEngine;
use crate::partition::PartitionId;
use crate::query::Query;
use crate::signature::ObservabilitySignature;
use crate::sink::{Channel, OutputSink};
use crate::source::{DecisionScope, EvidenceSource};

/// Written after each query result on the results channel.
pub const RESULT_SEPARATOR: &str = "-----";

/// Unique identifier of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The phase did its work for `time_step`.
    Advanced { time_step: u64 },
    /// The source has no more records.
    Exhausted,
    /// `time_step` was the configured maximum; its output is written.
    Finished { time_step: u64 },
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Exhausted,
    MaxTimeStep,
}

/// Summary returned by [`Runner::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub steps_completed: u64,
    pub final_population: usize,
    pub termination: Termination,
}

/// Drives a particle filter from an evidence source into an output sink.
pub struct Runner<M: ModelEngine, S: EvidenceSource, O: OutputSink> {
    filter: ParticleFilter<M>,
    source: S,
    sink: O,
    config: RunnerConfig,
    latest_queries: Vec<Query>,
    run_id: RunId,
    steps_completed: u64,
}

impl<M, S, O> Runner<M, S, O>
where
    M: ModelEngine,
    S: EvidenceSource,
    O: OutputSink,
{
    /// Validates `config`, initializes the population and registers the
    /// configured query templates with `source`.
    pub fn new(model: Arc<M>, config: RunnerConfig, mut source: S, sink: O) -> PfResult<Self> {
        config.validate()?;
        let filter = ParticleFilter::new(model, config.filter.clone())?;
        source.register_queries(&config.query_templates);
        Ok(Self {
            filter,
            source,
            sink,
            config,
            latest_queries: Vec::new(),
            run_id: RunId::generate(),
            steps_completed: 0,
        })
    }

    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    #[must_use]
    pub const fn filter(&self) -> &ParticleFilter<M> {
        &self.filter
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub const fn sink(&self) -> &O {
        &self.sink
    }

    /// Queries answered over the whole population in the last phase 1.
    #[must_use]
    pub fn latest_queries(&self) -> &[Query] {
        &self.latest_queries
    }

    #[must_use]
    pub const fn steps_completed(&self) -> u64 {
        self.steps_completed
    }

    pub fn into_parts(self) -> (ParticleFilter<M>, S, O) {
        (self.filter, self.source, self.sink)
    }

    /// Phase 1 with no after-move hook.
    pub fn advance_phase1(&mut self) -> PfResult<StepOutcome> {
        self.advance_phase1_with(|_| {})
    }

    /// Phase 1. `after_move` sees the answered queries before output is written.
    pub fn advance_phase1_with<F>(&mut self, mut after_move: F) -> PfResult<StepOutcome>
    where
        F: FnMut(&[Query]),
    {
        let started = Instant::now();

        if !self.source.advance_to_next_record()? {
            return Ok(StepOutcome::Exhausted);
        }
        let Some(evidence) = self.source.latest_observation_evidence().cloned() else {
            return Ok(StepOutcome::Exhausted);
        };
        let Some(mut queries) = self.source.latest_queries() else {
            return Ok(StepOutcome::Exhausted);
        };
        let time_step = self.source.current_time_step();

        let checkpoint = self.config.degeneracy.map(|policy| (policy, self.filter.checkpoint()));
        self.observe(&evidence, &mut queries, time_step)?;
        if let Some((policy, checkpoint)) = checkpoint {
            self.retry_degenerate(policy, checkpoint, &evidence, &mut queries, time_step)?;
        }

        after_move(&queries);
        self.latest_queries = queries;
        self.post_process(time_step, started.elapsed())?;
        self.steps_completed += 1;

        if self.config.max_time_step.is_some_and(|max| time_step >= max) {
            self.write_final_diagnostic()?;
            return Ok(StepOutcome::Finished { time_step });
        }
        Ok(StepOutcome::Advanced { time_step })
    }

    /// Phase 2. Never reports exhaustion.
    pub fn advance_phase2(&mut self) -> PfResult<StepOutcome> {
        let time_step = self.source.current_time_step();
        let scopes: Vec<(PartitionId, ObservabilitySignature, usize)> = self
            .filter
            .partitions()
            .values()
            .map(|p| (p.id(), p.signature().clone(), p.len()))
            .collect();

        let mut applied = 0usize;
        for (partition, signature, size) in &scopes {
            let scope = DecisionScope {
                time_step,
                partition: *partition,
                signature,
                size: *size,
            };
            self.source.update_decision(&scope)?;
            let Some(decision) = self.source.latest_decision_evidence().cloned() else {
                continue;
            };
            if self.filter.take_with_partition(&decision, *partition, time_step)? {
                applied += 1;
            }
        }
        if applied > 0 {
            self.filter.repartition();
        }

        debug!(time_step, partitions = scopes.len(), applied, "decision phase done");
        Ok(StepOutcome::Advanced { time_step })
    }

    /// Runs until the source is exhausted or the maximum time step is written.
    pub fn run(&mut self) -> PfResult<RunSummary> {
        self.run_with(|_| {})
    }

    /// [`Self::run`] with an after-move hook called once per time step.
    pub fn run_with<F>(&mut self, mut after_move: F) -> PfResult<RunSummary>
    where
        F: FnMut(&[Query]),
    {
        let started_at = Utc::now();
        let span = info_span!("run", run_id = %self.run_id);
        let _guard = span.enter();

        info!(
            particles = self.filter.len(),
            queries = self.config.query_templates.len(),
            max_time_step = ?self.config.max_time_step,
            "run started"
        );

        let termination = loop {
            match self.advance_phase1_with(&mut after_move) {
                Ok(StepOutcome::Advanced { .. }) => {}
                Ok(StepOutcome::Exhausted) => break Termination::Exhausted,
                Ok(StepOutcome::Finished { .. }) => break Termination::MaxTimeStep,
                Err(e) => return Err(self.report_fatal(e)),
            }
            if let Err(e) = self.advance_phase2() {
                return Err(self.report_fatal(e));
            }
        };

        let summary = RunSummary {
            run_id: self.run_id,
            started_at,
            steps_completed: self.steps_completed,
            final_population: self.filter.len(),
            termination,
        };
        info!(
            steps = summary.steps_completed,
            population = summary.final_population,
            termination = ?summary.termination,
            "run finished"
        );
        Ok(summary)
    }

    fn observe(&mut self, evidence: &Evidence, queries: &mut [Query], time_step: u64) -> PfResult<()> {
        self.filter.empty_cache();
        self.filter.take(evidence, time_step)?;
        self.filter.answer(queries)?;
        self.filter.repartition();
        self.filter.resample_partition_and_particles(1)?;
        Ok(())
    }

    /// Re-runs the step from `checkpoint` with a larger population while
    /// some partition stays below the minimum size.
    fn retry_degenerate(
        &mut self,
        policy: DegeneracyPolicy,
        mut checkpoint: FilterCheckpoint<M::World>,
        evidence: &Evidence,
        queries: &mut [Query],
        time_step: u64,
    ) -> PfResult<()> {
        for attempt in 1..=policy.max_retries {
            if self.filter.check_partition(policy.min_partition_size) {
                return Ok(());
            }
            self.filter.restore(&checkpoint);
            self.filter.resample_partition_and_particles(policy.growth_factor)?;
            checkpoint = self.filter.checkpoint();
            warn!(
                time_step,
                attempt,
                population = self.filter.len(),
                min_partition_size = policy.min_partition_size,
                "degenerate partition; re-running step with a larger population"
            );
            self.observe(evidence, queries, time_step)?;
        }
        if !self.filter.check_partition(policy.min_partition_size) {
            let smallest = self.filter.partition_manager().smallest().map_or(0, |p| p.len());
            warn!(
                time_step,
                smallest,
                retries = policy.max_retries,
                "partition still degenerate after retries"
            );
        }
        Ok(())
    }

    fn post_process(&mut self, time_step: u64, elapsed: Duration) -> PfResult<()> {
        if let Some(first) = self.latest_queries.first() {
            let line = match first.weighted_mean() {
                Some(mean) => mean.to_string(),
                None => {
                    warn!(query = first.arg_spec(), "primary query has no numeric mean");
                    "NaN".to_string()
                }
            };
            self.sink.write_line(Channel::Value, &line)?;
        }

        let ids: Vec<PartitionId> = self.filter.partitions().keys().copied().collect();
        let mut scoped = self.latest_queries.clone();
        for id in ids {
            if !self.filter.answer_with_partition(&mut scoped, id)? {
                continue;
            }
            if let Some(partition) = self.filter.partitions().get(&id) {
                debug!(partition = %id, signature = %partition.signature(), size = partition.len(), "partition results");
            }
            for query in &scoped {
                self.sink.write_line(Channel::Results, &query.format_results())?;
                self.sink.write_line(Channel::Results, RESULT_SEPARATOR)?;
            }
            self.sink.write_line(Channel::Results, "")?;
        }

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.sink.write_line(
            Channel::Diagnostics,
            &format!(
                "time_step={time_step} elapsed_ms={elapsed_ms:.3} partitions={} population={}",
                self.filter.partitions().len(),
                self.filter.len()
            ),
        )?;
        let snapshot = self
            .source
            .current_world_snapshot()
            .or_else(|| self.filter.describe_first_world());
        if let Some(world) = snapshot {
            self.sink.write_line(Channel::Diagnostics, &format!("world {world}"))?;
        }
        self.sink.flush()?;

        info!(
            time_step,
            partitions = self.filter.partitions().len(),
            population = self.filter.len(),
            elapsed_ms,
            "time step complete"
        );
        Ok(())
    }

    fn write_final_diagnostic(&mut self) -> PfResult<()> {
        let line = format!(
            "final population={} signatures={}",
            self.filter.len(),
            self.filter.partitions().len()
        );
        self.sink.write_line(Channel::Diagnostics, &line)?;
        self.sink.flush()
    }

    fn report_fatal(&mut self, err: PfError) -> PfError {
        error!(error = %err, steps = self.steps_completed, "run aborted");
        // The sink may be what failed; the error is returned either way.
        let _ = self
            .sink
            .write_line(Channel::Diagnostics, &format!("fatal: {err}"))
            .and_then(|()| self.sink.flush());
        err
    }
}

#[cfg(test)]
mod tests {
    use crate::config::FilterConfig;
    use crate::evidence::Statement;
    use crate::sink::MemorySink;
    use crate::source::ScriptedEvidenceSource;
    use crate::walk::{RandomWalkModel, WalkConfig};

    use super::*;

    fn model() -> Arc<RandomWalkModel> {
        Arc::new(
            RandomWalkModel::new(WalkConfig {
                step_probability: 0.25,
                noise: 0.2,
                initial_spread: 1,
            })
            .unwrap(),
        )
    }

    fn config(max: Option<u64>) -> RunnerConfig {
        RunnerConfig {
            filter: FilterConfig {
                num_particles: 200,
                seed: Some(42),
                ..FilterConfig::default()
            },
            max_time_step: max,
            query_templates: vec!["Position(@t)".to_string()],
            degeneracy: None,
        }
    }

    fn signals(values: &[i64]) -> Vec<Evidence> {
        values
            .iter()
            .enumerate()
            .map(|(t, v)| Evidence::new(vec![Statement::observation(format!("Signal(@{t})"), *v)]))
            .collect()
    }

    #[test]
    fn test_exhausted_source_runs_zero_steps() {
        let source = ScriptedEvidenceSource::new(Vec::new());
        let mut runner = Runner::new(model(), config(None), source, MemorySink::new()).unwrap();
        let before = runner.filter().len();
        let summary = runner.run().unwrap();
        assert_eq!(summary.termination, Termination::Exhausted);
        assert_eq!(summary.steps_completed, 0);
        assert_eq!(summary.final_population, before);
        assert!(runner.sink().lines(Channel::Value).is_empty());
        assert!(runner.filter().particles().iter().all(|p| p.ancestor().is_none()));
    }

    #[test]
    fn test_run_writes_every_channel() {
        let source = ScriptedEvidenceSource::new(signals(&[0, 0, 1]));
        let mut runner = Runner::new(model(), config(None), source, MemorySink::new()).unwrap();
        let summary = runner.run().unwrap();

        assert_eq!(summary.steps_completed, 3);
        let sink = runner.sink();
        assert_eq!(sink.lines(Channel::Value).len(), 3);
        let results = sink.lines(Channel::Results);
        assert!(results.iter().any(|l| l.starts_with("Position(@2)\t[")));
        // Query line, separator, then a blank line closing the partition block.
        let first = results.iter().position(|l| l.starts_with("Position(@0)\t[")).unwrap();
        assert_eq!(results[first + 1], RESULT_SEPARATOR);
        assert_eq!(results[first + 2], "");
        assert_eq!(results.last().unwrap(), "");
        assert!(sink.lines(Channel::Diagnostics).iter().any(|l| l.starts_with("time_step=2 ")));
        assert_eq!(sink.flushes(), 3);
    }

    #[test]
    fn test_max_time_step_stops_after_output() {
        let source = ScriptedEvidenceSource::new(signals(&[0, 0, 0, 0, 0]));
        let mut runner = Runner::new(model(), config(Some(1)), source, MemorySink::new()).unwrap();
        let summary = runner.run().unwrap();

        assert_eq!(summary.termination, Termination::MaxTimeStep);
        assert_eq!(summary.steps_completed, 2);
        assert_eq!(runner.source().remaining(), 3);
        let diag = runner.sink().lines(Channel::Diagnostics);
        let expected = format!(
            "final population={} signatures={}",
            runner.filter().len(),
            runner.filter().partitions().len()
        );
        assert_eq!(diag.last().unwrap(), &expected);
    }

    #[test]
    fn test_after_move_hook_sees_answers() {
        let source = ScriptedEvidenceSource::new(signals(&[0, 1]));
        let mut runner = Runner::new(model(), config(None), source, MemorySink::new()).unwrap();
        let mut seen = Vec::new();
        runner
            .run_with(|queries| seen.push(queries[0].histogram().total_weight()))
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|w| *w > 0.0));
    }

    #[test]
    fn test_decisions_per_partition() {
        // Step right at the door, left elsewhere.
        let source = ScriptedEvidenceSource::new(vec![Evidence::empty(), Evidence::empty()]).with_policy(|scope| {
            let at_door = scope.signature.get(&format!("Door(@{})", scope.time_step))
                == Some(&crate::value::OutcomeValue::Bool(true));
            let shift = if at_door { 1 } else { -1 };
            Some(Evidence::new(vec![Statement::decision(format!("Move(@{})", scope.time_step), shift)]))
        });
        let mut runner = Runner::new(model(), config(None), source, MemorySink::new()).unwrap();

        assert_eq!(runner.advance_phase1().unwrap(), StepOutcome::Advanced { time_step: 0 });
        assert_eq!(runner.filter().partitions().len(), 2);
        runner.advance_phase2().unwrap();

        let partitions = runner.filter().partitions();
        assert_eq!(partitions.len(), 2);
        for partition in partitions.values() {
            let sig = partition.signature();
            let expected = if sig.get("Door(@0)") == Some(&crate::value::OutcomeValue::Bool(true)) { 1 } else { -1 };
            assert_eq!(sig.get("Move(@0)"), Some(&crate::value::OutcomeValue::Int(expected)));
        }
    }

    #[test]
    fn test_model_error_is_reported() {
        let source = ScriptedEvidenceSource::new(vec![Evidence::new(vec![Statement::observation("Weather(@0)", 1)])]);
        let mut runner = Runner::new(model(), config(None), source, MemorySink::new()).unwrap();
        let err = runner.run().unwrap_err();
        assert!(err.is_model());
        let diag = runner.sink().lines(Channel::Diagnostics);
        assert!(diag.last().unwrap().starts_with("fatal: "));
    }

    #[test]
    fn test_bool_primary_value() {
        let mut cfg = config(None);
        cfg.query_templates = vec!["Door(@t)".to_string()];
        let source = ScriptedEvidenceSource::new(vec![Evidence::empty()]);
        let mut runner = Runner::new(model(), cfg, source, MemorySink::new()).unwrap();
        runner.run().unwrap();
        // Bool outcomes convert to 0/1.
        let value: f64 = runner.sink().lines(Channel::Value)[0].parse().unwrap();
        assert!((0.0..=1.0).contains(&value));
    }

    #[test]
    fn test_degeneracy_retry_grows_population() {
        let mut cfg = config(None);
        cfg.filter.num_particles = 20;
        cfg.degeneracy = Some(DegeneracyPolicy {
            min_partition_size: 25,
            growth_factor: 2,
            max_retries: 2,
        });
        // Every particle starts at the door, so there is a single partition of 20.
        let still = Arc::new(
            RandomWalkModel::new(WalkConfig {
                step_probability: 0.0,
                noise: 0.2,
                initial_spread: 0,
            })
            .unwrap(),
        );
        let source = ScriptedEvidenceSource::new(vec![Evidence::empty()]);
        let mut runner = Runner::new(still, cfg, source, MemorySink::new()).unwrap();
        runner.advance_phase1().unwrap();
        assert_eq!(runner.filter().len(), 40);
        assert!(runner.filter().check_partition(25));
    }
}
