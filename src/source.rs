//! Evidence and decision sources.
//!
//! A source is pulled by the runner: once per time step for observation
//! evidence, then once per partition for a decision. Absence of a record
//! in phase 1 is stream exhaustion.
//!
//! Three sources are provided:
//! - [`LineEvidenceSource::from_reader`] reads the text format from any `BufRead`.
//! - [`LineEvidenceSource::piped`] reads the same format from a channel fed
//!   by another thread (see [`pipe`]).
//! - [`ScriptedEvidenceSource`] replays in-memory evidence and asks a
//!   closure for decisions.
//!
//! Line sources accept only `obs` statements on the evidence stream and
//! only `decide` statements on the decision stream.

use std::collections::VecDeque;
use std::fmt;
use std::io::BufRead;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{PfResult, StreamError};
use crate::evidence::{Evidence, StatementKind};
use crate::partition::PartitionId;
use crate::query::{Query, QueryTemplates};
use crate::signature::ObservabilitySignature;

/// The partition a decision is being requested for.
#[derive(Debug, Clone, Copy)]
pub struct DecisionScope<'a> {
    pub time_step: u64,
    pub partition: PartitionId,
    pub signature: &'a ObservabilitySignature,
    /// Number of particles in the partition.
    pub size: usize,
}

/// Supplier of observation evidence, queries and decisions.
pub trait EvidenceSource {
    /// Registers query strings; `@t` is instantiated per time step.
    fn register_queries(&mut self, templates: &[String]);

    /// Pulls the next phase-1 record. Returns `Ok(false)` on exhaustion.
    fn advance_to_next_record(&mut self) -> PfResult<bool>;

    /// Observation evidence of the current record.
    fn latest_observation_evidence(&self) -> Option<&Evidence>;

    /// Queries instantiated for the current record's time step.
    fn latest_queries(&mut self) -> Option<Vec<Query>>;

    fn current_time_step(&self) -> u64;

    /// Pulls the decision for one partition of the current time step.
    fn update_decision(&mut self, scope: &DecisionScope<'_>) -> PfResult<()>;

    /// Decision pulled by the last [`Self::update_decision`], if any.
    fn latest_decision_evidence(&self) -> Option<&Evidence>;

    /// A rendering of the true world, when the source knows it.
    fn current_world_snapshot(&self) -> Option<String> {
        None
    }
}

/// Bookkeeping shared by every source.
#[derive(Debug, Default)]
struct Cursor {
    next_time_step: u64,
    current: Option<(u64, Evidence)>,
    decision: Option<Evidence>,
    queries: QueryTemplates,
}

impl Cursor {
    fn new(first_time_step: u64) -> Self {
        Self {
            next_time_step: first_time_step,
            ..Self::default()
        }
    }

    fn register(&mut self, templates: &[String]) {
        let mut all = self.queries.templates().to_vec();
        all.extend_from_slice(templates);
        self.queries = QueryTemplates::new(all);
    }

    fn time_step(&self) -> u64 {
        match &self.current {
            Some((t, _)) => *t,
            None => self.next_time_step,
        }
    }

    fn accept(&mut self, evidence: Evidence) {
        let t = self.next_time_step;
        self.next_time_step += 1;
        self.decision = None;
        self.queries.invalidate();
        self.current = Some((t, evidence));
    }

    fn exhaust(&mut self) {
        self.current = None;
        self.decision = None;
    }

    fn queries(&mut self) -> Option<Vec<Query>> {
        let t = match &self.current {
            Some((t, _)) => *t,
            None => return None,
        };
        Some(self.queries.for_time_step(t).to_vec())
    }
}

trait LineFeed: Send {
    /// Next line without its terminator, `None` at end of stream.
    fn next_line(&mut self) -> PfResult<Option<String>>;
}

struct ReaderFeed(Box<dyn BufRead + Send>);

impl LineFeed for ReaderFeed {
    fn next_line(&mut self) -> PfResult<Option<String>> {
        let mut line = String::new();
        let read = self.0.read_line(&mut line).map_err(StreamError::Read)?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(&['\n', '\r'][..]).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

struct ChannelFeed(Receiver<String>);

impl LineFeed for ChannelFeed {
    fn next_line(&mut self) -> PfResult<Option<String>> {
        // A dropped sender ends the stream.
        Ok(self.0.recv().ok())
    }
}

/// Source reading the line-oriented text format.
///
/// Each observation line is one time step. When a decision stream is
/// attached, one decision line is read per partition request; an empty
/// line means no decision for that partition.
pub struct LineEvidenceSource {
    observations: Box<dyn LineFeed>,
    decisions: Option<Box<dyn LineFeed>>,
    cursor: Cursor,
}

impl fmt::Debug for LineEvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineEvidenceSource")
            .field("time_step", &self.cursor.time_step())
            .field("has_decisions", &self.decisions.is_some())
            .finish_non_exhaustive()
    }
}

impl LineEvidenceSource {
    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            observations: Box::new(ReaderFeed(Box::new(reader))),
            decisions: None,
            cursor: Cursor::new(0),
        }
    }

    /// A source fed line by line through a channel.
    #[must_use]
    pub fn piped(records: Receiver<String>) -> Self {
        Self {
            observations: Box::new(ChannelFeed(records)),
            decisions: None,
            cursor: Cursor::new(0),
        }
    }

    #[must_use]
    pub fn with_decision_reader(mut self, reader: impl BufRead + Send + 'static) -> Self {
        self.decisions = Some(Box::new(ReaderFeed(Box::new(reader))));
        self
    }

    #[must_use]
    pub fn with_decision_channel(mut self, decisions: Receiver<String>) -> Self {
        self.decisions = Some(Box::new(ChannelFeed(decisions)));
        self
    }

    /// Time step assigned to the first record.
    #[must_use]
    pub fn with_first_time_step(mut self, time_step: u64) -> Self {
        self.cursor.next_time_step = time_step;
        self
    }
}

impl EvidenceSource for LineEvidenceSource {
    fn register_queries(&mut self, templates: &[String]) {
        self.cursor.register(templates);
    }

    fn advance_to_next_record(&mut self) -> PfResult<bool> {
        let Some(line) = self.observations.next_line()? else {
            debug!("evidence stream exhausted");
            self.cursor.exhaust();
            return Ok(false);
        };
        let evidence = Evidence::parse_line_of(&line, self.cursor.next_time_step, StatementKind::Observation)?;
        self.cursor.accept(evidence);
        Ok(true)
    }

    fn latest_observation_evidence(&self) -> Option<&Evidence> {
        self.cursor.current.as_ref().map(|(_, e)| e)
    }

    fn latest_queries(&mut self) -> Option<Vec<Query>> {
        self.cursor.queries()
    }

    fn current_time_step(&self) -> u64 {
        self.cursor.time_step()
    }

    fn update_decision(&mut self, scope: &DecisionScope<'_>) -> PfResult<()> {
        self.cursor.decision = None;
        let Some(decisions) = self.decisions.as_mut() else {
            return Ok(());
        };
        match decisions.next_line()? {
            Some(line) => {
                let evidence = Evidence::parse_line_of(&line, scope.time_step, StatementKind::Decision)?;
                if !evidence.is_empty() {
                    self.cursor.decision = Some(evidence);
                }
            }
            None => {
                warn!(partition = %scope.partition, "decision stream exhausted; no decision applied");
            }
        }
        Ok(())
    }

    fn latest_decision_evidence(&self) -> Option<&Evidence> {
        self.cursor.decision.as_ref()
    }
}

/// Writing end of a piped source.
#[derive(Debug, Clone)]
pub struct RecordFeed {
    sender: Sender<String>,
}

impl RecordFeed {
    /// Queues one record line. Fails once the source is dropped.
    pub fn send(&self, line: impl Into<String>) -> PfResult<()> {
        self.sender
            .send(line.into())
            .map_err(|_| StreamError::Closed { channel: "evidence".to_string() }.into())
    }
}

/// Creates a piped source and the feed that writes into it.
///
/// The source reports exhaustion once every feed clone is dropped and
/// the queued records are consumed.
#[must_use]
pub fn pipe() -> (RecordFeed, LineEvidenceSource) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (RecordFeed { sender }, LineEvidenceSource::piped(receiver))
}

type DecisionPolicy = Box<dyn FnMut(&DecisionScope<'_>) -> Option<Evidence> + Send>;

/// Source replaying prepared evidence, with decisions from a policy closure.
pub struct ScriptedEvidenceSource {
    records: VecDeque<Evidence>,
    policy: DecisionPolicy,
    cursor: Cursor,
}

impl fmt::Debug for ScriptedEvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEvidenceSource")
            .field("remaining", &self.records.len())
            .field("time_step", &self.cursor.time_step())
            .finish_non_exhaustive()
    }
}

impl ScriptedEvidenceSource {
    pub fn new(records: impl IntoIterator<Item = Evidence>) -> Self {
        Self {
            records: records.into_iter().collect(),
            policy: Box::new(|_| None),
            cursor: Cursor::new(0),
        }
    }

    #[must_use]
    pub fn with_policy<F>(mut self, policy: F) -> Self
    where
        F: FnMut(&DecisionScope<'_>) -> Option<Evidence> + Send + 'static,
    {
        self.policy = Box::new(policy);
        self
    }

    #[must_use]
    pub fn with_first_time_step(mut self, time_step: u64) -> Self {
        self.cursor.next_time_step = time_step;
        self
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl EvidenceSource for ScriptedEvidenceSource {
    fn register_queries(&mut self, templates: &[String]) {
        self.cursor.register(templates);
    }

    fn advance_to_next_record(&mut self) -> PfResult<bool> {
        match self.records.pop_front() {
            Some(evidence) => {
                self.cursor.accept(evidence);
                Ok(true)
            }
            None => {
                self.cursor.exhaust();
                Ok(false)
            }
        }
    }

    fn latest_observation_evidence(&self) -> Option<&Evidence> {
        self.cursor.current.as_ref().map(|(_, e)| e)
    }

    fn latest_queries(&mut self) -> Option<Vec<Query>> {
        self.cursor.queries()
    }

    fn current_time_step(&self) -> u64 {
        self.cursor.time_step()
    }

    fn update_decision(&mut self, scope: &DecisionScope<'_>) -> PfResult<()> {
        self.cursor.decision = (self.policy)(scope).filter(|e| !e.is_empty());
        Ok(())
    }

    fn latest_decision_evidence(&self) -> Option<&Evidence> {
        self.cursor.decision.as_ref()
    }
}
