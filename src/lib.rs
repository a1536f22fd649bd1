//! # onlinepf - Partitioned Online Particle Filtering
//!
//! onlinepf runs streaming approximate inference over a dynamic
//! probabilistic model. Each time step it consumes evidence from a live
//! source, updates a weighted population of sampled worlds, answers the
//! registered queries as weighted histograms and writes the results out.
//!
//! ## Core Concepts
//!
//! - **Particle**: a weighted sample owning its world
//! - **Observability Signature**: the distinguishable history of a particle, used as partition key
//! - **Partition**: particles sharing a signature, resampled as a unit
//! - **Histogram**: weighted distribution of a query's outcomes
//! - **Runner**: the two-phase controller (observe, then decide per partition)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use onlinepf::{LineEvidenceSource, RandomWalkModel, Runner, RunnerConfig, WriterSink};
//!
//! let config = RunnerConfig {
//!     query_templates: vec!["Position(@t)".into()],
//!     max_time_step: Some(10),
//!     ..RunnerConfig::default()
//! };
//! let source = LineEvidenceSource::from_reader(std::io::stdin().lock());
//! let mut runner = Runner::new(Arc::new(RandomWalkModel::default()), config, source, WriterSink::stdio())?;
//! let summary = runner.run()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod evidence;
pub mod filter;
pub mod histogram;
pub mod model;
pub mod particle;
pub mod partition;
pub mod query;
pub mod runner;
pub mod signature;
pub mod sink;
pub mod source;
pub mod value;
pub mod walk;

// Re-export primary types at crate root for convenience
pub use config::{DegeneracyPolicy, FilterConfig, RunnerConfig};
pub use error::{ModelError, PfError, PfResult, StreamError, ValidationError};
pub use evidence::{Evidence, Statement, StatementKind};
pub use filter::{FilterCheckpoint, ParticleFilter, ResampleReport, ResamplingScheme};
pub use histogram::{Histogram, HistogramEntry};
pub use model::ModelEngine;
pub use particle::{Particle, ParticleId};
pub use partition::{Partition, PartitionId, PartitionManager, RepartitionDelta};
pub use query::{Query, QueryId, QueryTemplates};
pub use runner::{RunId, RunSummary, Runner, StepOutcome, Termination};
pub use signature::{ObservabilitySignature, SignatureDigest};
pub use sink::{Channel, MemorySink, OutputSink, WriterSink};
pub use source::{pipe, DecisionScope, EvidenceSource, LineEvidenceSource, RecordFeed, ScriptedEvidenceSource};
pub use value::OutcomeValue;
pub use walk::{RandomWalkModel, WalkConfig, WalkWorld};
