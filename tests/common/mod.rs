#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rand::RngCore;

use onlinepf::{
    Evidence, FilterConfig, ModelEngine, ModelError, ObservabilitySignature, OutcomeValue, ParticleFilter,
    Query, ResamplingScheme, Statement,
};

/// Worlds are numbered 0, 1, 2, ... in creation order.
///
/// Evidence terms carry one digit per world number:
/// - `Keep = "0110"` multiplies each weight by the digit.
/// - `Split = "0011"` moves each world to the branch named by the digit.
///
/// The branch is the signature, so `Split` creates partitions.
#[derive(Debug, Default)]
pub struct TableModel {
    counter: AtomicI64,
}

#[derive(Debug, Clone)]
pub struct TableWorld {
    pub origin: i64,
    pub branch: i64,
}

fn digit(mask: &OutcomeValue, origin: i64, term: &str) -> Result<u32, ModelError> {
    let Some(mask) = mask.as_symbol() else {
        return Err(ModelError::TypeMismatch {
            term: term.to_string(),
            expected: "symbol".to_string(),
            found: mask.type_name().to_string(),
        });
    };
    usize::try_from(origin)
        .ok()
        .and_then(|idx| mask.chars().nth(idx))
        .and_then(|c| c.to_digit(10))
        .ok_or_else(|| ModelError::Evaluation {
            message: format!("mask '{mask}' has no digit for world {origin}"),
        })
}

impl ModelEngine for TableModel {
    type World = TableWorld;

    fn sample_initial_world(&self, _rng: &mut dyn RngCore) -> Result<TableWorld, ModelError> {
        Ok(TableWorld {
            origin: self.counter.fetch_add(1, Ordering::SeqCst),
            branch: 0,
        })
    }

    fn apply(
        &self,
        world: &mut TableWorld,
        evidence: &Evidence,
        _time_step: u64,
        _rng: &mut dyn RngCore,
    ) -> Result<f64, ModelError> {
        let mut likelihood = 1.0;
        for statement in evidence.statements() {
            match statement.term.as_str() {
                "Keep" => likelihood *= f64::from(digit(&statement.value, world.origin, &statement.term)?),
                "Split" => world.branch = i64::from(digit(&statement.value, world.origin, &statement.term)?),
                other => {
                    return Err(ModelError::UndefinedEntity {
                        name: other.to_string(),
                        term: statement.term.clone(),
                    })
                }
            }
        }
        Ok(likelihood)
    }

    fn evaluate(&self, world: &TableWorld, query: &Query) -> Result<OutcomeValue, ModelError> {
        match query.arg_spec() {
            "Origin" => Ok(OutcomeValue::Int(world.origin)),
            "Branch" => Ok(OutcomeValue::Int(world.branch)),
            other => Err(ModelError::UndefinedEntity {
                name: other.to_string(),
                term: other.to_string(),
            }),
        }
    }

    fn signature(&self, world: &TableWorld) -> ObservabilitySignature {
        ObservabilitySignature::empty().with("Branch", OutcomeValue::Int(world.branch))
    }
}

pub fn table_filter(num_particles: usize, seed: u64, resampling: ResamplingScheme) -> ParticleFilter<TableModel> {
    let config = FilterConfig {
        num_particles,
        seed: Some(seed),
        initial_time_step: 0,
        resampling,
    };
    let Ok(filter) = ParticleFilter::new(Arc::new(TableModel::default()), config) else {
        panic!("table filter must initialize");
    };
    filter
}

pub fn keep(mask: &str) -> Evidence {
    Evidence::new(vec![Statement::observation("Keep", mask)])
}

pub fn split(mask: &str) -> Evidence {
    Evidence::new(vec![Statement::decision("Split", mask)])
}

/// Sum of member weights per partition signature.
pub fn partition_weights(filter: &ParticleFilter<TableModel>) -> Vec<(ObservabilitySignature, f64)> {
    filter
        .partitions()
        .values()
        .map(|p| {
            let w = p.members().iter().map(|&i| filter.particles()[i].weight()).sum();
            (p.signature().clone(), w)
        })
        .collect()
}
