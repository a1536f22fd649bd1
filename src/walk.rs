//! Random-walk model engine.
//!
//! A hidden integer position moves by -1, 0 or +1 each time step.
//!
//! | Term          | Kind        | Value                                      |
//! |---------------|-------------|--------------------------------------------|
//! | `Position(@k)`| hidden      | int                                        |
//! | `Signal(@k)`  | observation | int; noisy reading of the position         |
//! | `Door(@k)`    | observation | bool; true when the position is 0          |
//! | `Move(@k)`    | decision    | int; shifts the position from `k + 1` on   |
//!
//! The signature holds the door state at the latest sampled step and the
//! move decided at that step, if any. Particles at the door and away from
//! it therefore fall into separate partitions and can receive different
//! decisions.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use rand::{Rng, RngCore};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ValidationError};
use crate::evidence::{Evidence, Statement};
use crate::model::ModelEngine;
use crate::query::Query;
use crate::signature::ObservabilitySignature;
use crate::value::OutcomeValue;

static TERM_RE: OnceLock<Regex> = OnceLock::new();

fn term_re() -> &'static Regex {
    TERM_RE.get_or_init(|| Regex::new(r"^([A-Za-z_]\w*)\(@(\d+)\)$").expect("term regex is valid"))
}

/// Random-walk parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Probability of each of the -1 and +1 steps.
    pub step_probability: f64,
    /// Likelihood of a signal that is off by one.
    pub noise: f64,
    /// Initial positions are uniform in `[-initial_spread, initial_spread]`.
    pub initial_spread: i64,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            step_probability: 0.25,
            noise: 0.2,
            initial_spread: 2,
        }
    }
}

impl WalkConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=0.5).contains(&self.step_probability) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("walk.step_probability must lie in [0, 0.5], got {}", self.step_probability),
            });
        }
        if !(0.0..=1.0).contains(&self.noise) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("walk.noise must lie in [0, 1], got {}", self.noise),
            });
        }
        if self.initial_spread < 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "walk.initial_spread must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// One sampled trajectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkWorld {
    positions: Vec<i64>,
    moves: BTreeMap<u64, i64>,
}

impl WalkWorld {
    /// Position at `time_step`, if already sampled.
    #[must_use]
    pub fn position(&self, time_step: u64) -> Option<i64> {
        usize::try_from(time_step)
            .ok()
            .and_then(|idx| self.positions.get(idx))
            .copied()
    }

    /// Latest sampled time step.
    #[must_use]
    pub fn horizon(&self) -> u64 {
        self.positions.len().saturating_sub(1) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    Position(u64),
    Signal(u64),
    Door(u64),
    Move(u64),
}

impl Term {
    fn parse(text: &str) -> Result<Self, ModelError> {
        let caps = term_re().captures(text.trim()).ok_or_else(|| ModelError::Evaluation {
            message: format!("'{text}' is not of the form Name(@step)"),
        })?;
        let time_step: u64 = caps[2].parse().map_err(|_| ModelError::Evaluation {
            message: format!("time step out of range in '{text}'"),
        })?;
        match &caps[1] {
            "Position" => Ok(Self::Position(time_step)),
            "Signal" => Ok(Self::Signal(time_step)),
            "Door" => Ok(Self::Door(time_step)),
            "Move" => Ok(Self::Move(time_step)),
            name => Err(ModelError::UndefinedEntity {
                name: name.to_string(),
                term: text.to_string(),
            }),
        }
    }

    const fn time_step(self) -> u64 {
        match self {
            Self::Position(t) | Self::Signal(t) | Self::Door(t) | Self::Move(t) => t,
        }
    }
}

fn expect_int(statement: &Statement) -> Result<i64, ModelError> {
    statement.value.as_int().ok_or_else(|| ModelError::TypeMismatch {
        term: statement.term.clone(),
        expected: "int".to_string(),
        found: statement.value.type_name().to_string(),
    })
}

fn expect_bool(statement: &Statement) -> Result<bool, ModelError> {
    statement.value.as_bool().ok_or_else(|| ModelError::TypeMismatch {
        term: statement.term.clone(),
        expected: "bool".to_string(),
        found: statement.value.type_name().to_string(),
    })
}

/// Random-walk model.
#[derive(Debug, Clone, Default)]
pub struct RandomWalkModel {
    config: WalkConfig,
}

impl RandomWalkModel {
    pub fn new(config: WalkConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &WalkConfig {
        &self.config
    }

    fn sample_step(&self, rng: &mut dyn RngCore) -> i64 {
        let u: f64 = rng.gen();
        if u < self.config.step_probability {
            -1
        } else if u < 2.0 * self.config.step_probability {
            1
        } else {
            0
        }
    }

    fn extend(&self, world: &mut WalkWorld, time_step: u64, rng: &mut dyn RngCore) {
        while world.horizon() < time_step {
            let t = world.horizon();
            let last = world.positions.last().copied().unwrap_or(0);
            let shift = world.moves.get(&t).copied().unwrap_or(0);
            let next = last + shift + self.sample_step(rng);
            world.positions.push(next);
        }
    }

    fn signal_likelihood(&self, position: i64, signal: i64) -> f64 {
        match position.abs_diff(signal) {
            0 => 1.0,
            1 => self.config.noise,
            _ => 0.0,
        }
    }
}

impl ModelEngine for RandomWalkModel {
    type World = WalkWorld;

    fn sample_initial_world(&self, rng: &mut dyn RngCore) -> Result<WalkWorld, ModelError> {
        let spread = self.config.initial_spread;
        Ok(WalkWorld {
            positions: vec![rng.gen_range(-spread..=spread)],
            moves: BTreeMap::new(),
        })
    }

    fn apply(
        &self,
        world: &mut WalkWorld,
        evidence: &Evidence,
        time_step: u64,
        rng: &mut dyn RngCore,
    ) -> Result<f64, ModelError> {
        self.extend(world, time_step, rng);

        let mut likelihood = 1.0;
        for statement in evidence.statements() {
            let term = Term::parse(&statement.term)?;
            if term.time_step() > time_step {
                return Err(ModelError::Evaluation {
                    message: format!("'{}' lies beyond the current time step @{time_step}", statement.term),
                });
            }
            let position = world.position(term.time_step()).unwrap_or_default();
            match term {
                Term::Position(_) => {
                    if position != expect_int(statement)? {
                        likelihood = 0.0;
                    }
                }
                Term::Signal(_) => {
                    likelihood *= self.signal_likelihood(position, expect_int(statement)?);
                }
                Term::Door(_) => {
                    if (position == 0) != expect_bool(statement)? {
                        likelihood = 0.0;
                    }
                }
                Term::Move(t) => {
                    let shift = expect_int(statement)?;
                    let previous = world.moves.insert(t, shift).unwrap_or(0);
                    // Positions already sampled past `t` follow the new move.
                    let from = t.checked_add(1).and_then(|n| usize::try_from(n).ok());
                    if let Some(from) = from {
                        for p in world.positions.iter_mut().skip(from) {
                            *p += shift - previous;
                        }
                    }
                }
            }
        }
        Ok(likelihood)
    }

    fn evaluate(&self, world: &WalkWorld, query: &Query) -> Result<OutcomeValue, ModelError> {
        let term = Term::parse(query.arg_spec())?;
        let t = term.time_step();
        if let Term::Move(_) = term {
            return Ok(OutcomeValue::Int(world.moves.get(&t).copied().unwrap_or(0)));
        }
        let position = world.position(t).ok_or_else(|| ModelError::Evaluation {
            message: format!("'{}' lies beyond the sampled horizon @{}", query.arg_spec(), world.horizon()),
        })?;
        Ok(match term {
            Term::Door(_) => OutcomeValue::Bool(position == 0),
            _ => OutcomeValue::Int(position),
        })
    }

    fn signature(&self, world: &WalkWorld) -> ObservabilitySignature {
        let t = world.horizon();
        let at_door = world.positions.last() == Some(&0);
        let signature = ObservabilitySignature::empty().with(format!("Door(@{t})"), OutcomeValue::Bool(at_door));
        match world.moves.get(&t) {
            Some(shift) => signature.with(format!("Move(@{t})"), OutcomeValue::Int(*shift)),
            None => signature,
        }
    }

    fn describe(&self, world: &WalkWorld) -> String {
        let trail: Vec<String> = world.positions.iter().map(ToString::to_string).collect();
        format!("positions=[{}] moves={}", trail.join(","), world.moves.len())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::query::QueryId;

    use super::*;

    fn still() -> RandomWalkModel {
        RandomWalkModel::new(WalkConfig {
            step_probability: 0.0,
            noise: 0.5,
            initial_spread: 0,
        })
        .unwrap()
    }

    fn ev(line: &str, t: u64) -> Evidence {
        Evidence::parse_line(line, t).unwrap()
    }

    #[test]
    fn test_signal_likelihood() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(1);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        assert!((model.apply(&mut world, &ev("obs Signal(@t) = 0", 0), 0, &mut rng).unwrap() - 1.0).abs() < 1e-12);
        assert!((model.apply(&mut world, &ev("obs Signal(@t) = 1", 0), 0, &mut rng).unwrap() - 0.5).abs() < 1e-12);
        assert!(model.apply(&mut world, &ev("obs Signal(@t) = 3", 0), 0, &mut rng).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_extends_to_time_step() {
        let model = RandomWalkModel::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        model.apply(&mut world, &Evidence::empty(), 4, &mut rng).unwrap();
        assert_eq!(world.horizon(), 4);
        for t in 1..=4 {
            let d = world.position(t).unwrap() - world.position(t - 1).unwrap();
            assert!((-1..=1).contains(&d));
        }
    }

    #[test]
    fn test_move_shifts_next_position() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(3);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        model.apply(&mut world, &ev("decide Move(@t) = 2", 0), 0, &mut rng).unwrap();
        model.apply(&mut world, &Evidence::empty(), 1, &mut rng).unwrap();
        assert_eq!(world.position(1), Some(2));

        let q = Query::new(QueryId::new(0), "Move(@0)");
        assert_eq!(model.evaluate(&world, &q).unwrap(), OutcomeValue::Int(2));
    }

    #[test]
    fn test_door_observation() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(4);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        let l = model.apply(&mut world, &ev("obs Door(@t) = true", 0), 0, &mut rng).unwrap();
        assert!((l - 1.0).abs() < 1e-12);
        let l = model.apply(&mut world, &ev("obs Door(@t) = false", 0), 0, &mut rng).unwrap();
        assert!(l.abs() < 1e-12);

        let q = Query::new(QueryId::new(0), "Door(@0)");
        assert_eq!(model.evaluate(&world, &q).unwrap(), OutcomeValue::Bool(true));
    }

    #[test]
    fn test_signature_tracks_latest_step() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(8);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        let sig = model.signature(&world);
        assert_eq!(sig.len(), 1);
        assert_eq!(sig.get("Door(@0)"), Some(&OutcomeValue::Bool(true)));

        model.apply(&mut world, &ev("decide Move(@t) = 1", 0), 0, &mut rng).unwrap();
        let sig = model.signature(&world);
        assert_eq!(sig.get("Move(@0)"), Some(&OutcomeValue::Int(1)));

        model.apply(&mut world, &Evidence::empty(), 1, &mut rng).unwrap();
        let sig = model.signature(&world);
        assert_eq!(sig.len(), 1);
        assert_eq!(sig.get("Door(@1)"), Some(&OutcomeValue::Bool(false)));
    }

    #[test]
    fn test_undefined_entity() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(5);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        let err = model.apply(&mut world, &ev("obs Weather(@t) = 1", 0), 0, &mut rng).unwrap_err();
        assert!(matches!(err, ModelError::UndefinedEntity { ref name, .. } if name == "Weather"));

        let q = Query::new(QueryId::new(0), "Weather(@0)");
        assert!(matches!(model.evaluate(&world, &q), Err(ModelError::UndefinedEntity { .. })));
    }

    #[test]
    fn test_type_mismatch() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(6);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        let err = model.apply(&mut world, &ev("obs Door(@t) = 3", 0), 0, &mut rng).unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { .. }));
    }

    #[test]
    fn test_evidence_beyond_current_step_rejected() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(9);
        let mut world = model.sample_initial_world(&mut rng).unwrap();
        let err = model
            .apply(&mut world, &ev("obs Signal(@99999999999) = 0", 0), 2, &mut rng)
            .unwrap_err();
        assert!(matches!(err, ModelError::Evaluation { .. }));
        assert_eq!(world.horizon(), 2);

        let far = format!("decide Move(@{}) = 1", u64::MAX);
        assert!(model.apply(&mut world, &ev(&far, 0), 2, &mut rng).is_err());
        assert!(world.moves.is_empty());
    }

    #[test]
    fn test_query_beyond_horizon() {
        let model = still();
        let mut rng = StdRng::seed_from_u64(7);
        let world = model.sample_initial_world(&mut rng).unwrap();
        let q = Query::new(QueryId::new(0), "Position(@3)");
        assert!(matches!(model.evaluate(&world, &q), Err(ModelError::Evaluation { .. })));
    }

    #[test]
    fn test_config_validation() {
        let bad = WalkConfig {
            step_probability: 0.7,
            ..WalkConfig::default()
        };
        assert!(RandomWalkModel::new(bad).is_err());
        assert!(RandomWalkModel::new(WalkConfig::default()).is_ok());
    }
}
