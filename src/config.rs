//! Filter and runner configuration.
//!
//! Configuration is plain data with defaults. It can be built in code or
//! loaded from JSON; missing fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PfResult, StreamError, ValidationError};
use crate::filter::ResamplingScheme;

/// Particle filter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Population size at initialization.
    pub num_particles: usize,
    /// RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Timestamp given to particles at initialization.
    pub initial_time_step: u64,
    pub resampling: ResamplingScheme,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 1000,
            seed: None,
            initial_time_step: 0,
            resampling: ResamplingScheme::Systematic,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_particles == 0 {
            return Err(ValidationError::EmptyPopulation);
        }
        Ok(())
    }
}

/// Opt-in retry when a step leaves some partition too small.
///
/// When the check fails, the step's evidence is re-applied to the
/// population as it was before the step, grown by `growth_factor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegeneracyPolicy {
    pub min_partition_size: usize,
    pub growth_factor: usize,
    pub max_retries: usize,
}

impl Default for DegeneracyPolicy {
    fn default() -> Self {
        Self {
            min_partition_size: 10,
            growth_factor: 2,
            max_retries: 3,
        }
    }
}

impl DegeneracyPolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_partition_size == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "degeneracy.min_partition_size must be at least 1".to_string(),
            });
        }
        if self.growth_factor < 2 {
            return Err(ValidationError::InvalidConfig {
                reason: "degeneracy.growth_factor must be at least 2".to_string(),
            });
        }
        Ok(())
    }
}

/// Runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub filter: FilterConfig,
    /// The run ends after this time step's output is written.
    pub max_time_step: Option<u64>,
    /// Query strings; `@t` is replaced by the current time step.
    pub query_templates: Vec<String>,
    pub degeneracy: Option<DegeneracyPolicy>,
}

impl RunnerConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> PfResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> PfResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| StreamError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.filter.validate()?;
        if let Some(policy) = &self.degeneracy {
            policy.validate()?;
        }
        Ok(())
    }
}
