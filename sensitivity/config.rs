//! Configuration surface of the sensitivity pipeline, loadable from a TOML file.

use crate::baseline::CorrectBaseline;
use crate::bootstrap::DEFAULT_SEED;
use crate::fit::FitOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    /// Score the baseline-adjusted `response` column instead of `response_origin`.
    pub adjusted: bool,
    pub correct_baseline: CorrectBaseline,
    /// Bootstrap rounds for replicated blocks.
    pub iteration: usize,
    /// Seed of the bootstrap streams. Unset means `DEFAULT_SEED`.
    pub seed: Option<u64>,
    pub fit: FitOptions,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            adjusted: true,
            correct_baseline: CorrectBaseline::Non,
            iteration: 10,
            seed: None,
            fit: FitOptions::default(),
        }
    }
}

impl SensitivityConfig {
    pub fn effective_seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iteration == 0 {
            return Err(ConfigError::InvalidValue {
                field: "iteration",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !(self.fit.tolerance.is_finite() && self.fit.tolerance > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "fit.tolerance",
                reason: format!("must be a positive finite number, got {}", self.fit.tolerance),
            });
        }
        if self.fit.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fit.max_iterations",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Loads and validates a configuration from a TOML file. Missing keys take defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }
}
