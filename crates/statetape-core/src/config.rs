//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `statetape-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror the
//! YAML structure, and provides a loader that reads and validates the file.

use std::path::Path;

use serde::Deserialize;

/// Environment variable overriding `run.seed`.
pub const SEED_ENV_VAR: &str = "STATETAPE_SEED";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes an unusable run.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `statetape-config.yaml`. Every section and
/// field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationConfig {
    /// Run-level settings (name, seed, length, forking).
    #[serde(default)]
    pub run: RunConfig,

    /// Producer population and transition model.
    #[serde(default)]
    pub producers: ProducerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `STATETAPE_SEED` overrides `run.seed` when it is set to a valid
    /// integer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if the values do not describe a usable run.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.run.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };

        if self.run.fork_every == Some(0) {
            return invalid("run.fork_every must be at least 1");
        }
        if self.producers.count == 0 {
            return invalid("producers.count must be at least 1");
        }
        if self.producers.distinct_seeds == 0 || self.producers.distinct_seeds > self.producers.count
        {
            return invalid("producers.distinct_seeds must be between 1 and producers.count");
        }
        if self.producers.states == 0 {
            return invalid("producers.states must be at least 1");
        }
        if !self.producers.transitions.is_empty() {
            let states = usize::try_from(self.producers.states).unwrap_or(usize::MAX);
            if self.producers.transitions.len() != states
                || self.producers.transitions.iter().any(|row| row.len() != states)
            {
                return invalid("producers.transitions must be a states x states matrix");
            }
        } else if self.producers.stay_weight == 0 && self.producers.move_weight == 0 {
            return invalid("producers.stay_weight and producers.move_weight cannot both be 0");
        }
        Ok(())
    }
}

/// Run-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Human-readable run name.
    #[serde(default = "default_run_name")]
    pub name: String,

    /// Base random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of steps every producer emits.
    #[serde(default = "default_steps")]
    pub steps: u64,

    /// Fork one producer every N steps by aliasing its tape.
    #[serde(default)]
    pub fork_every: Option<u64>,

    /// Named channel to record into; the implicit channel when absent.
    #[serde(default)]
    pub channel: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_run_name(),
            seed: default_seed(),
            steps: default_steps(),
            fork_every: None,
            channel: None,
        }
    }
}

impl RunConfig {
    /// Override the seed from `STATETAPE_SEED` when it holds an integer.
    pub fn apply_env_overrides(&mut self) {
        if let Some(seed) = std::env::var(SEED_ENV_VAR)
            .ok()
            .and_then(|val| val.parse().ok())
        {
            self.seed = seed;
        }
    }
}

/// Producer population configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProducerConfig {
    /// Number of producers started at the beginning of the run.
    #[serde(default = "default_producer_count")]
    pub count: u32,

    /// Number of distinct seeds shared round-robin by the producers.
    ///
    /// Producers sharing a seed emit identical sequences, which the log
    /// stores once.
    #[serde(default = "default_distinct_seeds")]
    pub distinct_seeds: u32,

    /// Number of discrete states in the chain.
    #[serde(default = "default_states")]
    pub states: u32,

    /// Weight of staying in the current state (used without `transitions`).
    #[serde(default = "default_stay_weight")]
    pub stay_weight: u32,

    /// Weight of moving to each other state (used without `transitions`).
    #[serde(default = "default_move_weight")]
    pub move_weight: u32,

    /// Explicit integer transition weights, one row per state.
    #[serde(default)]
    pub transitions: Vec<Vec<u32>>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            count: default_producer_count(),
            distinct_seeds: default_distinct_seeds(),
            states: default_states(),
            stay_weight: default_stay_weight(),
            move_weight: default_move_weight(),
            transitions: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is
    /// not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_run_name() -> String {
    "statetape-run".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_steps() -> u64 {
    1_000
}

const fn default_producer_count() -> u32 {
    8
}

const fn default_distinct_seeds() -> u32 {
    2
}

const fn default_states() -> u32 {
    4
}

const fn default_stay_weight() -> u32 {
    6
}

const fn default_move_weight() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_owned()
}
