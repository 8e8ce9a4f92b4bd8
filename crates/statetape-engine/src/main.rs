//! Simulation binary for the statetape log.
//!
//! Loads configuration, records a population of Markov producers into a
//! deduplicating state log, verifies the result and reports how much
//! storage deduplication saved.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `statetape-config.yaml` (or the path given
//!    as the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Run the simulation
//! 4. Log the result and per-tape lengths

mod error;

use std::path::{Path, PathBuf};

use statetape_core::config::{LoggingConfig, SimulationConfig};
use statetape_core::runner::{self, NoOpCallback};
use statetape_log::IntegrityResult;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "statetape-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the run fails,
/// or the finished log does not verify.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let explicit_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    // 1. Load configuration.
    let (config, from_file) = load_config(explicit_path.as_deref())?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("statetape-engine starting");
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    // 3. Run the simulation.
    let result = runner::run_simulation(&config, &mut NoOpCallback)?;

    // 4. Log the result.
    runner::log_simulation_end(&result.summary);
    for id in &result.instances {
        debug!(
            producer = %id,
            length = result.log.length_in(&result.channel, id),
            chunks = result.log.tape_in(&result.channel, id).map(|t| t.chunks().len()),
            "Tape recorded"
        );
    }

    if let IntegrityResult::Anomalies(anomalies) = &result.integrity {
        return Err(EngineError::Integrity {
            log: result.log.id().to_string(),
            anomalies: anomalies.len(),
        }
        .into());
    }

    info!("statetape-engine finished");
    Ok(())
}

/// Load configuration.
///
/// A path given on the command line must exist. Without one, the default
/// `statetape-config.yaml` is used when present and defaults otherwise.
fn load_config(explicit: Option<&Path>) -> Result<(SimulationConfig, bool), EngineError> {
    if let Some(path) = explicit {
        return Ok((SimulationConfig::from_file(path)?, true));
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        Ok((SimulationConfig::from_file(default_path)?, true))
    } else {
        let mut config = SimulationConfig::default();
        config.run.apply_env_overrides();
        Ok((config, false))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
