//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during startup and the simulation run.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: statetape_core::config::ConfigError,
    },

    /// Simulation runner failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: statetape_core::runner::RunnerError,
    },

    /// The finished log failed integrity verification.
    #[error("log {log} failed verification with {anomalies} anomalies")]
    Integrity {
        /// Identity of the log.
        log: String,
        /// Number of anomalies found.
        anomalies: usize,
    },
}
