//! Simulation loop driving Markov producers into a shared log.
//!
//! [`run_simulation`] builds the producer population described by a
//! [`SimulationConfig`], opens a collector with them, and steps every
//! producer `run.steps` times. When `run.fork_every` is set, one producer
//! is split every N steps: the fork's history is aliased from its parent
//! with a redirect and it then walks on with its own seed.
//!
//! After the last step the log is closed, verified and handed back to the
//! caller together with a [`RunSummary`].

use std::rc::Rc;

use chrono::{DateTime, Utc};
use statetape_log::{Channel, IntegrityResult, LogError, Producer, StateLog, StorageStats};
use statetape_types::{LogId, ProducerId, Step};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SimulationConfig};
use crate::markov::{MarkovError, MarkovProducer, StateCollector, TransitionMatrix};

/// The log type a simulation records into.
pub type SimulationLog = StateLog<ProducerId, u32, String>;

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The configuration does not describe a usable run.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A producer could not be built or advanced.
    #[error("producer error: {source}")]
    Markov {
        /// The underlying chain error.
        #[from]
        source: MarkovError,
    },

    /// The log refused a lifecycle change or redirect.
    #[error("log error: {source}")]
    Log {
        /// The underlying log error.
        #[from]
        source: LogError,
    },

    /// An internal error that should not occur in normal operation.
    #[error("internal runner error: {0}")]
    Internal(&'static str),
}

/// What happened during a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSummary {
    /// The step that was recorded.
    pub step: Step,
    /// Producers alive during this step.
    pub producers: usize,
    /// Values the log accepted during this step.
    pub accepted: u64,
    /// Whether a fork happened before this step was recorded.
    pub forked: bool,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Run name from the configuration.
    pub name: String,
    /// Identity of the log the run recorded into.
    pub log_id: LogId,
    /// Base seed the producers were derived from.
    pub seed: u64,
    /// Producers alive at the end of the run (forks included).
    pub producers: usize,
    /// Steps executed.
    pub steps: u64,
    /// Forks performed.
    pub forks: u64,
    /// Values the log accepted.
    pub accepted: u64,
    /// Values the log rejected.
    pub rejected: u64,
    /// Physical layout of the final log.
    pub stats: StorageStats,
    /// Whether integrity verification found no anomaly.
    pub intact: bool,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the run.
    pub finished_at: DateTime<Utc>,
}

/// Result of the simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// Summary of the run.
    pub summary: RunSummary,
    /// Instances in the order they were created (forks last).
    pub instances: Vec<ProducerId>,
    /// Channel every producer recorded into.
    pub channel: Channel<String>,
    /// Verification result of the closed log.
    pub integrity: IntegrityResult<ProducerId, String>,
    /// The closed log.
    pub log: SimulationLog,
}

/// Callback invoked after each step completes.
pub trait StepCallback {
    /// Called after every producer has emitted for `summary.step`.
    fn on_step(&mut self, summary: &StepSummary);
}

/// A no-op step callback.
pub struct NoOpCallback;

impl StepCallback for NoOpCallback {
    fn on_step(&mut self, _summary: &StepSummary) {}
}

/// Run the simulation described by `config`.
///
/// # Errors
///
/// Returns [`RunnerError`] if the configuration is invalid, a producer
/// cannot advance, or the log refuses a lifecycle change or fork.
pub fn run_simulation(
    config: &SimulationConfig,
    callback: &mut dyn StepCallback,
) -> Result<SimulationResult, RunnerError> {
    config.validate()?;
    let started_at = Utc::now();

    let matrix = Rc::new(TransitionMatrix::from_config(&config.producers)?);
    let channel = config
        .run
        .channel
        .clone()
        .map_or(Channel::Implicit, Channel::Named);

    let mut producers: Vec<MarkovProducer> = (0..config.producers.count)
        .map(|i| {
            let offset = i.checked_rem(config.producers.distinct_seeds).unwrap_or(0);
            let seed = config.run.seed.wrapping_add(u64::from(offset));
            MarkovProducer::new(seed, Rc::clone(&matrix), channel.clone())
        })
        .collect();

    let collector = StateCollector::new();
    {
        let mut bindings: Vec<&mut dyn Producer<ProducerId, u32, String>> = producers
            .iter_mut()
            .map(|p| p as &mut dyn Producer<ProducerId, u32, String>)
            .collect();
        collector.open(&mut bindings)?;
    }

    info!(
        run = config.run.name,
        log = %collector.id(),
        seed = config.run.seed,
        producers = producers.len(),
        steps = config.run.steps,
        fork_every = config.run.fork_every,
        "Simulation starting"
    );

    let mut forks: u64 = 0;
    let mut accepted: u64 = 0;
    let mut rejected: u64 = 0;

    for step in 0..config.run.steps {
        let forked = config
            .run
            .fork_every
            .is_some_and(|every| step > 0 && step.checked_rem(every) == Some(0));
        if forked {
            let fork_seed = config
                .run
                .seed
                .wrapping_add(u64::from(config.producers.distinct_seeds))
                .wrapping_add(forks);
            let child = fork_producer(&collector, &channel, &producers, forks, fork_seed)?;
            producers.push(child);
            forks = forks.saturating_add(1);
        }

        let mut accepted_now: u64 = 0;
        for producer in &mut producers {
            let count = producer.emit()?;
            if count == 0 {
                rejected = rejected.saturating_add(1);
            }
            accepted_now = accepted_now.saturating_add(u64::try_from(count).unwrap_or(u64::MAX));
        }
        accepted = accepted.saturating_add(accepted_now);

        callback.on_step(&StepSummary {
            step,
            producers: producers.len(),
            accepted: accepted_now,
            forked,
        });
    }

    collector.close()?;
    let instances: Vec<ProducerId> = producers.iter().map(MarkovProducer::id).collect();
    drop(producers);
    let log = collector
        .into_log()
        .map_err(|_shared| RunnerError::Internal("collector still shared after the run"))?;

    let stats = log.stats();
    let integrity = log.verify();
    if let IntegrityResult::Anomalies(anomalies) = &integrity {
        warn!(log = %log.id(), anomalies = anomalies.len(), "Integrity verification failed");
    }

    let summary = RunSummary {
        name: config.run.name.clone(),
        log_id: log.id(),
        seed: config.run.seed,
        producers: instances.len(),
        steps: config.run.steps,
        forks,
        accepted,
        rejected,
        stats,
        intact: integrity.is_intact(),
        started_at,
        finished_at: Utc::now(),
    };

    Ok(SimulationResult {
        summary,
        instances,
        channel,
        integrity,
        log,
    })
}

/// Fork the producer chosen round-robin by `forks` and alias its history.
fn fork_producer(
    collector: &StateCollector,
    channel: &Channel<String>,
    producers: &[MarkovProducer],
    forks: u64,
    seed: u64,
) -> Result<MarkovProducer, RunnerError> {
    let count = u64::try_from(producers.len()).unwrap_or(u64::MAX);
    let index = forks
        .checked_rem(count)
        .and_then(|i| usize::try_from(i).ok())
        .ok_or(RunnerError::Internal("no producer to fork"))?;
    let parent = producers
        .get(index)
        .ok_or(RunnerError::Internal("fork parent out of range"))?;

    let child = parent.fork(seed);
    let aliased = collector.try_redirect_in(channel, &parent.id(), &child.id())?;
    debug!(
        parent = %parent.id(),
        child = %child.id(),
        step = parent.step(),
        chunks = aliased,
        "Producer forked"
    );
    Ok(child)
}

/// Log the end of a run.
pub fn log_simulation_end(summary: &RunSummary) {
    let elapsed_ms = summary
        .finished_at
        .signed_duration_since(summary.started_at)
        .num_milliseconds();
    info!(
        run = summary.name,
        log = %summary.log_id,
        producers = summary.producers,
        steps = summary.steps,
        forks = summary.forks,
        accepted = summary.accepted,
        rejected = summary.rejected,
        tapes = summary.stats.tapes,
        raw_chunks = summary.stats.raw_chunks,
        ref_chunks = summary.stats.ref_chunks,
        logical_values = summary.stats.logical_values,
        stored_values = summary.stats.stored_values,
        saved_values = summary.stats.saved_values(),
        stored_permille = summary.stats.stored_permille(),
        intact = summary.intact,
        elapsed_ms,
        "Simulation ended"
    );
}
