//! Discrete Markov-chain producers.
//!
//! A [`MarkovProducer`] walks a [`TransitionMatrix`] of integer weights
//! with its own seeded RNG and records its current state at every step
//! into each collector it has been bound to. Two producers started from
//! the same seed walk the same path, which is exactly the duplication the
//! log is built to absorb.

use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use statetape_log::{Channel, Collector, LogError, Producer};
use statetape_types::{ProducerId, Step};
use tracing::{debug, warn};

use crate::config::ProducerConfig;

/// Collector type the simulation records into.
pub type StateCollector = Collector<ProducerId, u32, String>;

/// Errors raised while building or walking a chain.
#[derive(Debug, thiserror::Error)]
pub enum MarkovError {
    /// The matrix has no states.
    #[error("transition matrix has no states")]
    Empty,

    /// A row does not have one weight per state.
    #[error("row {row} has {actual} weights, expected {expected}")]
    RowLength {
        /// Index of the offending row.
        row: usize,
        /// Number of states.
        expected: usize,
        /// Number of weights found.
        actual: usize,
    },

    /// Every weight in a row is zero, so the state has no successor.
    #[error("row {row} has no outgoing weight")]
    ZeroRow {
        /// Index of the offending row.
        row: usize,
    },

    /// A state outside the matrix was requested.
    #[error("state {state} is outside the transition matrix")]
    UnknownState {
        /// The requested state.
        state: u32,
    },

    /// Step or weight arithmetic overflowed.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

// ---------------------------------------------------------------------------
// Transition matrix
// ---------------------------------------------------------------------------

/// Square matrix of integer transition weights.
///
/// Row `i` holds the relative weight of moving from state `i` to every
/// state. Weights are integers so a walk is reproducible on every platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionMatrix {
    rows: Vec<Vec<u32>>,
    totals: Vec<u64>,
}

impl TransitionMatrix {
    /// Build a matrix from explicit rows.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError`] if the matrix is empty, not square, or has
    /// a row whose weights are all zero.
    pub fn new(rows: Vec<Vec<u32>>) -> Result<Self, MarkovError> {
        if rows.is_empty() {
            return Err(MarkovError::Empty);
        }
        let expected = rows.len();
        let mut totals = Vec::with_capacity(expected);
        for (row, weights) in rows.iter().enumerate() {
            if weights.len() != expected {
                return Err(MarkovError::RowLength {
                    row,
                    expected,
                    actual: weights.len(),
                });
            }
            let total = weights
                .iter()
                .try_fold(0_u64, |acc, w| acc.checked_add(u64::from(*w)))
                .ok_or(MarkovError::Overflow("row total"))?;
            if total == 0 {
                return Err(MarkovError::ZeroRow { row });
            }
            totals.push(total);
        }
        Ok(Self { rows, totals })
    }

    /// A "sticky" chain: each state keeps `stay` weight on itself and
    /// spreads `move_weight` to every other state.
    ///
    /// # Errors
    ///
    /// See [`TransitionMatrix::new`].
    pub fn sticky(states: u32, stay: u32, move_weight: u32) -> Result<Self, MarkovError> {
        let size = usize::try_from(states).map_err(|_e| MarkovError::Overflow("state count"))?;
        let rows = (0..size)
            .map(|from| {
                (0..size)
                    .map(|to| if to == from { stay } else { move_weight })
                    .collect()
            })
            .collect();
        Self::new(rows)
    }

    /// Build the matrix described by a producer configuration.
    ///
    /// Explicit `transitions` win over the sticky weights.
    ///
    /// # Errors
    ///
    /// See [`TransitionMatrix::new`].
    pub fn from_config(config: &ProducerConfig) -> Result<Self, MarkovError> {
        if config.transitions.is_empty() {
            Self::sticky(config.states, config.stay_weight, config.move_weight)
        } else {
            Self::new(config.transitions.clone())
        }
    }

    /// Number of states.
    pub fn states(&self) -> u32 {
        u32::try_from(self.rows.len()).unwrap_or(u32::MAX)
    }

    /// Draw the successor of `from`.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError::UnknownState`] if `from` is not a state of
    /// this matrix.
    pub fn next<R: Rng>(&self, from: u32, rng: &mut R) -> Result<u32, MarkovError> {
        let unknown = MarkovError::UnknownState { state: from };
        let Ok(index) = usize::try_from(from) else {
            return Err(unknown);
        };
        let (Some(weights), Some(&total)) = (self.rows.get(index), self.totals.get(index)) else {
            return Err(unknown);
        };

        let roll = rng.random_range(0..total);
        let mut cumulative: u64 = 0;
        for (to, weight) in weights.iter().enumerate() {
            cumulative = cumulative.saturating_add(u64::from(*weight));
            if roll < cumulative {
                return u32::try_from(to).map_err(|_e| MarkovError::Overflow("state index"));
            }
        }
        Err(MarkovError::Overflow("cumulative weight"))
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// A producer emitting the states of a seeded Markov walk.
#[derive(Debug)]
pub struct MarkovProducer {
    id: ProducerId,
    state: u32,
    step: Step,
    rng: SmallRng,
    matrix: Rc<TransitionMatrix>,
    channel: Channel<String>,
    collectors: Vec<StateCollector>,
}

impl MarkovProducer {
    /// Create a producer at step 0 in a state drawn from `seed`.
    pub fn new(seed: u64, matrix: Rc<TransitionMatrix>, channel: Channel<String>) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let state = rng.random_range(0..matrix.states());
        Self {
            id: ProducerId::new(),
            state,
            step: 0,
            rng,
            matrix,
            channel,
            collectors: Vec::new(),
        }
    }

    /// Identity under which this producer's tape is recorded.
    pub const fn id(&self) -> ProducerId {
        self.id
    }

    /// Current state (the value the next [`emit`](Self::emit) records).
    pub const fn state(&self) -> u32 {
        self.state
    }

    /// Step the next [`emit`](Self::emit) records at.
    pub const fn step(&self) -> Step {
        self.step
    }

    /// Channel this producer records into.
    pub const fn channel(&self) -> &Channel<String> {
        &self.channel
    }

    /// Collectors this producer is bound to.
    pub fn collectors(&self) -> &[StateCollector] {
        &self.collectors
    }

    /// Record the current state in every bound collector, then advance.
    ///
    /// The producer's own clock moves on whether or not a collector
    /// accepted the value. Returns how many collectors accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`MarkovError`] if the walk cannot advance.
    pub fn emit(&mut self) -> Result<usize, MarkovError> {
        let mut accepted: usize = 0;
        for collector in &self.collectors {
            match collector.try_put_in(&self.channel, &self.id, self.step, self.state) {
                Ok(placement) => {
                    accepted = accepted.saturating_add(1);
                    if placement.is_reference() {
                        debug!(producer = %self.id, step = self.step, raw = %placement.raw(), "state deduplicated");
                    }
                }
                Err(LogError::Closed) => {
                    debug!(producer = %self.id, log = %collector.id(), "collector closed, state dropped");
                }
                Err(e) => {
                    warn!(producer = %self.id, log = %collector.id(), step = self.step, error = %e, "state rejected");
                }
            }
        }

        self.state = self.matrix.next(self.state, &mut self.rng)?;
        self.step = self
            .step
            .checked_add(1)
            .ok_or(MarkovError::Overflow("step"))?;
        Ok(accepted)
    }

    /// Split off a new producer at the current position.
    ///
    /// The fork gets a fresh identity and RNG seed but continues from the
    /// same state and step, bound to the same collectors. Its history is
    /// expected to be aliased with [`Collector::try_redirect_in`].
    pub fn fork(&self, seed: u64) -> Self {
        Self {
            id: ProducerId::new(),
            state: self.state,
            step: self.step,
            rng: SmallRng::seed_from_u64(seed),
            matrix: Rc::clone(&self.matrix),
            channel: self.channel.clone(),
            collectors: self.collectors.clone(),
        }
    }
}

impl Producer<ProducerId, u32, String> for MarkovProducer {
    fn bind_collector(&mut self, collector: &StateCollector) {
        if !self.collectors.contains(collector) {
            self.collectors.push(collector.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sticky() -> Rc<TransitionMatrix> {
        Rc::new(TransitionMatrix::sticky(3, 6, 1).unwrap())
    }

    #[test]
    fn malformed_matrices_are_rejected() {
        assert!(matches!(TransitionMatrix::new(vec![]), Err(MarkovError::Empty)));
        assert!(matches!(
            TransitionMatrix::new(vec![vec![1, 1], vec![1]]),
            Err(MarkovError::RowLength { row: 1, expected: 2, actual: 1 })
        ));
        assert!(matches!(
            TransitionMatrix::new(vec![vec![1, 0], vec![0, 0]]),
            Err(MarkovError::ZeroRow { row: 1 })
        ));
    }

    #[test]
    fn absorbing_state_never_leaves() {
        let matrix = TransitionMatrix::new(vec![vec![1, 0], vec![1, 1]]).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(matrix.next(0, &mut rng).unwrap(), 0);
        }
        assert!(matches!(
            matrix.next(2, &mut rng),
            Err(MarkovError::UnknownState { state: 2 })
        ));
    }

    #[test]
    fn walks_stay_within_the_state_space() {
        let matrix = sticky();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut state = 0;
        for _ in 0..500 {
            state = matrix.next(state, &mut rng).unwrap();
            assert!(state < 3);
        }
    }

    #[test]
    fn same_seed_walks_the_same_path() {
        for seed in [1_u64, 42, 999] {
            let a = MarkovProducer::new(seed, sticky(), Channel::Implicit);
            let b = MarkovProducer::new(seed, sticky(), Channel::Implicit);
            let mut producers = [a, b];
            let collector = StateCollector::new();
            {
                let [a, b] = &mut producers;
                let mut refs: [&mut dyn Producer<ProducerId, u32, String>; 2] = [a, b];
                collector.open(&mut refs).unwrap();
            }
            for _ in 0..50 {
                for producer in &mut producers {
                    assert_eq!(producer.emit().unwrap(), 1);
                }
            }
            let [a, b] = &producers;
            let first = collector.playback_in(&Channel::Implicit, &a.id()).unwrap();
            let second = collector.playback_in(&Channel::Implicit, &b.id()).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.map(|states| states.len()), Some(50));

            let stats = collector.read(|log| log.stats()).unwrap();
            assert_eq!(stats.stored_values, 50);
            assert_eq!(stats.logical_values, 100);
        }
    }

    #[test]
    fn binding_twice_records_once() {
        let mut producer = MarkovProducer::new(3, sticky(), Channel::named("weather".to_owned()));
        let collector = StateCollector::new();
        producer.bind_collector(&collector);
        producer.bind_collector(&collector);
        assert_eq!(producer.collectors().len(), 1);

        assert_eq!(producer.emit().unwrap(), 1);
        assert_eq!(producer.step(), 1);
        let channel = Channel::named("weather".to_owned());
        assert_eq!(collector.length_in(&channel, &producer.id()).unwrap(), Some(1));
        assert_eq!(collector.length_in(&Channel::Implicit, &producer.id()).unwrap(), None);
    }

    #[test]
    fn closed_collector_drops_states_but_clock_advances() {
        let mut producer = MarkovProducer::new(5, sticky(), Channel::Implicit);
        let collector = StateCollector::new();
        producer.bind_collector(&collector);
        collector.close().unwrap();

        assert_eq!(producer.emit().unwrap(), 0);
        assert_eq!(producer.step(), 1);
        assert_eq!(collector.length_in(&Channel::Implicit, &producer.id()).unwrap(), None);
    }

    #[test]
    fn fork_continues_from_the_parent_position() {
        let mut parent = MarkovProducer::new(11, sticky(), Channel::Implicit);
        let collector = StateCollector::new();
        parent.bind_collector(&collector);
        for _ in 0..10 {
            parent.emit().unwrap();
        }

        let mut child = parent.fork(12);
        assert_ne!(child.id(), parent.id());
        assert_eq!(child.step(), parent.step());
        assert_eq!(child.state(), parent.state());
        assert_eq!(child.collectors(), parent.collectors());
        assert_eq!(child.channel(), parent.channel());

        let aliased = collector
            .try_redirect_in(&Channel::Implicit, &parent.id(), &child.id())
            .unwrap();
        assert!(aliased >= 1);
        assert_eq!(child.emit().unwrap(), 1);
        assert_eq!(collector.length_in(&Channel::Implicit, &child.id()).unwrap(), Some(11));
    }
}
