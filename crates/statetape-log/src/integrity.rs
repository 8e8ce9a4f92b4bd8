//! Structural verification of every tape in a log.
//!
//! The write and redirect paths keep tapes well-formed by construction;
//! this check walks the whole log and reports anything that breaks the
//! tape invariants:
//!
//! ```text
//! chunk[n].start == chunk[n - 1].start + chunk[n - 1].length
//! ```
//!
//! plus every `Ref` range lying inside its target, every handle resolving,
//! and every Raw chunk being owned by exactly one tape.

use std::collections::BTreeMap;

use statetape_types::Step;

use crate::chunk::{Chunk, RawId};
use crate::log::{Channel, StateLog};

/// What is wrong with a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    /// The chunk does not start where the previous one ended.
    Discontinuity {
        /// End of the previous chunk.
        expected: Step,
        /// Start of this chunk.
        actual: Step,
    },
    /// The chunk covers no steps.
    EmptyChunk,
    /// The chunk's handle does not resolve to a Raw chunk.
    DanglingRaw(RawId),
    /// A `Ref` borrows values its target does not hold.
    RefOutOfBounds(RawId),
    /// The Raw chunk is owned by more than one tape position.
    SharedRaw(RawId),
}

/// A single integrity violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeAnomaly<I, C> {
    /// Channel of the offending tape.
    pub channel: Channel<C>,
    /// Instance of the offending tape.
    pub instance: I,
    /// Position of the offending chunk within the tape.
    pub chunk_index: usize,
    /// The violation.
    pub kind: AnomalyKind,
}

/// The result of verifying a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityResult<I, C> {
    /// Every tape is well-formed.
    Intact,
    /// One or more violations were found.
    Anomalies(Vec<TapeAnomaly<I, C>>),
}

impl<I, C> IntegrityResult<I, C> {
    /// Whether no violation was found.
    pub const fn is_intact(&self) -> bool {
        matches!(self, Self::Intact)
    }
}

impl<I: Clone, S, C: Clone> StateLog<I, S, C> {
    /// Verify the structural invariants of every tape.
    pub fn verify(&self) -> IntegrityResult<I, C> {
        let arena = self.arena();
        let mut anomalies = Vec::new();
        let mut owners: BTreeMap<RawId, usize> = BTreeMap::new();

        for (channel, instance, tape) in self.tapes() {
            let mut report = |chunk_index: usize, kind: AnomalyKind| {
                anomalies.push(TapeAnomaly {
                    channel: channel.clone(),
                    instance: instance.clone(),
                    chunk_index,
                    kind,
                });
            };

            let mut expected: Option<Step> = None;
            for (index, chunk) in tape.chunks().iter().enumerate() {
                let Some((start, length)) = chunk.span(arena) else {
                    report(index, AnomalyKind::DanglingRaw(chunk.target()));
                    expected = None;
                    continue;
                };

                if length == 0 {
                    report(index, AnomalyKind::EmptyChunk);
                }
                if let Some(end) = expected {
                    if start != end {
                        report(
                            index,
                            AnomalyKind::Discontinuity {
                                expected: end,
                                actual: start,
                            },
                        );
                    }
                }

                match chunk {
                    Chunk::Raw(id) => {
                        let count = owners.entry(*id).or_insert(0);
                        *count = count.saturating_add(1);
                        if *count > 1 {
                            report(index, AnomalyKind::SharedRaw(*id));
                        }
                    }
                    Chunk::Ref(r) => {
                        if chunk.values(arena).is_none() {
                            report(index, AnomalyKind::RefOutOfBounds(r.target));
                        }
                    }
                }

                expected = start.checked_add(length);
            }
        }

        if anomalies.is_empty() {
            IntegrityResult::Intact
        } else {
            IntegrityResult::Anomalies(anomalies)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chunk::RefChunk;

    #[test]
    fn written_log_is_intact() {
        let mut log: StateLog<&str, u32> = StateLog::new();
        for (step, (a, b)) in (0..).zip([(1, 1), (2, 2), (3, 0), (4, 4)]) {
            assert!(log.put(&"a", step, a));
            assert!(log.put(&"b", step, b));
        }
        assert!(log.redirect(&"b", &"c"));
        assert!(log.verify().is_intact());
    }

    #[test]
    fn empty_log_is_intact() {
        let log: StateLog<&str, u32> = StateLog::new();
        assert_eq!(log.verify(), IntegrityResult::Intact);
    }

    #[test]
    fn corrupted_tapes_are_reported() {
        let mut log: StateLog<&str, u32> = StateLog::new();
        assert!(log.put(&"a", 0, 1));
        let raw = log
            .tape(&"a")
            .and_then(|t| t.last())
            .map(Chunk::target)
            .unwrap();

        // Hand-build a tape that breaks every rule at once.
        let tape = log.tape_mut_for_test(&"bad");
        tape.push(Chunk::Raw(raw));
        tape.push(Chunk::Ref(RefChunk {
            start: 3,
            target: raw,
            length: 4,
        }));

        let found = match log.verify() {
            IntegrityResult::Anomalies(found) => found,
            IntegrityResult::Intact => Vec::new(),
        };
        let kinds: Vec<AnomalyKind> = found.into_iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AnomalyKind::SharedRaw(raw),
                AnomalyKind::Discontinuity {
                    expected: 1,
                    actual: 3
                },
                AnomalyKind::RefOutOfBounds(raw),
            ]
        );
    }
}
