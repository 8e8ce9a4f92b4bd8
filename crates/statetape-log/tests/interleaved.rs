//! Seeded random interleavings of writes, redirects and lifecycle changes.
//!
//! Every run keeps a plain `(first step, values)` record per instance next
//! to the log and checks after each operation that the log reads back
//! exactly that record, whatever mix of Raw and Ref chunks it chose.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use statetape_log::{Chunk, LogError, StateLog};

type Log = StateLog<u32, u8>;

/// What each instance is expected to read back: first step and values.
type Expected = BTreeMap<u32, (u64, Vec<u8>)>;

const INSTANCES: u32 = 6;
const ROUNDS: u64 = 200;
const OPERATIONS: usize = 80;

fn end_of(entry: &(u64, Vec<u8>)) -> u64 {
    entry.0 + entry.1.len() as u64
}

/// Apply one random write to both the log and the expectation.
fn random_put(log: &mut Log, expected: &mut Expected, rng: &mut SmallRng) {
    let instance = rng.random_range(0..INSTANCES);
    // A tiny alphabet makes coinciding values frequent.
    let state = rng.random_range(0..3_u8);
    match expected.get_mut(&instance) {
        Some(entry) => {
            let step = end_of(entry);
            if log.is_open() {
                assert!(log.put(&instance, step, state));
                entry.1.push(state);
            } else {
                assert!(matches!(log.try_put(&instance, step, state), Err(LogError::Closed)));
            }
        }
        None => {
            let start = rng.random_range(0..4_u64);
            if log.is_open() {
                assert!(log.put(&instance, start, state));
                expected.insert(instance, (start, vec![state]));
            } else {
                assert!(!log.put(&instance, start, state));
            }
        }
    }
}

/// A write at a step that does not continue the tape.
fn misplaced_put(log: &mut Log, expected: &Expected, rng: &mut SmallRng) {
    if expected.is_empty() {
        return;
    }
    let index = rng.random_range(0..expected.len());
    let Some((&instance, entry)) = expected.iter().nth(index) else {
        return;
    };
    let end = end_of(entry);
    let step = end + rng.random_range(1..5_u64);
    let result = log.try_put(&instance, step, 0);
    if log.is_open() {
        assert!(
            matches!(result, Err(LogError::StepOutOfOrder { expected, actual }) if expected == end && actual == step)
        );
    } else {
        assert!(matches!(result, Err(LogError::Closed)));
    }
}

/// Apply one random redirect to both the log and the expectation.
fn random_redirect(log: &mut Log, expected: &mut Expected, rng: &mut SmallRng) {
    let source = rng.random_range(0..INSTANCES);
    let destination = rng.random_range(0..INSTANCES);
    let result = log.try_redirect(&source, &destination);

    let Some(src) = expected.get(&source).cloned() else {
        assert!(matches!(result, Err(LogError::UnknownTape)));
        return;
    };
    if source == destination {
        assert_eq!(result.ok(), Some(0));
        return;
    }

    match expected.get_mut(&destination) {
        None => {
            assert!(result.is_ok());
            expected.insert(destination, src);
        }
        Some(dst) => {
            let dst_end = end_of(dst);
            if src.0 > dst_end {
                assert!(matches!(
                    result,
                    Err(LogError::RedirectGap { destination_end, source_start })
                        if destination_end == dst_end && source_start == src.0
                ));
            } else {
                assert!(result.is_ok());
                let skip = (dst_end - src.0) as usize;
                dst.1.extend(src.1.iter().skip(skip));
            }
        }
    }
}

/// The log reads back exactly what was recorded, and is well-formed.
fn assert_matches(log: &Log, expected: &Expected, seed: u64) {
    for (instance, (start, values)) in expected {
        let replay: Vec<u8> = log.playback(instance).unwrap().copied().collect();
        assert_eq!(&replay, values, "seed {seed}, instance {instance}");

        let end = start + values.len() as u64;
        assert_eq!(log.length(instance), Some(end), "seed {seed}");
        let tape = log.tape(instance).unwrap();
        assert_eq!(tape.start(log.arena()), Some(*start), "seed {seed}");

        for (step, value) in (*start..).zip(values) {
            assert_eq!(log.retrieve(instance, step), Some(value), "seed {seed}");
        }
        assert_eq!(log.retrieve(instance, end), None);
        if *start > 0 {
            assert_eq!(log.retrieve(instance, start - 1), None);
        }
    }

    let recorded = log.tapes().count();
    assert_eq!(recorded, expected.len(), "seed {seed}");
    let logical: u64 = expected.values().map(|(_, v)| v.len() as u64).sum();
    let stats = log.stats();
    assert_eq!(stats.logical_values, logical, "seed {seed}");
    assert!(stats.stored_values <= logical);
    assert!(log.verify().is_intact(), "seed {seed}");
}

#[test]
fn random_interleavings_read_back_exactly() {
    for seed in 0..ROUNDS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut log = Log::new();
        let mut expected = Expected::new();

        for _ in 0..OPERATIONS {
            match rng.random_range(0..20) {
                0..=12 => random_put(&mut log, &mut expected, &mut rng),
                13..=16 => random_redirect(&mut log, &mut expected, &mut rng),
                17..=18 => misplaced_put(&mut log, &expected, &mut rng),
                _ => {
                    if log.is_open() {
                        log.close();
                    } else {
                        log.open();
                    }
                }
            }
            assert_matches(&log, &expected, seed);
        }
    }
}

#[test]
fn redirected_tapes_hold_only_references() {
    for seed in 0..ROUNDS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut log = Log::new();
        let mut expected = Expected::new();
        for _ in 0..OPERATIONS {
            random_put(&mut log, &mut expected, &mut rng);
        }

        let Some(&source) = expected.keys().next() else {
            continue;
        };
        let alias = INSTANCES + 1;
        assert!(log.redirect(&source, &alias));
        assert!(log.tape(&alias).unwrap().chunks().iter().all(Chunk::is_ref));
        assert_eq!(
            log.playback(&alias).unwrap().collect::<Vec<_>>(),
            log.playback(&source).unwrap().collect::<Vec<_>>()
        );
        assert!(log.verify().is_intact(), "seed {seed}");
    }
}
