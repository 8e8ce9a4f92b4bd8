//! Chunked, deduplicating append log of producer state sequences.
//!
//! Producers ("instances") emit one discrete state per step. Different
//! producers frequently emit exactly the same value at the same step; the
//! log notices this while recording and keeps a single physical copy, with
//! every duplicate stored as a reference into it.
//!
//! # Architecture
//!
//! - [`chunk`] -- Raw (owning) and Ref (borrowing) chunks and the arena
//!   holding every Raw chunk.
//! - [`tape`] -- The ordered, contiguous chunk list of one instance.
//! - [`log`] -- The [`StateLog`]: lifecycle, `put`, `playback`, `retrieve`,
//!   `length` and `redirect`.
//! - [`playback`] -- The lazy [`Playback`] iterator.
//! - [`collector`] -- The shared [`Collector`] handle and the [`Producer`]
//!   binding trait.
//! - [`integrity`] -- Structural verification of every tape.
//! - [`stats`] -- Storage accounting.
//!
//! # Usage
//!
//! ```
//! use statetape_log::{Chunk, StateLog};
//!
//! let mut log: StateLog<&str, u32> = StateLog::new();
//! assert!(log.put(&"a", 0, 5));
//! assert!(log.put(&"a", 1, 5));
//! assert!(log.put(&"b", 0, 5));
//! assert!(log.put(&"b", 1, 5));
//!
//! // "b" is stored as a single reference into the chunk owned by "a".
//! let b = log.tape(&"b").map(|t| t.chunks().to_vec()).unwrap_or_default();
//! assert!(matches!(b.as_slice(), [Chunk::Ref(r)] if r.length == 2));
//!
//! let replay: Vec<u32> = log.playback(&"b").into_iter().flatten().copied().collect();
//! assert_eq!(replay, vec![5, 5]);
//! ```

pub mod chunk;
pub mod collector;
pub mod integrity;
pub mod log;
pub mod playback;
pub mod stats;
pub mod tape;

// Re-export primary types at crate root.
pub use chunk::{Chunk, RawArena, RawChunk, RawId, RefChunk};
pub use collector::{Collector, Producer};
pub use integrity::{AnomalyKind, IntegrityResult, TapeAnomaly};
pub use log::{Channel, Placement, StateLog};
pub use playback::Playback;
pub use stats::StorageStats;
pub use tape::Tape;

use core::cell::{BorrowError, BorrowMutError};

use statetape_types::Step;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a write or redirect was not carried out.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log is closed to new writes.
    #[error("log is closed to new writes")]
    Closed,

    /// The step does not continue the instance's tape.
    #[error("step {actual} does not continue the tape (expected step {expected})")]
    StepOutOfOrder {
        /// The only step the tape accepts next.
        expected: Step,
        /// The step that was supplied.
        actual: Step,
    },

    /// The step is the last representable one; the tape could not be
    /// continued past it.
    #[error("step {step} leaves no room for a following step")]
    StepOverflow {
        /// The step that was supplied.
        step: Step,
    },

    /// No tape is recorded for the requested channel and instance.
    #[error("no tape recorded for the requested channel and instance")]
    UnknownTape,

    /// The source tape starts after the destination's last step.
    #[error("source tape starts at step {source_start}, past destination end {destination_end}")]
    RedirectGap {
        /// One past the destination's last step.
        destination_end: Step,
        /// First step of the source tape.
        source_start: Step,
    },

    /// The shared log is already borrowed (a write from inside a read or
    /// another write).
    #[error("log is busy: {source}")]
    Busy {
        /// The underlying borrow error.
        #[from]
        source: BorrowMutError,
    },

    /// The shared log is being written to and cannot be read.
    #[error("log is being written: {source}")]
    BusyRead {
        /// The underlying borrow error.
        #[from]
        source: BorrowError,
    },

    /// An internal error that should not occur in normal operation.
    #[error("internal log error: {0}")]
    Internal(&'static str),
}
