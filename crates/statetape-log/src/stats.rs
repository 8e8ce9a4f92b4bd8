//! Storage accounting: how much of what was written is physically stored.

use crate::chunk::Chunk;
use crate::log::StateLog;

/// Counts describing the physical layout of a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of channels holding tapes.
    pub channels: usize,
    /// Number of tapes across all channels.
    pub tapes: usize,
    /// Owning chunks across all tapes.
    pub raw_chunks: usize,
    /// Referencing chunks across all tapes.
    pub ref_chunks: usize,
    /// Values a full playback of every tape would yield.
    pub logical_values: u64,
    /// Values physically held in the Raw chunk arena.
    pub stored_values: u64,
}

impl StorageStats {
    /// Values served by reference instead of being stored again.
    pub const fn saved_values(&self) -> u64 {
        self.logical_values.saturating_sub(self.stored_values)
    }

    /// Stored values per thousand logical values (1000 = no deduplication).
    ///
    /// Returns `None` for an empty log.
    pub fn stored_permille(&self) -> Option<u64> {
        self.stored_values
            .checked_mul(1000)?
            .checked_div(self.logical_values)
    }
}

impl<I, S, C> StateLog<I, S, C> {
    /// Compute storage statistics over every tape.
    pub fn stats(&self) -> StorageStats {
        let mut stats = StorageStats {
            channels: self.channels().count(),
            stored_values: self
                .arena()
                .iter()
                .fold(0_u64, |total, (_, raw)| total.saturating_add(raw.len())),
            ..StorageStats::default()
        };

        for (_, _, tape) in self.tapes() {
            stats.tapes = stats.tapes.saturating_add(1);
            for chunk in tape.chunks() {
                let length = chunk.span(self.arena()).map_or(0, |(_, length)| length);
                stats.logical_values = stats.logical_values.saturating_add(length);
                match chunk {
                    Chunk::Raw(_) => stats.raw_chunks = stats.raw_chunks.saturating_add(1),
                    Chunk::Ref(_) => stats.ref_chunks = stats.ref_chunks.saturating_add(1),
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_has_no_ratio() {
        let log: StateLog<u8, u8> = StateLog::new();
        let stats = log.stats();
        assert_eq!(stats, StorageStats::default());
        assert_eq!(stats.stored_permille(), None);
    }

    #[test]
    fn duplicates_are_counted_as_saved() {
        let mut log: StateLog<u8, u8> = StateLog::new();
        for step in 0..4 {
            assert!(log.put(&1, step, 3));
            assert!(log.put(&2, step, 3));
        }
        assert!(log.put(&3, 0, 9));

        let stats = log.stats();
        assert_eq!(stats.channels, 1);
        assert_eq!(stats.tapes, 3);
        assert_eq!(stats.raw_chunks, 2);
        assert_eq!(stats.ref_chunks, 1);
        assert_eq!(stats.logical_values, 9);
        assert_eq!(stats.stored_values, 5);
        assert_eq!(stats.saved_values(), 4);
        assert_eq!(stats.stored_permille(), Some(555));
    }
}
