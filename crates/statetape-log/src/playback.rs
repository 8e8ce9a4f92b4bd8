//! Lazy reconstruction of a recorded sequence.

use core::iter::FusedIterator;

use crate::chunk::{Chunk, RawArena};

/// Iterator over the values of one tape, in step order.
///
/// Raw chunks yield their own values; `Ref` chunks yield the borrowed range
/// of their target. The iterator holds a shared borrow of the log, so the
/// tape cannot be written to while a playback is in progress. Asking the log
/// for a new playback starts again from the first step.
#[derive(Debug, Clone)]
pub struct Playback<'a, S> {
    chunks: core::slice::Iter<'a, Chunk>,
    arena: &'a RawArena<S>,
    current: core::slice::Iter<'a, S>,
}

impl<'a, S> Playback<'a, S> {
    pub(crate) fn new(chunks: &'a [Chunk], arena: &'a RawArena<S>) -> Self {
        Self {
            chunks: chunks.iter(),
            arena,
            current: Default::default(),
        }
    }
}

impl<'a, S> Iterator for Playback<'a, S> {
    type Item = &'a S;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(state) = self.current.next() {
                return Some(state);
            }
            let chunk = self.chunks.next()?;
            // A chunk that cannot be resolved contributes nothing; `verify`
            // reports it.
            self.current = chunk.values(self.arena).unwrap_or_default().iter();
        }
    }
}

impl<S> FusedIterator for Playback<'_, S> {}
