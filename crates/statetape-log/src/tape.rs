//! A tape: the ordered chunk history of one (channel, instance) pair.
//!
//! Chunks are kept sorted by start step and contiguous, so the chunk
//! covering a given step is found by binary search over chunk starts.

use statetape_types::Step;

use crate::LogError;
use crate::chunk::{Chunk, RawArena, RawId, RefChunk};

/// Ordered, contiguous list of chunks recorded for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tape {
    chunks: Vec<Chunk>,
}

impl Tape {
    /// Create an empty tape.
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// All chunks, in step order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The most recently appended chunk.
    pub fn last(&self) -> Option<&Chunk> {
        self.chunks.last()
    }

    /// First recorded step.
    pub fn start<S>(&self, arena: &RawArena<S>) -> Option<Step> {
        self.chunks.first()?.span(arena).map(|(start, _)| start)
    }

    /// One past the last recorded step.
    pub fn end<S>(&self, arena: &RawArena<S>) -> Option<Step> {
        self.chunks.last()?.end(arena)
    }

    /// The chunk whose range covers `step`.
    pub fn locate<S>(&self, step: Step, arena: &RawArena<S>) -> Option<&Chunk> {
        let after = self
            .chunks
            .partition_point(|c| c.span(arena).is_some_and(|(start, _)| start <= step));
        let chunk = self.chunks.get(after.checked_sub(1)?)?;
        chunk.covers(step, arena).then_some(chunk)
    }

    /// Value recorded at `step`, resolving references.
    pub fn value_at<'a, S>(&self, step: Step, arena: &'a RawArena<S>) -> Option<&'a S> {
        self.locate(step, arena)?.value_at(step, arena)
    }

    /// The Raw chunk of this tape that holds `state` at `step`, if any.
    ///
    /// Only owning chunks are candidates; a step covered by a `Ref` never
    /// matches.
    pub(crate) fn raw_match<S: PartialEq>(
        &self,
        step: Step,
        state: &S,
        arena: &RawArena<S>,
    ) -> Option<RawId> {
        match self.locate(step, arena)? {
            Chunk::Raw(id) => (arena.get(*id)?.get(step)? == state).then_some(*id),
            Chunk::Ref(_) => None,
        }
    }

    pub(crate) fn push(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    pub(crate) fn extend_last_ref(&mut self) -> Result<(), LogError> {
        match self.chunks.last_mut() {
            Some(Chunk::Ref(r)) => {
                r.length = r
                    .length
                    .checked_add(1)
                    .ok_or(LogError::Internal("reference length overflow"))?;
                Ok(())
            }
            _ => Err(LogError::Internal("last chunk is not a reference")),
        }
    }

    /// Describe this tape as references, starting at step `from`.
    ///
    /// With `from == None` every chunk is aliased. Otherwise chunks ending at
    /// or before `from` are skipped and a chunk straddling `from` is trimmed
    /// to start there.
    pub(crate) fn alias_from<S>(
        &self,
        from: Option<Step>,
        arena: &RawArena<S>,
    ) -> Result<Vec<RefChunk>, LogError> {
        let mut aliased = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            let (start, length) = chunk
                .span(arena)
                .ok_or(LogError::Internal("chunk refers to a missing raw chunk"))?;
            let end = start
                .checked_add(length)
                .ok_or(LogError::Internal("chunk end overflows"))?;
            let (start, length) = match from {
                Some(f) if end <= f => continue,
                Some(f) if start < f => (
                    f,
                    end.checked_sub(f)
                        .ok_or(LogError::Internal("trimmed chunk underflows"))?,
                ),
                _ => (start, length),
            };
            aliased.push(RefChunk {
                start,
                target: chunk.target(),
                length,
            });
        }

        if let (Some(destination_end), Some(first)) = (from, aliased.first()) {
            if first.start > destination_end {
                return Err(LogError::RedirectGap {
                    destination_end,
                    source_start: first.start,
                });
            }
        }

        Ok(aliased)
    }
}
