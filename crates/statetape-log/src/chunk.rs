//! Chunk data model: owning (`Raw`) and referencing (`Ref`) tape segments.
//!
//! Raw chunks live in a log-wide [`RawArena`] and are addressed by a
//! [`RawId`] handle. A tape stores only handles, so a `Ref` chunk pointing at
//! some other tape's data is just a `RawId` plus a range. The arena never
//! removes entries, which keeps every handle valid for the lifetime of the
//! owning log.

use statetape_types::Step;

/// Handle of a Raw chunk inside a [`RawArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawId(usize);

impl RawId {
    /// Position of the chunk in its arena.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for RawId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "raw#{}", self.0)
    }
}

/// An owning chunk: a contiguous run of state values starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk<S> {
    start: Step,
    data: Vec<S>,
}

impl<S> RawChunk<S> {
    /// Create a chunk holding a single value at `start`.
    pub fn new(start: Step, first: S) -> Self {
        Self {
            start,
            data: vec![first],
        }
    }

    /// Step of the first value in the chunk.
    pub const fn start(&self) -> Step {
        self.start
    }

    /// The recorded values, in step order.
    pub fn data(&self) -> &[S] {
        &self.data
    }

    /// Number of values held.
    pub fn len(&self) -> u64 {
        u64::try_from(self.data.len()).unwrap_or(u64::MAX)
    }

    /// Whether the chunk holds no values.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last step covered, or `None` on overflow.
    pub fn end(&self) -> Option<Step> {
        self.start.checked_add(self.len())
    }

    /// Value recorded at `step`, if the chunk covers it.
    pub fn get(&self, step: Step) -> Option<&S> {
        let offset = usize::try_from(step.checked_sub(self.start)?).ok()?;
        self.data.get(offset)
    }

    /// The `length` values starting at step `from`.
    ///
    /// Returns `None` if any part of the range lies outside the chunk.
    pub fn slice(&self, from: Step, length: u64) -> Option<&[S]> {
        let begin = usize::try_from(from.checked_sub(self.start)?).ok()?;
        let end = begin.checked_add(usize::try_from(length).ok()?)?;
        self.data.get(begin..end)
    }

    pub(crate) fn push(&mut self, state: S) {
        self.data.push(state);
    }
}

/// A referencing chunk: borrows `length` values of a Raw chunk.
///
/// The borrowed range inside the target is
/// `[start - target.start, start - target.start + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefChunk {
    /// Step of the first borrowed value.
    pub start: Step,
    /// The Raw chunk the values are borrowed from.
    pub target: RawId,
    /// Number of values borrowed.
    pub length: u64,
}

/// One segment of a tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// Owns its values (stored in the arena under this handle).
    Raw(RawId),
    /// Borrows a range of some Raw chunk.
    Ref(RefChunk),
}

impl Chunk {
    /// Whether this is an owning chunk.
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Whether this is a referencing chunk.
    pub const fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    /// The Raw chunk that physically holds this chunk's values.
    pub const fn target(&self) -> RawId {
        match self {
            Self::Raw(id) => *id,
            Self::Ref(r) => r.target,
        }
    }

    /// First step and number of steps covered, resolved against `arena`.
    pub fn span<S>(&self, arena: &RawArena<S>) -> Option<(Step, u64)> {
        match self {
            Self::Raw(id) => arena.get(*id).map(|raw| (raw.start(), raw.len())),
            Self::Ref(r) => Some((r.start, r.length)),
        }
    }

    /// One past the last step covered.
    pub fn end<S>(&self, arena: &RawArena<S>) -> Option<Step> {
        let (start, length) = self.span(arena)?;
        start.checked_add(length)
    }

    /// Whether `step` falls inside this chunk.
    pub fn covers<S>(&self, step: Step, arena: &RawArena<S>) -> bool {
        self.span(arena)
            .is_some_and(|(start, length)| step.checked_sub(start).is_some_and(|o| o < length))
    }

    /// All values covered by this chunk, resolving a `Ref` through its target.
    pub fn values<'a, S>(&self, arena: &'a RawArena<S>) -> Option<&'a [S]> {
        match self {
            Self::Raw(id) => arena.get(*id).map(RawChunk::data),
            Self::Ref(r) => arena.get(r.target)?.slice(r.start, r.length),
        }
    }

    /// Value at `step`, if covered.
    pub fn value_at<'a, S>(&self, step: Step, arena: &'a RawArena<S>) -> Option<&'a S> {
        if !self.covers(step, arena) {
            return None;
        }
        arena.get(self.target())?.get(step)
    }
}

/// Log-wide storage of every Raw chunk. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArena<S> {
    chunks: Vec<RawChunk<S>>,
}

impl<S> Default for RawArena<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> RawArena<S> {
    /// Create an empty arena.
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Number of Raw chunks stored.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no Raw chunk has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Look up a chunk by handle.
    pub fn get(&self, id: RawId) -> Option<&RawChunk<S>> {
        self.chunks.get(id.0)
    }

    /// All chunks with their handles, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (RawId, &RawChunk<S>)> {
        self.chunks.iter().enumerate().map(|(i, c)| (RawId(i), c))
    }

    pub(crate) fn get_mut(&mut self, id: RawId) -> Option<&mut RawChunk<S>> {
        self.chunks.get_mut(id.0)
    }

    pub(crate) fn insert(&mut self, chunk: RawChunk<S>) -> RawId {
        let id = RawId(self.chunks.len());
        self.chunks.push(chunk);
        id
    }
}
