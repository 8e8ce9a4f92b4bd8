//! The state log: tapes keyed by channel and instance.
//!
//! [`StateLog`] owns every tape and the arena of Raw chunks they share.
//! Each write is checked against the values other instances recorded at the
//! same step in the same channel; a coinciding value is stored as a
//! reference into the other instance's chunk instead of a second copy.
//!
//! # Write rules
//!
//! For the writing instance's last chunk and the duplicate-search result:
//!
//! | Last chunk | Match | Effect |
//! |------------|-------|--------|
//! | none | yes | new `Ref` of length 1 |
//! | none | no | new `Raw` holding the value |
//! | `Ref` to the matched chunk | yes | extend that `Ref` by one |
//! | `Ref` elsewhere, or `Raw` | yes | new `Ref` of length 1 |
//! | `Ref` | no | new `Raw` holding the value |
//! | `Raw` | no | push onto that `Raw` |
//!
//! Steps must continue the tape: once an instance has a tape, its next
//! write has to be at exactly the tape's length.

use std::collections::BTreeMap;

use statetape_types::{LogId, Step};
use tracing::debug;

use crate::LogError;
use crate::chunk::{Chunk, RawArena, RawChunk, RawId, RefChunk};
use crate::playback::Playback;
use crate::tape::Tape;

/// Grouping key partitioning independent sets of tapes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel<C> {
    /// The channel used when the caller names none.
    Implicit,
    /// A caller-chosen channel.
    Named(C),
}

impl<C> Channel<C> {
    /// Wrap a caller-chosen key.
    pub const fn named(key: C) -> Self {
        Self::Named(key)
    }
}

/// What an accepted write did to the writer's tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Started a new owning chunk.
    NewRaw(RawId),
    /// Appended to the tape's last owning chunk.
    ExtendedRaw(RawId),
    /// Started a new reference into another instance's chunk.
    NewRef(RawId),
    /// Grew the tape's last reference by one step.
    ExtendedRef(RawId),
}

impl Placement {
    /// Whether the value was deduplicated against another instance.
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::NewRef(_) | Self::ExtendedRef(_))
    }

    /// The Raw chunk that now physically holds the value.
    pub const fn raw(&self) -> RawId {
        match self {
            Self::NewRaw(id) | Self::ExtendedRaw(id) | Self::NewRef(id) | Self::ExtendedRef(id) => {
                *id
            }
        }
    }
}

/// Deduplicating log of state sequences.
///
/// `I` keys producer instances, `S` is the recorded state value and `C`
/// keys named channels. The log starts open.
#[derive(Debug)]
pub struct StateLog<I, S, C = String> {
    id: LogId,
    is_open: bool,
    channels: BTreeMap<Channel<C>, BTreeMap<I, Tape>>,
    arena: RawArena<S>,
}

impl<I, S, C> Default for StateLog<I, S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, S, C> StateLog<I, S, C> {
    /// Create an empty, open log with a fresh identity.
    pub fn new() -> Self {
        Self {
            id: LogId::new(),
            is_open: true,
            channels: BTreeMap::new(),
            arena: RawArena::new(),
        }
    }

    /// Identity token of this log.
    pub const fn id(&self) -> LogId {
        self.id
    }

    /// Whether writes are currently accepted.
    pub const fn is_open(&self) -> bool {
        self.is_open
    }

    /// Start accepting writes. Re-opening a closed log is allowed.
    pub fn open(&mut self) {
        self.is_open = true;
        debug!(log = %self.id, "log opened");
    }

    /// Stop accepting writes. Reads and redirects keep working.
    pub fn close(&mut self) {
        self.is_open = false;
        debug!(log = %self.id, "log closed");
    }

    /// Storage of every Raw chunk in the log.
    pub const fn arena(&self) -> &RawArena<S> {
        &self.arena
    }

    /// Look up a Raw chunk by handle.
    pub fn raw(&self, id: RawId) -> Option<&RawChunk<S>> {
        self.arena.get(id)
    }

    /// Channels that hold at least one tape.
    pub fn channels(&self) -> impl Iterator<Item = &Channel<C>> {
        self.channels.keys()
    }

    /// Every tape with its channel and instance key.
    pub fn tapes(&self) -> impl Iterator<Item = (&Channel<C>, &I, &Tape)> {
        self.channels.iter().flat_map(|(channel, tapes)| {
            tapes
                .iter()
                .map(move |(instance, tape)| (channel, instance, tape))
        })
    }
}

impl<I, S, C> StateLog<I, S, C>
where
    I: Ord + Clone,
    S: PartialEq,
    C: Ord + Clone,
{
    /// Instances recorded in `channel`.
    pub fn instances(&self, channel: &Channel<C>) -> Option<impl Iterator<Item = &I>> {
        self.channels.get(channel).map(BTreeMap::keys)
    }

    /// The tape of `instance` in the implicit channel.
    pub fn tape(&self, instance: &I) -> Option<&Tape> {
        self.tape_in(&Channel::Implicit, instance)
    }

    /// The tape of `instance` in `channel`.
    pub fn tape_in(&self, channel: &Channel<C>, instance: &I) -> Option<&Tape> {
        self.channels.get(channel)?.get(instance)
    }

    #[cfg(test)]
    pub(crate) fn tape_mut_for_test(&mut self, instance: &I) -> &mut Tape {
        self.channels
            .entry(Channel::Implicit)
            .or_default()
            .entry(instance.clone())
            .or_default()
    }

    /// Record `state` for `instance` at `step` in the implicit channel.
    ///
    /// Returns `false` if the write was rejected.
    pub fn put(&mut self, instance: &I, step: Step, state: S) -> bool {
        self.try_put(instance, step, state).is_ok()
    }

    /// Record `state` for `instance` at `step` in `channel`.
    ///
    /// Returns `false` if the write was rejected.
    pub fn put_in(&mut self, channel: &Channel<C>, instance: &I, step: Step, state: S) -> bool {
        self.try_put_in(channel, instance, step, state).is_ok()
    }

    /// [`put`](Self::put), reporting why a write was rejected.
    pub fn try_put(&mut self, instance: &I, step: Step, state: S) -> Result<Placement, LogError> {
        self.try_put_in(&Channel::Implicit, instance, step, state)
    }

    /// [`put_in`](Self::put_in), reporting why a write was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] if the log is closed and
    /// [`LogError::StepOutOfOrder`] if `step` does not continue the
    /// instance's tape, or [`LogError::StepOverflow`] for `Step::MAX`.
    /// Nothing is recorded in any of these cases.
    pub fn try_put_in(
        &mut self,
        channel: &Channel<C>,
        instance: &I,
        step: Step,
        state: S,
    ) -> Result<Placement, LogError> {
        if !self.is_open {
            return Err(LogError::Closed);
        }
        if step.checked_add(1).is_none() {
            return Err(LogError::StepOverflow { step });
        }

        let tapes = self.channels.get(channel);
        if let Some(tape) = tapes.and_then(|t| t.get(instance)) {
            if !tape.is_empty() {
                let expected = tape
                    .end(&self.arena)
                    .ok_or(LogError::Internal("tape end cannot be resolved"))?;
                if step != expected {
                    return Err(LogError::StepOutOfOrder {
                        expected,
                        actual: step,
                    });
                }
            }
        }

        let matched = tapes.and_then(|t| find_match(t, instance, step, &state, &self.arena));

        let tape = self
            .channels
            .entry(channel.clone())
            .or_default()
            .entry(instance.clone())
            .or_default();
        let placement = append(tape, &mut self.arena, step, state, matched)?;

        match placement {
            Placement::NewRaw(raw) => debug!(log = %self.id, step, %raw, "new raw chunk"),
            Placement::NewRef(raw) => debug!(log = %self.id, step, %raw, "new reference chunk"),
            Placement::ExtendedRaw(_) | Placement::ExtendedRef(_) => {}
        }

        Ok(placement)
    }

    /// Replay the sequence recorded for `instance` in the implicit channel.
    ///
    /// Returns `None` if nothing was recorded for it.
    pub fn playback(&self, instance: &I) -> Option<Playback<'_, S>> {
        self.playback_in(&Channel::Implicit, instance)
    }

    /// Replay the sequence recorded for `instance` in `channel`.
    pub fn playback_in(&self, channel: &Channel<C>, instance: &I) -> Option<Playback<'_, S>> {
        let tape = self.tape_in(channel, instance)?;
        Some(Playback::new(tape.chunks(), &self.arena))
    }

    /// The value `instance` recorded at `step` in the implicit channel.
    pub fn retrieve(&self, instance: &I, step: Step) -> Option<&S> {
        self.retrieve_in(&Channel::Implicit, instance, step)
    }

    /// The value `instance` recorded at `step` in `channel`.
    pub fn retrieve_in(&self, channel: &Channel<C>, instance: &I, step: Step) -> Option<&S> {
        self.tape_in(channel, instance)?.value_at(step, &self.arena)
    }

    /// One past the last step recorded for `instance` in the implicit channel.
    pub fn length(&self, instance: &I) -> Option<Step> {
        self.length_in(&Channel::Implicit, instance)
    }

    /// One past the last step recorded for `instance` in `channel`.
    pub fn length_in(&self, channel: &Channel<C>, instance: &I) -> Option<Step> {
        self.tape_in(channel, instance)?.end(&self.arena)
    }

    /// Alias the tape of `source` under `destination` in the implicit channel.
    ///
    /// Returns `false` if `source` has no tape.
    pub fn redirect(&mut self, source: &I, destination: &I) -> bool {
        self.try_redirect(source, destination).is_ok()
    }

    /// Alias the tape of `source` under `destination` in `channel`.
    pub fn redirect_in(&mut self, channel: &Channel<C>, source: &I, destination: &I) -> bool {
        self.try_redirect_in(channel, source, destination).is_ok()
    }

    /// [`redirect`](Self::redirect), reporting why it failed.
    pub fn try_redirect(&mut self, source: &I, destination: &I) -> Result<usize, LogError> {
        self.try_redirect_in(&Channel::Implicit, source, destination)
    }

    /// [`redirect_in`](Self::redirect_in), reporting why it failed.
    ///
    /// Every chunk of the source tape is appended to the destination tape as
    /// a `Ref`: existing references are reused unchanged, owning chunks are
    /// wrapped in a reference of the same range. If the destination already
    /// holds values, only the part of the source from the destination's
    /// length onwards is aliased. Works whether or not the log is open.
    ///
    /// Returns the number of chunks appended.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownTape`] if `source` has no tape in
    /// `channel`, and [`LogError::RedirectGap`] if the source starts after
    /// the destination's last step.
    pub fn try_redirect_in(
        &mut self,
        channel: &Channel<C>,
        source: &I,
        destination: &I,
    ) -> Result<usize, LogError> {
        let tapes = self
            .channels
            .get_mut(channel)
            .ok_or(LogError::UnknownTape)?;
        let src = tapes.get(source).ok_or(LogError::UnknownTape)?;
        if source == destination {
            return Ok(0);
        }

        let from = match tapes.get(destination) {
            Some(dst) if !dst.is_empty() => Some(
                dst.end(&self.arena)
                    .ok_or(LogError::Internal("tape end cannot be resolved"))?,
            ),
            _ => None,
        };
        let aliased = src.alias_from(from, &self.arena)?;
        let count = aliased.len();

        let dst = tapes.entry(destination.clone()).or_default();
        for chunk in aliased {
            dst.push(Chunk::Ref(chunk));
        }

        debug!(log = %self.id, aliased = count, "redirected tape");
        Ok(count)
    }
}

/// First Raw chunk of another instance in the same channel holding `state`
/// at `step`, in ascending instance order.
fn find_match<I: Ord, S: PartialEq>(
    tapes: &BTreeMap<I, Tape>,
    instance: &I,
    step: Step,
    state: &S,
    arena: &RawArena<S>,
) -> Option<RawId> {
    tapes
        .iter()
        .filter(|(other, _)| *other != instance)
        .find_map(|(_, tape)| tape.raw_match(step, state, arena))
}

fn append<S>(
    tape: &mut Tape,
    arena: &mut RawArena<S>,
    step: Step,
    state: S,
    matched: Option<RawId>,
) -> Result<Placement, LogError> {
    match (tape.last().copied(), matched) {
        (Some(Chunk::Ref(last)), Some(target)) if last.target == target => {
            tape.extend_last_ref()?;
            Ok(Placement::ExtendedRef(target))
        }
        (_, Some(target)) => {
            tape.push(Chunk::Ref(RefChunk {
                start: step,
                target,
                length: 1,
            }));
            Ok(Placement::NewRef(target))
        }
        (Some(Chunk::Raw(id)), None) => {
            arena
                .get_mut(id)
                .ok_or(LogError::Internal("tape refers to a missing raw chunk"))?
                .push(state);
            Ok(Placement::ExtendedRaw(id))
        }
        (Some(Chunk::Ref(_)) | None, None) => {
            let id = arena.insert(RawChunk::new(step, state));
            tape.push(Chunk::Raw(id));
            Ok(Placement::NewRaw(id))
        }
    }
}
