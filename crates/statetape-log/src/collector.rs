//! Shared collector handle and the producer binding capability.
//!
//! Producers keep a handle to the log they record into. [`Collector`] is
//! that handle: a cheap clone of an `Rc<RefCell<StateLog>>`. It is not
//! `Send`, so a collector and all its producers stay on one thread.
//!
//! Opening a collector with a set of producers invokes each producer's
//! [`Producer::bind_collector`] with the handle; from then on the producer
//! records its states by calling [`Collector::put`] with its own identity.
//!
//! Every access borrows the inner log for the duration of one call. A
//! producer that tries to write while the log is already borrowed (for
//! example from inside [`Collector::read`]) gets [`LogError::Busy`] back
//! instead of a panic.

use core::cell::RefCell;
use core::hash::{Hash, Hasher};
use std::rc::Rc;

use statetape_types::{LogId, Step};

use crate::LogError;
use crate::log::{Channel, Placement, StateLog};

/// Something that emits states into a collector it has been bound to.
pub trait Producer<I, S, C = String> {
    /// Remember `collector` so later states can be recorded through it.
    fn bind_collector(&mut self, collector: &Collector<I, S, C>);
}

/// Shared, single-threaded handle to a [`StateLog`].
///
/// Clones refer to the same log. Equality and hashing use the log's
/// identity, so a collector can key a map.
pub struct Collector<I, S, C = String> {
    log: Rc<RefCell<StateLog<I, S, C>>>,
    id: LogId,
}

impl<I, S, C> Clone for Collector<I, S, C> {
    fn clone(&self) -> Self {
        Self {
            log: Rc::clone(&self.log),
            id: self.id,
        }
    }
}

impl<I, S, C> PartialEq for Collector<I, S, C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<I, S, C> Eq for Collector<I, S, C> {}

impl<I, S, C> Hash for Collector<I, S, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<I, S, C> core::fmt::Debug for Collector<I, S, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collector").field("id", &self.id).finish()
    }
}

impl<I, S, C> Default for Collector<I, S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, S, C> Collector<I, S, C> {
    /// Create a collector around a new, open log.
    pub fn new() -> Self {
        Self::from_log(StateLog::new())
    }

    /// Share an existing log.
    pub fn from_log(log: StateLog<I, S, C>) -> Self {
        let id = log.id();
        Self {
            log: Rc::new(RefCell::new(log)),
            id,
        }
    }

    /// Create a collector and bind `producers` to it.
    pub fn with_producers(producers: &mut [&mut dyn Producer<I, S, C>]) -> Result<Self, LogError> {
        let collector = Self::new();
        collector.open(producers)?;
        Ok(collector)
    }

    /// Identity of the shared log.
    pub const fn id(&self) -> LogId {
        self.id
    }

    /// Open the log and bind every producer to this collector.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Busy`] if the log is currently borrowed.
    pub fn open(&self, producers: &mut [&mut dyn Producer<I, S, C>]) -> Result<(), LogError> {
        self.log.try_borrow_mut()?.open();
        for producer in producers.iter_mut() {
            producer.bind_collector(self);
        }
        Ok(())
    }

    /// Stop accepting writes.
    pub fn close(&self) -> Result<(), LogError> {
        self.log.try_borrow_mut()?.close();
        Ok(())
    }

    /// Whether writes are currently accepted.
    pub fn is_open(&self) -> Result<bool, LogError> {
        Ok(self.log.try_borrow()?.is_open())
    }

    /// Run `f` against the log.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::BusyRead`] if the log is being written.
    pub fn read<R>(&self, f: impl FnOnce(&StateLog<I, S, C>) -> R) -> Result<R, LogError> {
        let log = self.log.try_borrow()?;
        Ok(f(&log))
    }

    /// Run `f` against the log with write access.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Busy`] if the log is already borrowed.
    pub fn write<R>(&self, f: impl FnOnce(&mut StateLog<I, S, C>) -> R) -> Result<R, LogError> {
        let mut log = self.log.try_borrow_mut()?;
        Ok(f(&mut log))
    }

    /// Take the log back out of the handle.
    ///
    /// Fails (returning the handle) while other clones are alive.
    pub fn into_log(self) -> Result<StateLog<I, S, C>, Self> {
        let id = self.id;
        Rc::try_unwrap(self.log)
            .map(RefCell::into_inner)
            .map_err(|log| Self { log, id })
    }
}

impl<I, S, C> Collector<I, S, C>
where
    I: Ord + Clone,
    S: PartialEq,
    C: Ord + Clone,
{
    /// Record `state` for `instance` at `step` in the implicit channel.
    ///
    /// Returns `false` if the write was rejected.
    pub fn put(&self, instance: &I, step: Step, state: S) -> bool {
        self.try_put_in(&Channel::Implicit, instance, step, state)
            .is_ok()
    }

    /// Record `state` for `instance` at `step` in `channel`.
    pub fn put_in(&self, channel: &Channel<C>, instance: &I, step: Step, state: S) -> bool {
        self.try_put_in(channel, instance, step, state).is_ok()
    }

    /// [`put_in`](Self::put_in), reporting why a write was rejected.
    ///
    /// # Errors
    ///
    /// See [`StateLog::try_put_in`]; additionally [`LogError::Busy`] if the
    /// log is already borrowed.
    pub fn try_put_in(
        &self,
        channel: &Channel<C>,
        instance: &I,
        step: Step,
        state: S,
    ) -> Result<Placement, LogError> {
        self.log
            .try_borrow_mut()?
            .try_put_in(channel, instance, step, state)
    }

    /// Alias `source` under `destination` in the implicit channel.
    pub fn redirect(&self, source: &I, destination: &I) -> bool {
        self.try_redirect_in(&Channel::Implicit, source, destination)
            .is_ok()
    }

    /// [`StateLog::try_redirect_in`] through the shared handle.
    pub fn try_redirect_in(
        &self,
        channel: &Channel<C>,
        source: &I,
        destination: &I,
    ) -> Result<usize, LogError> {
        self.log
            .try_borrow_mut()?
            .try_redirect_in(channel, source, destination)
    }

    /// One past the last step recorded for `instance` in `channel`.
    pub fn length_in(&self, channel: &Channel<C>, instance: &I) -> Result<Option<Step>, LogError> {
        self.read(|log| log.length_in(channel, instance))
    }

    /// The sequence recorded for `instance` in `channel`, copied out.
    pub fn playback_in(&self, channel: &Channel<C>, instance: &I) -> Result<Option<Vec<S>>, LogError>
    where
        S: Clone,
    {
        self.read(|log| {
            log.playback_in(channel, instance)
                .map(|states| states.cloned().collect())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    /// Emits a fixed script, one value per step.
    struct Scripted {
        name: &'static str,
        script: Vec<u32>,
        step: Step,
        collector: Option<Collector<&'static str, u32>>,
    }

    impl Scripted {
        fn new(name: &'static str, script: &[u32]) -> Self {
            Self {
                name,
                script: script.to_vec(),
                step: 0,
                collector: None,
            }
        }

        fn emit(&mut self) -> bool {
            let Some(collector) = &self.collector else {
                return false;
            };
            let Some(state) = usize::try_from(self.step)
                .ok()
                .and_then(|i| self.script.get(i))
                .copied()
            else {
                return false;
            };
            let accepted = collector.put(&self.name, self.step, state);
            if accepted {
                self.step = self.step.saturating_add(1);
            }
            accepted
        }
    }

    impl Producer<&'static str, u32> for Scripted {
        fn bind_collector(&mut self, collector: &Collector<&'static str, u32>) {
            self.collector = Some(collector.clone());
        }
    }

    #[test]
    fn open_binds_every_producer() {
        let mut a = Scripted::new("a", &[5, 5]);
        let mut b = Scripted::new("b", &[5, 5]);
        let mut producers: [&mut dyn Producer<&'static str, u32>; 2] = [&mut a, &mut b];
        let collector = Collector::with_producers(&mut producers).unwrap();

        assert_eq!(a.collector.as_ref(), Some(&collector));
        assert_eq!(b.collector.as_ref(), Some(&collector));

        for _ in 0..2 {
            assert!(a.emit());
            assert!(b.emit());
        }

        let implicit = Channel::Implicit;
        assert_eq!(
            collector.playback_in(&implicit, &"b").unwrap(),
            Some(vec![5, 5])
        );
        let b_refs = collector
            .read(|log| log.tape(&"b").map(|t| t.chunks().iter().all(|c| c.is_ref())))
            .unwrap();
        assert_eq!(b_refs, Some(true));
    }

    #[test]
    fn closing_stops_producers() {
        let mut a = Scripted::new("a", &[1, 2, 3]);
        let mut producers: [&mut dyn Producer<&'static str, u32>; 1] = [&mut a];
        let collector = Collector::with_producers(&mut producers).unwrap();
        assert!(a.emit());
        collector.close().unwrap();
        assert!(!a.emit());
        assert_eq!(collector.is_open().ok(), Some(false));

        collector.open(&mut []).unwrap();
        assert!(a.emit());
        assert_eq!(collector.length_in(&Channel::Implicit, &"a").unwrap(), Some(2));
    }

    #[test]
    fn writes_during_a_read_are_reported_busy() {
        let collector: Collector<&'static str, u32> = Collector::new();
        let inner = collector
            .read(|_| collector.try_put_in(&Channel::Implicit, &"a", 0, 1))
            .unwrap();
        assert!(matches!(inner, Err(LogError::Busy { .. })));
        assert!(collector.put(&"a", 0, 1));
    }

    #[test]
    fn reads_during_a_write_are_reported_busy() {
        let collector: Collector<&'static str, u32> = Collector::new();
        let inner = collector
            .write(|log| {
                assert!(log.put(&"a", 0, 7));
                collector.read(|log| log.length(&"a"))
            })
            .unwrap();
        assert!(matches!(inner, Err(LogError::BusyRead { .. })));
        assert_eq!(collector.read(|log| log.length(&"a")).unwrap(), Some(1));
    }

    #[test]
    fn redirect_through_the_handle_aliases_the_source() {
        let mut a = Scripted::new("a", &[4, 2, 4]);
        let mut producers: [&mut dyn Producer<&'static str, u32>; 1] = [&mut a];
        let collector = Collector::with_producers(&mut producers).unwrap();
        for _ in 0..3 {
            assert!(a.emit());
        }

        assert!(collector.redirect(&"a", &"copy"));
        assert!(!collector.redirect(&"missing", &"copy"));
        let implicit = Channel::Implicit;
        assert_eq!(
            collector.playback_in(&implicit, &"copy").unwrap(),
            Some(vec![4, 2, 4])
        );
        let all_refs = collector
            .read(|log| log.tape(&"copy").map(|t| t.chunks().iter().all(|c| c.is_ref())))
            .unwrap();
        assert_eq!(all_refs, Some(true));
    }

    #[test]
    fn handles_hash_by_log_identity() {
        let first: Collector<&'static str, u32> = Collector::new();
        let second: Collector<&'static str, u32> = Collector::new();
        let set: HashSet<_> = [first.clone(), first.clone(), second].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&first));
    }

    #[test]
    fn log_can_be_taken_back_once_unshared() {
        let collector: Collector<&'static str, u32> = Collector::new();
        let extra = collector.clone();
        assert!(collector.put(&"a", 0, 1));
        let collector = collector.into_log().unwrap_err();
        drop(extra);
        let log = collector.into_log().unwrap();
        assert_eq!(log.length(&"a"), Some(1));
    }
}
