//! Append-only event log component.
//!
//! The log keeps a retained buffer plus a monotonic count of every event
//! ever logged. Flushing drops the buffer but keeps the count, so a
//! checkpoint taken before a flush still resolves to "nothing new" instead
//! of pointing past the end of the buffer.

use std::fmt;
use std::sync::Arc;

use glam::IVec3;
use serde::{Deserialize, Serialize};
use tileworld_common::{Direction, EntityId};

use crate::component::{ComponentWriter, WorldComponent};
use crate::error::KernelError;

/// Bounds for event payloads stored in a log.
pub trait Event: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + fmt::Debug + Send + Sync + 'static> Event for T {}

/// Position in a log's complete history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventCheckpoint(u64);

impl EventCheckpoint {
    /// Number of events logged before this checkpoint was taken.
    pub fn count(self) -> u64 {
        self.0
    }
}

/// Events the stock commands record when a `EventLog<WorldEvent>` is
/// installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldEvent {
    Spawned { id: EntityId, at: IVec3 },
    Moved { id: EntityId, from: IVec3, to: IVec3 },
    MoveBlocked { id: EntityId, at: IVec3, direction: Direction },
    Destroyed { id: EntityId },
    DoorToggled { id: EntityId, open: bool },
    Note(String),
}

#[derive(Debug, Clone)]
pub struct EventLog<E> {
    events: Arc<Vec<E>>,
    complete_count: u64,
    allowed: bool,
}

impl<E: Event> Default for EventLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventLog<E> {
    pub fn new() -> Self {
        Self {
            events: Arc::default(),
            complete_count: 0,
            allowed: true,
        }
    }

    /// A log that ignores events until a writer enables it.
    pub fn disabled() -> Self {
        Self {
            allowed: false,
            ..Self::new()
        }
    }

    /// Events still retained, oldest first.
    pub fn events(&self) -> &[E] {
        &self.events
    }

    /// Every event ever logged, including flushed ones.
    pub fn complete_count(&self) -> u64 {
        self.complete_count
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn checkpoint(&self) -> EventCheckpoint {
        EventCheckpoint(self.complete_count)
    }

    /// Retained events logged after `checkpoint`.
    pub fn events_since(&self, checkpoint: EventCheckpoint) -> &[E] {
        let retained_start = self.complete_count - self.events.len() as u64;
        let from = checkpoint.0.max(retained_start);
        if from >= self.complete_count {
            return &[];
        }
        &self.events[(from - retained_start) as usize..]
    }
}

impl<E: Event> WorldComponent for EventLog<E> {
    fn create_writer(self: Arc<Self>) -> Option<Box<dyn ComponentWriter>> {
        Some(Box::new(EventLogWriter::new(self)))
    }
}

/// Transaction-scoped writer of an [`EventLog`].
#[derive(Debug)]
pub struct EventLogWriter<E> {
    /// `None` once released.
    base: Option<Arc<EventLog<E>>>,
    log: EventLog<E>,
    dirty: bool,
}

impl<E: Event> EventLogWriter<E> {
    pub fn new(base: Arc<EventLog<E>>) -> Self {
        Self {
            log: (*base).clone(),
            base: Some(base),
            dirty: false,
        }
    }

    fn live(&mut self) -> Result<&mut EventLog<E>, KernelError> {
        if self.base.is_none() {
            return Err(KernelError::UseAfterRelease("event log writer"));
        }
        Ok(&mut self.log)
    }

    /// Append an event. Returns `false` when logging is disabled.
    pub fn log_event(&mut self, event: E) -> Result<bool, KernelError> {
        let log = self.live()?;
        if !log.allowed {
            tracing::trace!(?event, "event dropped, logging disabled");
            return Ok(false);
        }
        Arc::make_mut(&mut log.events).push(event);
        log.complete_count += 1;
        self.dirty = true;
        Ok(true)
    }

    /// Drop every retained event. Returns how many were dropped.
    pub fn flush(&mut self) -> Result<usize, KernelError> {
        let log = self.live()?;
        let dropped = log.events.len();
        if dropped > 0 {
            log.events = Arc::default();
            self.dirty = true;
        }
        Ok(dropped)
    }

    pub fn set_allowed(&mut self, allowed: bool) -> Result<(), KernelError> {
        let log = self.live()?;
        if log.allowed != allowed {
            log.allowed = allowed;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn checkpoint(&self) -> EventCheckpoint {
        self.log.checkpoint()
    }

    pub fn events_since(&self, checkpoint: EventCheckpoint) -> &[E] {
        self.log.events_since(checkpoint)
    }

    pub fn events(&self) -> &[E] {
        self.log.events()
    }
}

impl<E: Event> ComponentWriter for EventLogWriter<E> {
    fn bake_immutable(&mut self, release: bool) -> Result<Arc<dyn WorldComponent>, KernelError> {
        let base = self
            .base
            .clone()
            .ok_or(KernelError::UseAfterRelease("event log writer"))?;
        let baked: Arc<dyn WorldComponent> = if !self.dirty {
            base
        } else if release {
            Arc::new(std::mem::take(&mut self.log))
        } else {
            // The buffer Arc is shared; the next write through this writer
            // copies it.
            Arc::new(self.log.clone())
        };
        if release {
            ComponentWriter::release(self);
        }
        Ok(baked)
    }

    fn release(&mut self) {
        self.base = None;
        self.log = EventLog::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> EventLogWriter<&'static str> {
        EventLogWriter::new(Arc::new(EventLog::new()))
    }

    #[test]
    fn events_since_checkpoint() {
        let mut w = writer();
        w.log_event("a").unwrap();
        let cp = w.checkpoint();
        w.log_event("b").unwrap();
        w.log_event("c").unwrap();
        assert_eq!(w.events_since(cp), &["b", "c"]);
        assert_eq!(w.events_since(EventCheckpoint::default()), &["a", "b", "c"]);
    }

    #[test]
    fn checkpoint_before_flush_reports_nothing_new() {
        let mut w = writer();
        w.log_event("a").unwrap();
        w.log_event("b").unwrap();
        let cp = w.checkpoint();
        assert_eq!(w.flush().unwrap(), 2);
        assert!(w.events_since(cp).is_empty());
        assert_eq!(w.checkpoint().count(), 2);

        w.log_event("c").unwrap();
        assert_eq!(w.events_since(cp), &["c"]);
    }

    #[test]
    fn stale_checkpoint_is_clamped_to_retained_window() {
        let mut w = writer();
        w.log_event("a").unwrap();
        let early = w.checkpoint();
        w.log_event("b").unwrap();
        w.flush().unwrap();
        w.log_event("c").unwrap();
        // "b" was flushed; only what is retained comes back.
        assert_eq!(w.events_since(early), &["c"]);
    }

    #[test]
    fn disabled_log_drops_events() {
        let mut w = EventLogWriter::new(Arc::new(EventLog::disabled()));
        assert!(!w.log_event("a").unwrap());
        assert_eq!(w.checkpoint().count(), 0);
        w.set_allowed(true).unwrap();
        assert!(w.log_event("b").unwrap());
        assert_eq!(w.events(), &["b"]);
    }

    #[test]
    fn untouched_writer_bakes_to_base() {
        let base = Arc::new(EventLog::<u32>::new());
        let mut w = EventLogWriter::new(Arc::clone(&base));
        let baked = w.bake_immutable(true).unwrap();
        let baked = baked.into_any().downcast::<EventLog<u32>>().unwrap();
        assert!(Arc::ptr_eq(&baked, &base));
    }

    #[test]
    fn baked_log_is_independent_of_writer() {
        let mut w = writer();
        w.log_event("a").unwrap();
        let first = w.bake_immutable(false).unwrap();
        w.log_event("b").unwrap();
        let first = first.as_any().downcast_ref::<EventLog<&'static str>>().unwrap();
        assert_eq!(first.events(), &["a"]);
        assert_eq!(w.events(), &["a", "b"]);
    }

    #[test]
    fn released_writer_rejects_writes() {
        let mut w = writer();
        w.bake_immutable(true).unwrap();
        assert!(matches!(w.log_event("x"), Err(KernelError::UseAfterRelease(_))));
        assert!(matches!(w.flush(), Err(KernelError::UseAfterRelease(_))));
    }
}
