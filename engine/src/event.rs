//! Events: one occurrence flowing through a chain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_types::{EventId, Value, VariableSet};

/// Shared handle to an event. Units of work hold clones of it across thread hops.
pub type EventHandle = Arc<Event>;

/// Mutable per-occurrence context.
///
/// Besides its immutable identity and event values, an event carries the side
/// state the engine manages: the delayed-marker, a hand-off counter and the
/// slot holding its local variable set. The slot is behind a mutex only so the
/// event is `Sync`; ownership of the event alternates between exactly one
/// active unit at a time, so the lock is never contended.
#[derive(Debug)]
pub struct Event {
    id: EventId,
    name: String,
    values: VariableSet,
    delayed: AtomicBool,
    hand_offs: AtomicU64,
    locals: Mutex<Option<VariableSet>>,
}

impl Event {
    #[must_use]
    pub fn new(id: EventId, name: impl Into<String>) -> Self {
        Self::with_values(id, name, VariableSet::new())
    }

    /// Event carrying read-only event values (`event-player`, `event-message`, ...).
    #[must_use]
    pub fn with_values(id: EventId, name: impl Into<String>, values: VariableSet) -> Self {
        Self {
            id,
            name: name.into(),
            values,
            delayed: AtomicBool::new(false),
            hand_offs: AtomicU64::new(0),
            locals: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether deferred processing has started for this event.
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.delayed.load(Ordering::Acquire)
    }

    /// Set the delayed-marker. Returns `true` if this call set it.
    pub(crate) fn set_delayed(&self) -> bool {
        !self.delayed.swap(true, Ordering::AcqRel)
    }

    /// How many times the event has been handed to a deferred unit.
    ///
    /// A walk that sees this change has given the event away and must not
    /// touch its locals afterwards.
    #[must_use]
    pub fn hand_off_count(&self) -> u64 {
        self.hand_offs.load(Ordering::Acquire)
    }

    pub(crate) fn record_hand_off(&self) {
        self.hand_offs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn locals_slot(&self) -> MutexGuard<'_, Option<VariableSet>> {
        self.locals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out events with increasing ids.
#[derive(Debug, Default)]
pub struct EventSource {
    next: AtomicU64,
}

impl EventSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn next_event(&self, name: &str) -> EventHandle {
        self.next_event_with(name, VariableSet::new())
    }

    #[must_use]
    pub fn next_event_with(&self, name: &str, values: VariableSet) -> EventHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(Event::with_values(EventId::new(id), name, values))
    }
}
