//! Event-scoped local variable relocation.
//!
//! Local variables live in a single slot on the [`Event`]. Before a thread hop
//! the slot is emptied with [`extract`] and the set travels inside the unit of
//! work; the receiving unit puts it back with [`reinstall`]. When a chain ends
//! (or is cut short) [`purge`] drops whatever is attached.
//!
//! No locking discipline beyond the event's own slot is needed: only the unit
//! currently owning the event calls these.

use tether_types::VariableSet;

use crate::event::Event;

/// Detach and return the event's local variables, if any are attached.
pub fn extract(event: &Event) -> Option<VariableSet> {
    event.locals_slot().take()
}

/// Attach `set` to the event, replacing anything already attached.
pub fn reinstall(event: &Event, set: VariableSet) {
    let previous = event.locals_slot().replace(set);
    if previous.is_some() {
        tracing::debug!(event = %event.id(), "Replaced local variables already attached to event");
    }
}

/// Drop the event's local variables. No-op if none are attached.
pub fn purge(event: &Event) {
    event.locals_slot().take();
}

/// Run `f` against the event's local variables, creating an empty set first if needed.
pub fn with_locals<R>(event: &Event, f: impl FnOnce(&mut VariableSet) -> R) -> R {
    let mut slot = event.locals_slot();
    f(slot.get_or_insert_with(VariableSet::new))
}

/// Copy of the attached set, for inspection.
#[must_use]
pub fn snapshot(event: &Event) -> Option<VariableSet> {
    event.locals_slot().clone()
}

/// Names of the attached variables, in sorted order.
#[must_use]
pub fn names(event: &Event) -> Vec<String> {
    event
        .locals_slot()
        .as_ref()
        .map(|set| set.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default()
}
