//! Delayed events: the delayed-marker registry and the timed `wait` step.

use std::fmt;
use std::time::{Duration, Instant};

use crate::continuation::PrivilegedTask;
use crate::event::{Event, EventHandle};
use crate::host::Host;
use crate::locals;
use crate::node::{ChainNode, Link, NodeRef};
use crate::scheduler::unit;

/// Records which events have entered deferred processing.
pub trait DelayRegistry: Send + Sync {
    /// Mark `event` as delayed. Idempotent.
    fn mark_delayed(&self, event: &Event);

    fn is_delayed(&self, event: &Event) -> bool;
}

/// Stores the marker on the event itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDelayMarker;

impl DelayRegistry for EventDelayMarker {
    fn mark_delayed(&self, event: &Event) {
        if event.set_delayed() {
            tracing::trace!(event = %event.id(), "Event marked delayed");
        }
    }

    fn is_delayed(&self, event: &Event) -> bool {
        event.is_delayed()
    }
}

/// `wait <duration>`: resume the rest of the chain on the privileged context later.
///
/// A wait at the end of a chain, or while the host is disabled, does nothing
/// and ends the walk; the event's locals stay attached for the trigger to purge.
pub struct DelayNode {
    link: Link,
    duration: Duration,
}

impl fmt::Debug for DelayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayNode")
            .field("duration", &self.duration)
            .field("link", &self.link)
            .finish()
    }
}

impl DelayNode {
    #[must_use]
    pub fn new(link: Link, duration: Duration) -> Self {
        Self { link, duration }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl ChainNode for DelayNode {
    fn walk(&self, host: &Host, event: &EventHandle) -> anyhow::Result<Option<NodeRef>> {
        host.trace().trace(event, self, true);
        let Some(successor) = self.next().cloned() else {
            return Ok(None);
        };
        if !host.lifecycle().is_enabled() {
            return Ok(None);
        }

        host.delays().mark_delayed(event);
        let carried = locals::extract(event);
        let resumption =
            PrivilegedTask::new(successor, self.link.owner(), EventHandle::clone(event));
        let env = host.clone();
        let scheduled_at = Instant::now();

        let submitted = host.scheduler().run_later(
            self.duration,
            unit(move || {
                tracing::debug!(
                    target: "tether::trace",
                    event = %resumption.event().id(),
                    "... continuing after {:.3}s",
                    scheduled_at.elapsed().as_secs_f64()
                );
                if let Some(carried) = carried {
                    locals::reinstall(resumption.event(), carried);
                }
                resumption.run(&env);
                Ok(())
            }),
        );
        match submitted {
            Ok(()) => event.record_hand_off(),
            Err(err) => {
                tracing::warn!(event = %event.id(), "Failed to schedule resumption after wait: {err}");
            }
        }
        Ok(None)
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn describe(&self, _event: &Event) -> String {
        format!("wait {:?}", self.duration)
    }
}
