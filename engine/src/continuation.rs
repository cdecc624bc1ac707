//! Continuation nodes: run a step on a background worker, then resume the
//! rest of the chain on the privileged context.
//!
//! # Traversal
//!
//! ```text
//! privileged: walk ──► trace ──► mark delayed ──► extract locals ──► run_async(BackgroundTask) ──► return None
//!                                                     │
//! background:                          reinstall locals ──► logic ──┬─► no successor: purge locals
//!                                                                   └─► run_on_privileged(PrivilegedTask)
//!                                                                              │
//! privileged:                       open spans ──► walk successor ──► purge locals ──► close spans
//! ```
//!
//! The node itself holds no per-traversal state; everything a traversal needs
//! travels inside the two task values, so concurrent traversals of one node
//! for different events never meet. Ownership of the event alternates
//! strictly: the walking unit hands it to exactly one background unit, which
//! hands it to at most one privileged unit. A walk that hands the event on
//! (see [`Event::hand_off_count`]) leaves the locals to the next owner instead
//! of purging them.
//!
//! If the host is disabled when the node is reached, the detour is abandoned
//! after the locals have been extracted. The locals are neither restored nor
//! purged; they are dropped with the abandoned walk. This is a known race
//! between shutdown and event dispatch.

use std::fmt;
use std::sync::{Arc, Weak};

use tether_types::{DebugLabel, VariableSet};

use crate::event::{Event, EventHandle};
use crate::host::Host;
use crate::instrument::SpanHandle;
use crate::locals;
use crate::node::{ChainNode, Link, NodeRef};
use crate::scheduler::unit;
use crate::trigger::Trigger;

/// Custom logic of a deferred step. Runs on a background worker.
pub trait DeferredLogic: Send + Sync {
    fn execute(&self, event: &EventHandle) -> anyhow::Result<()>;
}

impl<F> DeferredLogic for F
where
    F: Fn(&EventHandle) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, event: &EventHandle) -> anyhow::Result<()> {
        self(event)
    }
}

/// Where a traversal stands; emitted in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetourPhase {
    Detoured,
    BackgroundExecuting,
    PrivilegedResuming,
    Terminal,
}

fn enter_phase(event: &Event, phase: DetourPhase) {
    tracing::trace!(event = %event.id(), ?phase, "Detour phase");
}

/// Result of reaching a continuation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetourOutcome {
    /// Background work was submitted.
    Submitted,
    /// The host was disabled; nothing was submitted.
    HostDisabled,
    /// The scheduler refused the background unit.
    Refused,
}

/// A step whose logic runs off the privileged context.
pub struct ContinuationNode {
    link: Link,
    description: String,
    logic: Arc<dyn DeferredLogic>,
}

impl fmt::Debug for ContinuationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationNode")
            .field("description", &self.description)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl ContinuationNode {
    #[must_use]
    pub fn new(link: Link, description: impl Into<String>, logic: Arc<dyn DeferredLogic>) -> Self {
        Self {
            link,
            description: description.into(),
            logic,
        }
    }

    /// Detour this step for `event`: hand it to a background worker and
    /// schedule the rest of the chain to resume afterwards.
    pub fn detour(&self, host: &Host, event: &EventHandle) -> DetourOutcome {
        host.trace().trace(event, self, true);
        host.delays().mark_delayed(event);
        let carried = locals::extract(event);
        enter_phase(event, DetourPhase::Detoured);

        if !host.lifecycle().is_enabled() {
            tracing::trace!(event = %event.id(), "Host disabled; abandoning detour");
            return DetourOutcome::HostDisabled;
        }

        let task = BackgroundTask {
            logic: Arc::clone(&self.logic),
            locals: carried,
            successor: self.next().cloned(),
            owner: self.link.owner(),
            event: EventHandle::clone(event),
        };
        let env = host.clone();
        match host.scheduler().run_async(unit(move || task.run(&env))) {
            Ok(()) => {
                event.record_hand_off();
                DetourOutcome::Submitted
            }
            Err(err) => {
                tracing::warn!(
                    event = %event.id(),
                    step = %self.description,
                    "Background worker refused detoured step: {err}"
                );
                DetourOutcome::Refused
            }
        }
    }
}

impl ChainNode for ContinuationNode {
    fn walk(&self, host: &Host, event: &EventHandle) -> anyhow::Result<Option<NodeRef>> {
        self.detour(host, event);
        // The chain continues from the privileged unit, never from this frame.
        Ok(None)
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn describe(&self, _event: &Event) -> String {
        self.description.clone()
    }
}

/// Background half of a detour.
pub struct BackgroundTask {
    logic: Arc<dyn DeferredLogic>,
    locals: Option<VariableSet>,
    successor: Option<NodeRef>,
    owner: Weak<Trigger>,
    event: EventHandle,
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("event", &self.event.id())
            .field("carries_locals", &self.locals.is_some())
            .field("has_successor", &self.successor.is_some())
            .finish_non_exhaustive()
    }
}

impl BackgroundTask {
    /// Reinstall locals, run the logic, then hop back or clean up.
    ///
    /// A logic failure is returned as-is; the rest of the chain does not run.
    pub fn run(self, host: &Host) -> anyhow::Result<()> {
        enter_phase(&self.event, DetourPhase::BackgroundExecuting);
        if let Some(carried) = self.locals {
            locals::reinstall(&self.event, carried);
        }

        self.logic.execute(&self.event)?;

        match self.successor {
            Some(successor) => {
                let task = PrivilegedTask::new(successor, self.owner, self.event);
                let env = host.clone();
                host.scheduler().run_on_privileged(unit(move || {
                    task.run(&env);
                    Ok(())
                }))?;
            }
            None => {
                locals::purge(&self.event);
                enter_phase(&self.event, DetourPhase::Terminal);
            }
        }
        Ok(())
    }
}

/// Privileged half of a detour: resume the chain at the successor.
pub struct PrivilegedTask {
    successor: NodeRef,
    owner: Weak<Trigger>,
    event: EventHandle,
}

impl fmt::Debug for PrivilegedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegedTask")
            .field("event", &self.event.id())
            .field("successor", &self.successor)
            .finish_non_exhaustive()
    }
}

impl PrivilegedTask {
    #[must_use]
    pub fn new(successor: NodeRef, owner: Weak<Trigger>, event: EventHandle) -> Self {
        Self {
            successor,
            owner,
            event,
        }
    }

    #[must_use]
    pub fn event(&self) -> &EventHandle {
        &self.event
    }

    /// Walk the remainder of the chain, then purge locals.
    ///
    /// Spans are opened before the walk and closed when this returns, however
    /// the walk went. If a later deferred step took the event over during the
    /// walk, the locals now belong to that step and are left alone; its own
    /// resumption purges them.
    pub fn run(self, host: &Host) {
        enter_phase(&self.event, DetourPhase::PrivilegedResuming);
        let owner = self.owner;
        let spans = SpanGuard::open(host, || owner.upgrade().map(|t| t.label().clone()));

        let hand_offs = self.event.hand_off_count();
        host.walker().walk(host, self.successor, &self.event);
        if self.event.hand_off_count() == hand_offs {
            locals::purge(&self.event);
        }

        drop(spans);
        enter_phase(&self.event, DetourPhase::Terminal);
    }
}

/// Timing and profiling spans for one resumed segment. Closes both on drop.
pub(crate) struct SpanGuard<'a> {
    host: &'a Host,
    timing: Option<SpanHandle>,
    profile: Option<SpanHandle>,
}

impl<'a> SpanGuard<'a> {
    /// Open a span in each enabled subsystem.
    ///
    /// `resolve` produces the trigger label. It is called at most once, and not
    /// at all when both subsystems are disabled.
    pub(crate) fn open(host: &'a Host, mut resolve: impl FnMut() -> Option<DebugLabel>) -> Self {
        let timings_on = host.timings().enabled();
        let profiler_on = host.profiler().enabled();
        let label = if timings_on || profiler_on {
            resolve()
        } else {
            None
        };

        let timing = label
            .as_ref()
            .filter(|_| timings_on)
            .map(|l| host.timings().start(l));
        let profile = label
            .as_ref()
            .filter(|_| profiler_on)
            .map(|l| host.profiler().start(l));
        Self {
            host,
            timing,
            profile,
        }
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.host.timings().stop(self.timing.take());
        self.host.profiler().stop(self.profile.take());
    }
}
