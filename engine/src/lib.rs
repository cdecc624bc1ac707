//! Chain walking and continuation scheduling for Tether scripts.
//!
//! A script is a chain of [`ChainNode`]s run for one [`Event`] on the host's
//! privileged context. A [`ContinuationNode`] detours its step to a background
//! worker and resumes the rest of the chain back on the privileged context,
//! carrying the event's local variables across both hops (see [`locals`]).
//!
//! The engine reaches the host only through the traits bundled in [`Host`];
//! [`HostRuntime`] wires the default tokio-backed implementation of each.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

pub mod continuation;
pub mod delay;
pub mod event;
pub mod host;
pub mod instrument;
pub mod lifecycle;
pub mod locals;
pub mod node;
pub mod scheduler;
pub mod trace;
pub mod trigger;
pub mod walker;

#[cfg(test)]
mod test_support;

pub use continuation::{
    BackgroundTask, ContinuationNode, DeferredLogic, DetourOutcome, DetourPhase, PrivilegedTask,
};
pub use delay::{DelayNode, DelayRegistry, EventDelayMarker};
pub use event::{Event, EventHandle, EventSource};
pub use host::{Host, HostBuilder, HostRuntime};
pub use instrument::{Instrumentation, LabelReport, SpanHandle, SpanRecorder};
pub use lifecycle::{HostLifecycle, Lifecycle};
pub use node::{ChainNode, ConditionNode, EffectNode, Link, NodeRef};
pub use scheduler::{
    HostScheduler, ScheduleError, Scheduler, SchedulerOptions, SchedulerStats, Unit, unit,
};
pub use trace::{TraceSink, TracingSink};
pub use trigger::{ChainBuilder, LoadError, Step, Trigger};
pub use walker::{ChainWalker, SyncWalker};

pub use tether_config::{DebugVerbosity, TetherConfig};
pub use tether_types::{DebugLabel, EventId, Kleenean, Value, VariableSet};
