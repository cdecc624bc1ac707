//! Debug trace output while walking chains.

use tether_config::DebugVerbosity;
use tether_types::truncate_with_ellipsis;

use crate::event::Event;
use crate::locals;
use crate::node::ChainNode;

const MAX_TRACE_CHARS: usize = 120;

pub trait TraceSink: Send + Sync {
    /// Record that `node` ran for `event`. `entering` is false when a step
    /// declined to continue (a failed condition).
    fn trace(&self, event: &Event, node: &dyn ChainNode, entering: bool);
}

/// Writes trace entries as `tracing` debug events under the `tether::trace` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    verbosity: DebugVerbosity,
}

impl TracingSink {
    #[must_use]
    pub fn new(verbosity: DebugVerbosity) -> Self {
        Self { verbosity }
    }

    #[must_use]
    pub fn verbosity(&self) -> DebugVerbosity {
        self.verbosity
    }
}

impl TraceSink for TracingSink {
    fn trace(&self, event: &Event, node: &dyn ChainNode, entering: bool) {
        if !self.verbosity.is_enabled() {
            return;
        }
        let marker = if entering { "" } else { "-" };
        let text = truncate_with_ellipsis(&node.describe(event), MAX_TRACE_CHARS);
        if self.verbosity == DebugVerbosity::Verbose {
            tracing::debug!(
                target: "tether::trace",
                event = %event.id(),
                name = event.name(),
                locals = ?locals::names(event),
                "{marker}{text}"
            );
        } else {
            tracing::debug!(target: "tether::trace", event = %event.id(), "{marker}{text}");
        }
    }
}
