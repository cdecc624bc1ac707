//! Chain walking on the current context.

use crate::event::EventHandle;
use crate::host::Host;
use crate::node::NodeRef;

/// Drives a chain forward from a starting node.
pub trait ChainWalker: Send + Sync {
    /// Walk from `start` until a node returns no successor or fails.
    ///
    /// Failures end the walk and are logged; they never propagate to the caller.
    fn walk(&self, host: &Host, start: NodeRef, event: &EventHandle);
}

/// Runs every step inline on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncWalker;

impl ChainWalker for SyncWalker {
    fn walk(&self, host: &Host, start: NodeRef, event: &EventHandle) {
        let mut current = start;
        loop {
            match current.walk(host, event) {
                Ok(Some(next)) => current = next,
                Ok(None) => break,
                Err(err) => {
                    let label = current
                        .trigger()
                        .map_or_else(|| "<detached>".to_string(), |t| t.label().to_string());
                    tracing::error!(
                        event = %event.id(),
                        trigger = %label,
                        step = %current.describe(event),
                        "Step failed: {err:#}"
                    );
                    break;
                }
            }
        }
    }
}
