//! Host application lifecycle probe.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait Lifecycle: Send + Sync {
    /// Whether the host is still accepting new work.
    fn is_enabled(&self) -> bool;
}

/// Enabled flag flipped once the host starts shutting down.
#[derive(Debug)]
pub struct HostLifecycle {
    enabled: AtomicBool,
}

impl Default for HostLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            tracing::info!("Host disabled; new detours will be abandoned");
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }
}

impl Lifecycle for HostLifecycle {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}
