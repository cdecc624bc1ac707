//! Shared test utilities and fixtures
//!
//! Every test starts its own [`HostRuntime`] on the real tokio scheduler.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tether_config::{HostConfig, InstrumentConfig, TetherConfig};
use tether_engine::{EventHandle, EventSource, HostRuntime, Value, locals};

/// Generous upper bound for a test's scheduled work to settle.
pub const WAIT: Duration = Duration::from_secs(10);

pub const PRIVILEGED_THREAD: &str = "tether-test-main";

/// Config for a small runtime with a recognisable privileged thread.
pub fn config(timings: bool, profiler: bool) -> TetherConfig {
    TetherConfig {
        host: Some(HostConfig {
            max_background_threads: Some(8),
            privileged_thread_name: Some(PRIVILEGED_THREAD.to_string()),
        }),
        timings: Some(InstrumentConfig { enabled: timings }),
        profiler: Some(InstrumentConfig { enabled: profiler }),
        ..TetherConfig::default()
    }
}

pub fn runtime() -> HostRuntime {
    HostRuntime::start(&config(false, false)).expect("runtime starts")
}

pub fn instrumented_runtime() -> HostRuntime {
    HostRuntime::start(&config(true, true)).expect("runtime starts")
}

/// Wait for all work to finish, then stop the runtime.
pub fn settle(runtime: &HostRuntime) {
    assert!(runtime.wait_idle(WAIT), "scheduled work did not settle");
    runtime.shutdown(WAIT);
}

pub fn on_privileged_thread() -> bool {
    thread::current().name() == Some(PRIVILEGED_THREAD)
}

pub fn event_with_x(source: &EventSource, x: i64) -> EventHandle {
    let event = source.next_event("test");
    locals::with_locals(&event, |vars| vars.set("x", x));
    event
}

pub fn x_of(event: &EventHandle) -> Option<i64> {
    locals::snapshot(event)
        .and_then(|vars| vars.get("x").cloned())
        .and_then(|value| value.as_integer())
}

pub fn increment_x(event: &EventHandle) -> anyhow::Result<()> {
    locals::with_locals(event, |vars| {
        let x = vars.get("x").and_then(Value::as_integer).unwrap_or(0);
        vars.set("x", x + 1);
    });
    Ok(())
}

/// Thread-safe log shared between steps and the test body.
pub struct Journal<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Journal<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for Journal<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Journal<T> {
    pub fn push(&self, entry: T) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().unwrap().clone()
    }
}
