//! Timing and profiling instrumentation.
//!
//! Both subsystems share one contract: check [`Instrumentation::enabled`]
//! before paying for a label, [`start`](Instrumentation::start) a span, and
//! hand the (possibly absent) handle back to [`stop`](Instrumentation::stop)
//! exactly once. `stop` takes the handle by value, so a span cannot be closed twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tether_types::DebugLabel;

/// An open span. Only obtainable from [`Instrumentation::start`].
#[derive(Debug)]
pub struct SpanHandle {
    label: DebugLabel,
    started: Instant,
}

impl SpanHandle {
    #[must_use]
    pub fn label(&self) -> &DebugLabel {
        &self.label
    }
}

pub trait Instrumentation: Send + Sync {
    fn enabled(&self) -> bool;

    fn start(&self, label: &DebugLabel) -> SpanHandle;

    /// Close a span. `None` is accepted and ignored.
    fn stop(&self, handle: Option<SpanHandle>);
}

#[derive(Debug, Clone, Copy, Default)]
struct LabelStats {
    calls: u64,
    total: Duration,
    max: Duration,
}

/// One row of [`SpanRecorder::report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelReport {
    pub label: String,
    pub calls: u64,
    pub total_micros: u128,
    pub max_micros: u128,
}

/// Accumulates per-label call counts and durations.
///
/// Used for both the timings and the profiler subsystem; `name` tells them apart in logs.
#[derive(Debug)]
pub struct SpanRecorder {
    name: &'static str,
    enabled: AtomicBool,
    started: AtomicU64,
    stopped: AtomicU64,
    stats: Mutex<HashMap<DebugLabel, LabelStats>>,
}

impl SpanRecorder {
    #[must_use]
    pub fn new(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            enabled: AtomicBool::new(enabled),
            started: AtomicU64::new(0),
            stopped: AtomicU64::new(0),
            stats: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn timings(enabled: bool) -> Self {
        Self::new("timings", enabled)
    }

    #[must_use]
    pub fn profiler(enabled: bool) -> Self {
        Self::new("profiler", enabled)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[must_use]
    pub fn started_count(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stopped_count(&self) -> u64 {
        self.stopped.load(Ordering::Acquire)
    }

    /// Spans started but not yet stopped.
    #[must_use]
    pub fn open_spans(&self) -> u64 {
        self.started_count().saturating_sub(self.stopped_count())
    }

    /// Per-label totals, busiest label first.
    #[must_use]
    pub fn report(&self) -> Vec<LabelReport> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<LabelReport> = stats
            .iter()
            .map(|(label, s)| LabelReport {
                label: label.to_string(),
                calls: s.calls,
                total_micros: s.total.as_micros(),
                max_micros: s.max.as_micros(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_micros
                .cmp(&a.total_micros)
                .then_with(|| a.label.cmp(&b.label))
        });
        rows
    }
}

impl Instrumentation for SpanRecorder {
    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn start(&self, label: &DebugLabel) -> SpanHandle {
        self.started.fetch_add(1, Ordering::AcqRel);
        SpanHandle {
            label: label.clone(),
            started: Instant::now(),
        }
    }

    fn stop(&self, handle: Option<SpanHandle>) {
        let Some(handle) = handle else {
            return;
        };
        let elapsed = handle.started.elapsed();
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = stats.entry(handle.label.clone()).or_default();
            entry.calls += 1;
            entry.total += elapsed;
            entry.max = entry.max.max(elapsed);
        }
        self.stopped.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(
            recorder = self.name,
            label = %handle.label,
            elapsed_us = elapsed.as_micros(),
            "Span closed"
        );
    }
}
