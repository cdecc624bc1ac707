//! Deterministic doubles for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::event::Event;
use crate::host::Host;
use crate::instrument::SpanRecorder;
use crate::lifecycle::HostLifecycle;
use crate::node::ChainNode;
use crate::scheduler::{ScheduleError, Scheduler, Unit};
use crate::trace::TraceSink;

type Probe = Box<dyn Fn() -> bool + Send + Sync>;

/// Scheduler that queues units until the test runs them.
///
/// Delayed units go to the privileged queue immediately; their delays are
/// recorded but not waited for.
#[derive(Default)]
pub struct ManualScheduler {
    background: Mutex<VecDeque<Unit>>,
    privileged: Mutex<VecDeque<Unit>>,
    delays: Mutex<Vec<Duration>>,
    background_submissions: AtomicU64,
    privileged_submissions: AtomicU64,
    refusing: AtomicBool,
    on_privileged: AtomicBool,
    probe: Mutex<Option<Probe>>,
    probe_results: Mutex<Vec<bool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManualScheduler {
    pub fn pending_background(&self) -> usize {
        lock(&self.background).len()
    }

    pub fn pending_privileged(&self) -> usize {
        lock(&self.privileged).len()
    }

    pub fn background_submissions(&self) -> u64 {
        self.background_submissions.load(Ordering::SeqCst)
    }

    pub fn privileged_submissions(&self) -> u64 {
        self.privileged_submissions.load(Ordering::SeqCst)
    }

    pub fn delays(&self) -> Vec<Duration> {
        lock(&self.delays).clone()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_background() == 0 && self.pending_privileged() == 0
    }

    /// Refuse every later submission with [`ScheduleError::Closed`].
    pub fn refuse_submissions(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }

    /// Evaluate `probe` at every accepted submission; see [`Self::probe_results`].
    pub fn probe_on_submit(&self, probe: impl Fn() -> bool + Send + Sync + 'static) {
        *lock(&self.probe) = Some(Box::new(probe));
    }

    pub fn probe_results(&self) -> Vec<bool> {
        lock(&self.probe_results).clone()
    }

    pub fn run_next_background(&self) -> Option<anyhow::Result<()>> {
        let unit = lock(&self.background).pop_front()?;
        Some(unit())
    }

    pub fn run_next_privileged(&self) -> Option<anyhow::Result<()>> {
        let unit = lock(&self.privileged).pop_front()?;
        self.on_privileged.store(true, Ordering::SeqCst);
        let outcome = unit();
        self.on_privileged.store(false, Ordering::SeqCst);
        Some(outcome)
    }

    /// Run queued units, privileged first, until both queues are empty.
    /// Returns the failures in the order they happened.
    pub fn run_until_idle(&self) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        loop {
            let outcome = match self.run_next_privileged() {
                Some(outcome) => outcome,
                None => match self.run_next_background() {
                    Some(outcome) => outcome,
                    None => return errors,
                },
            };
            if let Err(err) = outcome {
                errors.push(err);
            }
        }
    }

    fn accept(
        &self,
        queue: &Mutex<VecDeque<Unit>>,
        counter: &AtomicU64,
        unit: Unit,
    ) -> Result<(), ScheduleError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(ScheduleError::Closed);
        }
        if let Some(probe) = lock(&self.probe).as_ref() {
            lock(&self.probe_results).push(probe());
        }
        counter.fetch_add(1, Ordering::SeqCst);
        lock(queue).push_back(unit);
        Ok(())
    }
}

impl Scheduler for ManualScheduler {
    fn run_async(&self, unit: Unit) -> Result<(), ScheduleError> {
        self.accept(&self.background, &self.background_submissions, unit)
    }

    fn run_on_privileged(&self, unit: Unit) -> Result<(), ScheduleError> {
        self.accept(&self.privileged, &self.privileged_submissions, unit)
    }

    fn run_later(&self, delay: Duration, unit: Unit) -> Result<(), ScheduleError> {
        self.accept(&self.privileged, &self.privileged_submissions, unit)?;
        lock(&self.delays).push(delay);
        Ok(())
    }

    fn is_privileged(&self) -> bool {
        self.on_privileged.load(Ordering::SeqCst)
    }
}

/// Records `(description, entering)` for every trace call.
#[derive(Debug, Default)]
pub struct RecordingTrace {
    entries: Mutex<Vec<(String, bool)>>,
}

impl RecordingTrace {
    pub fn entries(&self) -> Vec<(String, bool)> {
        lock(&self.entries).clone()
    }
}

impl TraceSink for RecordingTrace {
    fn trace(&self, event: &Event, node: &dyn ChainNode, entering: bool) {
        lock(&self.entries).push((node.describe(event), entering));
    }
}

/// A host wired to a [`ManualScheduler`], with handles on its parts.
pub struct Harness {
    pub host: Host,
    pub scheduler: Arc<ManualScheduler>,
    pub lifecycle: Arc<HostLifecycle>,
    pub timings: Arc<SpanRecorder>,
    pub profiler: Arc<SpanRecorder>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_trace(trace: Arc<RecordingTrace>) -> Self {
        Self::build(Some(trace))
    }

    fn build(trace: Option<Arc<RecordingTrace>>) -> Self {
        let scheduler = Arc::new(ManualScheduler::default());
        let lifecycle = Arc::new(HostLifecycle::new());
        let timings = Arc::new(SpanRecorder::timings(false));
        let profiler = Arc::new(SpanRecorder::profiler(false));

        let mut builder = Host::builder(scheduler.clone())
            .lifecycle(lifecycle.clone())
            .timings(timings.clone())
            .profiler(profiler.clone());
        if let Some(trace) = trace {
            builder = builder.trace(trace);
        }
        Self {
            host: builder.build(),
            scheduler,
            lifecycle,
            timings,
            profiler,
        }
    }
}
