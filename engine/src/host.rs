//! The host environment handed to every node walk.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tether_config::TetherConfig;

use crate::delay::{DelayRegistry, EventDelayMarker};
use crate::event::EventHandle;
use crate::instrument::{Instrumentation, SpanRecorder};
use crate::lifecycle::{HostLifecycle, Lifecycle};
use crate::scheduler::{HostScheduler, ScheduleError, Scheduler, SchedulerOptions, unit};
use crate::trace::{TraceSink, TracingSink};
use crate::trigger::Trigger;
use crate::walker::{ChainWalker, SyncWalker};

/// Everything a node may need from the host. Cheap to clone.
#[derive(Clone)]
pub struct Host {
    scheduler: Arc<dyn Scheduler>,
    lifecycle: Arc<dyn Lifecycle>,
    delays: Arc<dyn DelayRegistry>,
    walker: Arc<dyn ChainWalker>,
    trace: Arc<dyn TraceSink>,
    timings: Arc<dyn Instrumentation>,
    profiler: Arc<dyn Instrumentation>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("enabled", &self.lifecycle.is_enabled())
            .field("timings", &self.timings.enabled())
            .field("profiler", &self.profiler.enabled())
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Start building a host around `scheduler`. Every other part has a default.
    pub fn builder(scheduler: Arc<dyn Scheduler>) -> HostBuilder {
        HostBuilder::new(scheduler)
    }

    #[must_use]
    pub fn scheduler(&self) -> &dyn Scheduler {
        &*self.scheduler
    }

    #[must_use]
    pub fn lifecycle(&self) -> &dyn Lifecycle {
        &*self.lifecycle
    }

    #[must_use]
    pub fn delays(&self) -> &dyn DelayRegistry {
        &*self.delays
    }

    #[must_use]
    pub fn walker(&self) -> &dyn ChainWalker {
        &*self.walker
    }

    #[must_use]
    pub fn trace(&self) -> &dyn TraceSink {
        &*self.trace
    }

    #[must_use]
    pub fn timings(&self) -> &dyn Instrumentation {
        &*self.timings
    }

    #[must_use]
    pub fn profiler(&self) -> &dyn Instrumentation {
        &*self.profiler
    }

    /// Run `trigger` for `event` on the privileged context.
    pub fn dispatch(&self, trigger: &Arc<Trigger>, event: EventHandle) -> Result<(), ScheduleError> {
        let trigger = Arc::clone(trigger);
        let env = self.clone();
        tracing::debug!(event = %event.id(), trigger = %trigger.label(), "Dispatching event");
        self.scheduler.run_on_privileged(unit(move || {
            trigger.execute(&env, &event);
            Ok(())
        }))
    }
}

pub struct HostBuilder {
    scheduler: Arc<dyn Scheduler>,
    lifecycle: Option<Arc<dyn Lifecycle>>,
    delays: Option<Arc<dyn DelayRegistry>>,
    walker: Option<Arc<dyn ChainWalker>>,
    trace: Option<Arc<dyn TraceSink>>,
    timings: Option<Arc<dyn Instrumentation>>,
    profiler: Option<Arc<dyn Instrumentation>>,
}

impl fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuilder").finish_non_exhaustive()
    }
}

impl HostBuilder {
    fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            lifecycle: None,
            delays: None,
            walker: None,
            trace: None,
            timings: None,
            profiler: None,
        }
    }

    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    #[must_use]
    pub fn delays(mut self, delays: Arc<dyn DelayRegistry>) -> Self {
        self.delays = Some(delays);
        self
    }

    #[must_use]
    pub fn walker(mut self, walker: Arc<dyn ChainWalker>) -> Self {
        self.walker = Some(walker);
        self
    }

    #[must_use]
    pub fn trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    #[must_use]
    pub fn timings(mut self, timings: Arc<dyn Instrumentation>) -> Self {
        self.timings = Some(timings);
        self
    }

    #[must_use]
    pub fn profiler(mut self, profiler: Arc<dyn Instrumentation>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    #[must_use]
    pub fn build(self) -> Host {
        Host {
            scheduler: self.scheduler,
            lifecycle: self
                .lifecycle
                .unwrap_or_else(|| Arc::new(HostLifecycle::new())),
            delays: self.delays.unwrap_or_else(|| Arc::new(EventDelayMarker)),
            walker: self.walker.unwrap_or_else(|| Arc::new(SyncWalker)),
            trace: self.trace.unwrap_or_else(|| Arc::new(TracingSink::default())),
            timings: self
                .timings
                .unwrap_or_else(|| Arc::new(SpanRecorder::timings(false))),
            profiler: self
                .profiler
                .unwrap_or_else(|| Arc::new(SpanRecorder::profiler(false))),
        }
    }
}

/// A running host: the tokio scheduler plus the concrete parts the binary
/// and integration tests want to inspect.
#[derive(Debug)]
pub struct HostRuntime {
    host: Host,
    scheduler: Arc<HostScheduler>,
    lifecycle: Arc<HostLifecycle>,
    timings: Arc<SpanRecorder>,
    profiler: Arc<SpanRecorder>,
}

impl HostRuntime {
    pub fn start(config: &TetherConfig) -> Result<Self, ScheduleError> {
        let options = SchedulerOptions {
            privileged_thread_name: config.privileged_thread_name(),
            max_background_threads: config.max_background_threads(),
        };
        let scheduler = Arc::new(HostScheduler::start(&options)?);
        let lifecycle = Arc::new(HostLifecycle::new());
        let timings = Arc::new(SpanRecorder::timings(config.timings_enabled()));
        let profiler = Arc::new(SpanRecorder::profiler(config.profiler_enabled()));

        let host = Host::builder(scheduler.clone())
            .lifecycle(lifecycle.clone())
            .trace(Arc::new(TracingSink::new(config.debug_verbosity())))
            .timings(timings.clone())
            .profiler(profiler.clone())
            .build();
        tracing::info!(
            timings = config.timings_enabled(),
            profiler = config.profiler_enabled(),
            "Host runtime started"
        );

        Ok(Self {
            host,
            scheduler,
            lifecycle,
            timings,
            profiler,
        })
    }

    #[must_use]
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn dispatch(&self, trigger: &Arc<Trigger>, event: EventHandle) -> Result<(), ScheduleError> {
        self.host.dispatch(trigger, event)
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<HostScheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<HostLifecycle> {
        &self.lifecycle
    }

    #[must_use]
    pub fn timings(&self) -> &Arc<SpanRecorder> {
        &self.timings
    }

    #[must_use]
    pub fn profiler(&self) -> &Arc<SpanRecorder> {
        &self.profiler
    }

    /// Block until all submitted work has finished. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Disable the host, then stop the scheduler.
    pub fn shutdown(&self, timeout: Duration) {
        self.lifecycle.disable();
        self.scheduler.shutdown(timeout);
    }
}
