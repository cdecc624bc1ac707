//! Worker scheduling: the privileged context and the background pool.
//!
//! The engine only talks to the [`Scheduler`] trait. [`HostScheduler`] is the
//! tokio-backed implementation used by the binary and the integration tests:
//!
//! ```text
//! run_on_privileged ──► unbounded channel ──► privileged thread (current-thread runtime + LocalSet)
//! run_later         ──► same channel, slept on the LocalSet, then run in place
//! run_async         ──► multi-thread runtime ──► spawn_blocking
//! ```
//!
//! Units report failure by returning `Err` or panicking. Either way the
//! scheduler logs the failure and counts it in [`SchedulerStats`]; nothing is
//! retried.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

/// A unit of work submitted to a scheduler.
pub type Unit = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Box a closure as a [`Unit`].
pub fn unit<F>(f: F) -> Unit
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    Box::new(f)
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("scheduler is shut down and no longer accepts work")]
    Closed,
    #[error("failed to start scheduler: {0}")]
    Startup(#[from] std::io::Error),
}

/// Submission primitives of the host's task scheduler.
pub trait Scheduler: Send + Sync {
    /// Run `unit` on some background worker. No ordering relative to other async units.
    fn run_async(&self, unit: Unit) -> Result<(), ScheduleError>;

    /// Run `unit` on the privileged context. Units submitted from one thread run in submission order.
    fn run_on_privileged(&self, unit: Unit) -> Result<(), ScheduleError>;

    /// Run `unit` on the privileged context once `delay` has elapsed.
    fn run_later(&self, delay: Duration, unit: Unit) -> Result<(), ScheduleError>;

    /// Whether the calling thread is the privileged context.
    fn is_privileged(&self) -> bool;
}

/// Submission and completion counters, per context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub background_submitted: u64,
    pub background_completed: u64,
    pub background_failed: u64,
    pub privileged_submitted: u64,
    pub privileged_completed: u64,
    pub privileged_failed: u64,
}

impl SchedulerStats {
    /// No submitted unit is still pending or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.background_submitted == self.background_completed + self.background_failed
            && self.privileged_submitted == self.privileged_completed + self.privileged_failed
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.background_failed + self.privileged_failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Background,
    Privileged,
}

impl Context {
    fn as_str(self) -> &'static str {
        match self {
            Context::Background => "background",
            Context::Privileged => "privileged",
        }
    }
}

/// Shared counters plus a condvar signalled on every completion.
#[derive(Debug, Default)]
struct Ledger {
    stats: Mutex<SchedulerStats>,
    settled: Condvar,
}

impl Ledger {
    fn submitted(&self, context: Context) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match context {
            Context::Background => stats.background_submitted += 1,
            Context::Privileged => stats.privileged_submitted += 1,
        }
    }

    /// Undo a submission that never reached the queue.
    fn withdrawn(&self, context: Context) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match context {
            Context::Background => stats.background_submitted -= 1,
            Context::Privileged => stats.privileged_submitted -= 1,
        }
        self.settled.notify_all();
    }

    fn finished(&self, context: Context, failure: Option<String>) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            match (context, failure.is_some()) {
                (Context::Background, false) => stats.background_completed += 1,
                (Context::Background, true) => stats.background_failed += 1,
                (Context::Privileged, false) => stats.privileged_completed += 1,
                (Context::Privileged, true) => stats.privileged_failed += 1,
            }
        }
        if let Some(message) = failure {
            tracing::error!(context = context.as_str(), "Scheduled unit failed: {message}");
        }
        self.settled.notify_all();
    }

    fn snapshot(&self) -> SchedulerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .settled
            .wait_timeout_while(guard, timeout, |stats| !stats.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        guard.is_idle()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked".to_string()
    }
}

/// One submitted unit's entry in the [`Ledger`].
///
/// Settles exactly once: through [`Settlement::finish`], through
/// [`Settlement::withdraw`], or as a failure when dropped unsettled (a task the
/// runtime discarded at shutdown before it ran).
struct Settlement {
    ledger: Arc<Ledger>,
    context: Context,
    settled: bool,
}

impl Settlement {
    fn submit(ledger: &Arc<Ledger>, context: Context) -> Self {
        ledger.submitted(context);
        Self {
            ledger: Arc::clone(ledger),
            context,
            settled: false,
        }
    }

    fn finish(mut self, failure: Option<String>) {
        self.settled = true;
        self.ledger.finished(self.context, failure);
    }

    fn withdraw(mut self) {
        self.settled = true;
        self.ledger.withdrawn(self.context);
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger
                .finished(self.context, Some("dropped at shutdown before it ran".to_string()));
        }
    }
}

/// Run a privileged unit in place, containing panics so the privileged thread survives.
fn run_contained(unit: Unit, settlement: Settlement) {
    let failure = match panic::catch_unwind(AssertUnwindSafe(unit)) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(format!("{err:#}")),
        Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
    };
    settlement.finish(failure);
}

struct PrivilegedCommand {
    unit: Unit,
    delay: Option<Duration>,
    settlement: Settlement,
}

async fn drain_privileged(mut rx: mpsc::UnboundedReceiver<PrivilegedCommand>) {
    while let Some(PrivilegedCommand {
        unit,
        delay,
        settlement,
    }) = rx.recv().await
    {
        match delay {
            None => run_contained(unit, settlement),
            // Dropped with the LocalSet if still asleep at shutdown; the settlement records it.
            Some(delay) => {
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(delay).await;
                    run_contained(unit, settlement);
                });
            }
        }
    }
}

/// Options for [`HostScheduler::start`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub privileged_thread_name: String,
    pub max_background_threads: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            privileged_thread_name: tether_config::DEFAULT_PRIVILEGED_THREAD_NAME.to_string(),
            max_background_threads: tether_config::DEFAULT_MAX_BACKGROUND_THREADS,
        }
    }
}

/// Tokio-backed scheduler with a dedicated privileged thread.
pub struct HostScheduler {
    background: Mutex<Option<Runtime>>,
    background_handle: Handle,
    privileged_tx: Mutex<Option<mpsc::UnboundedSender<PrivilegedCommand>>>,
    privileged_thread: Mutex<Option<JoinHandle<()>>>,
    privileged_id: ThreadId,
    ledger: Arc<Ledger>,
}

impl std::fmt::Debug for HostScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostScheduler")
            .field("privileged_id", &self.privileged_id)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl HostScheduler {
    pub fn start(options: &SchedulerOptions) -> Result<Self, ScheduleError> {
        let background = Builder::new_multi_thread()
            .thread_name("tether-worker")
            .max_blocking_threads(options.max_background_threads.max(1))
            .enable_time()
            .build()?;
        let privileged_runtime = Builder::new_current_thread().enable_time().build()?;

        let ledger = Arc::new(Ledger::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let privileged = thread::Builder::new()
            .name(options.privileged_thread_name.clone())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&privileged_runtime, drain_privileged(rx));
            })?;

        tracing::debug!(
            thread = %options.privileged_thread_name,
            max_background_threads = options.max_background_threads,
            "Host scheduler started"
        );

        Ok(Self {
            background_handle: background.handle().clone(),
            background: Mutex::new(Some(background)),
            privileged_tx: Mutex::new(Some(tx)),
            privileged_id: privileged.thread().id(),
            privileged_thread: Mutex::new(Some(privileged)),
            ledger,
        })
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.ledger.snapshot()
    }

    /// Block until every submitted unit has finished, or `timeout` elapses.
    ///
    /// Returns `true` if the scheduler went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.ledger.wait_idle(timeout)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.privileged_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting work, drain the privileged queue and stop the background pool.
    ///
    /// Units already queued on the privileged context still run. Background units
    /// that finish afterwards and try to hop back are refused with
    /// [`ScheduleError::Closed`]. Delayed units that have not fired, and background
    /// units the pool abandons, are dropped and counted as failed, so the stats
    /// are idle once this returns from a non-privileged thread.
    pub fn shutdown(&self, timeout: Duration) {
        let started = Instant::now();
        // Blocking on our own thread or runtime from the privileged context would deadlock.
        let on_privileged = self.is_privileged();
        self.privileged_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handle = self
            .privileged_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && !on_privileged
            && handle.join().is_err()
        {
            tracing::warn!("Privileged thread panicked during shutdown");
        }

        let runtime = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            if on_privileged {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(timeout.saturating_sub(started.elapsed()));
            }
        }
        tracing::debug!(stats = ?self.stats(), "Host scheduler shut down");
    }

    fn send_privileged(&self, delay: Option<Duration>, unit: Unit) -> Result<(), ScheduleError> {
        let guard = self
            .privileged_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(ScheduleError::Closed);
        };
        let command = PrivilegedCommand {
            unit,
            delay,
            settlement: Settlement::submit(&self.ledger, Context::Privileged),
        };
        if let Err(mpsc::error::SendError(command)) = tx.send(command) {
            command.settlement.withdraw();
            return Err(ScheduleError::Closed);
        }
        Ok(())
    }
}

impl Scheduler for HostScheduler {
    fn run_async(&self, unit: Unit) -> Result<(), ScheduleError> {
        // Held across the spawn so shutdown cannot close the pool in between.
        let open = self
            .privileged_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if open.is_none() {
            return Err(ScheduleError::Closed);
        }
        let settlement = Settlement::submit(&self.ledger, Context::Background);
        self.background_handle.spawn(async move {
            let failure = match tokio::task::spawn_blocking(unit).await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(join_err) if join_err.is_panic() => Some(format!(
                    "panicked: {}",
                    panic_message(join_err.into_panic().as_ref())
                )),
                Err(join_err) => Some(join_err.to_string()),
            };
            settlement.finish(failure);
        });
        Ok(())
    }

    fn run_on_privileged(&self, unit: Unit) -> Result<(), ScheduleError> {
        self.send_privileged(None, unit)
    }

    fn run_later(&self, delay: Duration, unit: Unit) -> Result<(), ScheduleError> {
        self.send_privileged(Some(delay), unit)
    }

    fn is_privileged(&self) -> bool {
        thread::current().id() == self.privileged_id
    }
}

impl Drop for HostScheduler {
    fn drop(&mut self) {
        // Never join here: the last handle may be dropped on the privileged thread itself.
        self.privileged_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            runtime.shutdown_background();
        }
    }
}
