//! Tether demo host - runs a small script for a batch of events.
//!
//! # Script
//!
//! ```text
//! set {_x} to <event number>
//! detour: look up the bonus and add it to {_x}     (background worker)
//! wait 10 ms                                        (privileged, later)
//! record {_x}
//! ```
//!
//! Every event walks the chain concurrently with the others. Once all of them
//! have finished, the recorded values, the scheduler counters and the timing
//! and profiler reports are printed to stdout as one JSON document.
//!
//! Usage: `tether [EVENTS]` (default 3).

use std::collections::BTreeMap;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tether_engine::{
    ChainBuilder, EventHandle, EventSource, HostRuntime, LabelReport, SchedulerStats, Step,
    TetherConfig, Trigger, Value, VariableSet, locals,
};

const DEFAULT_EVENTS: u64 = 3;
const BONUS: i64 = 1;
const LOOKUP_LATENCY: Duration = Duration::from_millis(20);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(tether_config::DEFAULT_LOG_FILTER));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries the JSON report; without a log file, log nothing.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.tether/logs/tether.log, wherever TETHER_CONFIG points.
    if let Some(dir) = tether_config::tether_dir() {
        candidates.push(dir.join("logs").join("tether.log"));
    }

    // Fallback: ./.tether/logs/tether.log
    candidates.push(PathBuf::from(".tether").join("logs").join("tether.log"));

    candidates
}

#[derive(Debug, Serialize)]
struct DemoReport {
    events: BTreeMap<String, Option<Value>>,
    scheduler: SchedulerStats,
    timings: Vec<LabelReport>,
    profiler: Vec<LabelReport>,
}

type Results = Arc<Mutex<BTreeMap<String, Option<Value>>>>;

fn demo_script(results: &Results) -> Result<Arc<Trigger>> {
    let record = Arc::clone(results);
    let trigger = ChainBuilder::new("demo.sk:1")
        .then(Step::effect("set {_x} to event number", |event: &EventHandle| {
            let number = i64::try_from(event.id().value()).context("event id overflow")?;
            locals::with_locals(event, |vars| vars.set("x", number));
            Ok(())
        }))?
        .then(Step::detour("add bonus to {_x}", |event: &EventHandle| {
            // Stands in for a slow lookup that must stay off the privileged thread.
            thread::sleep(LOOKUP_LATENCY);
            locals::with_locals(event, |vars| -> Result<()> {
                let x = integer_local(vars, "x")?;
                vars.set("x", x + BONUS);
                Ok(())
            })
        }))?
        .then(Step::wait(Duration::from_millis(10)))?
        .then(Step::effect("record {_x}", move |event: &EventHandle| {
            let x = locals::snapshot(event).and_then(|vars| vars.get("x").cloned());
            record
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(event.id().to_string(), x);
            Ok(())
        }))?
        .build()?;
    Ok(trigger)
}

fn integer_local(vars: &VariableSet, name: &str) -> Result<i64> {
    match vars.get(name) {
        Some(Value::Integer(n)) => Ok(*n),
        Some(other) => anyhow::bail!("{{_{name}}} is {}, not an integer", other.type_name()),
        None => anyhow::bail!("{{_{name}}} is not set"),
    }
}

fn event_count() -> Result<u64> {
    match env::args().nth(1) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid event count: {raw}")),
        None => Ok(DEFAULT_EVENTS),
    }
}

fn main() -> Result<()> {
    let (config, config_error) = match TetherConfig::load() {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(err) => (TetherConfig::default(), Some(err)),
    };
    init_tracing(&config.log_filter());
    if let Some(err) = config_error {
        tracing::warn!(path = %err.path().display(), "Ignoring config: {err}");
    }

    let events = event_count()?;
    let runtime = HostRuntime::start(&config)?;
    let results: Results = Arc::default();
    let trigger = demo_script(&results)?;

    let source = EventSource::new();
    for _ in 0..events {
        runtime.dispatch(&trigger, source.next_event("demo"))?;
    }

    let settled = runtime.wait_idle(SETTLE_TIMEOUT);
    if !settled {
        tracing::warn!("Timed out waiting for events to finish");
    }
    let report = DemoReport {
        events: results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
        scheduler: runtime.scheduler().stats(),
        timings: runtime.timings().report(),
        profiler: runtime.profiler().report(),
    };
    runtime.shutdown(SETTLE_TIMEOUT);

    println!("{}", serde_json::to_string_pretty(&report)?);
    anyhow::ensure!(settled, "events did not finish within {SETTLE_TIMEOUT:?}");
    Ok(())
}
