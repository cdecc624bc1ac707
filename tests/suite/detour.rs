//! End-to-end detours: background step, then resume on the privileged thread.

use std::sync::Arc;

use tether_engine::{ChainBuilder, EventHandle, EventSource, ScheduleError, Step, locals};

use crate::common::{
    Journal, event_with_x, increment_x, on_privileged_thread, runtime, settle, x_of,
};

#[test]
fn increment_then_print_sees_updated_local() {
    let runtime = runtime();
    let printed: Journal<(Option<i64>, bool)> = Journal::default();
    let print = printed.clone();
    let trigger = ChainBuilder::new("scenario.sk:1")
        .then(Step::detour("increment {_x}", increment_x))
        .unwrap()
        .then(Step::effect("print {_x}", move |event: &EventHandle| {
            print.push((x_of(event), on_privileged_thread()));
            Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    let source = EventSource::new();
    let event = event_with_x(&source, 1);
    runtime.dispatch(&trigger, Arc::clone(&event)).unwrap();
    settle(&runtime);

    assert_eq!(printed.entries(), vec![(Some(2), true)]);
    assert!(event.is_delayed());
    assert!(locals::snapshot(&event).is_none());
}

#[test]
fn detour_runs_logic_off_the_privileged_thread() {
    let runtime = runtime();
    let threads: Journal<bool> = Journal::default();
    let record = threads.clone();
    let trigger = ChainBuilder::new("threads.sk:1")
        .then(Step::detour("where am i", move |_: &EventHandle| {
            record.push(on_privileged_thread());
            Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    runtime
        .dispatch(&trigger, EventSource::new().next_event("test"))
        .unwrap();
    settle(&runtime);

    assert_eq!(threads.entries(), vec![false]);
}

#[test]
fn no_successor_needs_no_privileged_resumption() {
    let runtime = runtime();
    let trigger = ChainBuilder::new("tail.sk:1")
        .then(Step::detour("increment {_x}", increment_x))
        .unwrap()
        .build()
        .unwrap();

    let source = EventSource::new();
    let event = event_with_x(&source, 1);
    runtime.dispatch(&trigger, Arc::clone(&event)).unwrap();
    settle(&runtime);

    let stats = runtime.scheduler().stats();
    assert_eq!(stats.background_submitted, 1);
    // The only privileged unit is the dispatch itself.
    assert_eq!(stats.privileged_submitted, 1);
    assert_eq!(stats.failed(), 0);
    assert!(locals::snapshot(&event).is_none());
}

#[test]
fn disabled_host_abandons_the_detour() {
    let runtime = runtime();
    runtime.lifecycle().disable();
    let after: Journal<()> = Journal::default();
    let record = after.clone();
    let trigger = ChainBuilder::new("disabled.sk:1")
        .then(Step::detour("increment {_x}", increment_x))
        .unwrap()
        .then(Step::effect("after", move |_: &EventHandle| {
            record.push(());
            Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    let source = EventSource::new();
    let event = event_with_x(&source, 1);
    runtime.dispatch(&trigger, Arc::clone(&event)).unwrap();
    settle(&runtime);

    assert_eq!(runtime.scheduler().stats().background_submitted, 0);
    assert!(after.entries().is_empty());
    assert!(event.is_delayed());
    assert!(locals::snapshot(&event).is_none());
}

#[test]
fn logic_failure_is_counted_and_stops_the_chain() {
    let runtime = runtime();
    let after: Journal<()> = Journal::default();
    let record = after.clone();
    let trigger = ChainBuilder::new("failing.sk:1")
        .then(Step::detour("lookup", |_: &EventHandle| {
            anyhow::bail!("lookup failed")
        }))
        .unwrap()
        .then(Step::effect("after", move |_: &EventHandle| {
            record.push(());
            Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    runtime
        .dispatch(&trigger, EventSource::new().next_event("test"))
        .unwrap();
    settle(&runtime);

    let stats = runtime.scheduler().stats();
    assert_eq!(stats.background_failed, 1);
    assert_eq!(stats.privileged_submitted, 1);
    assert!(after.entries().is_empty());
}

#[test]
fn panicking_logic_does_not_take_down_the_host() {
    let runtime = runtime();
    let trigger = ChainBuilder::new("panic.sk:1")
        .then(Step::detour("explode", |_: &EventHandle| panic!("exploded")))
        .unwrap()
        .then(Step::effect("after", |_: &EventHandle| Ok(())))
        .unwrap()
        .build()
        .unwrap();
    let source = EventSource::new();

    runtime.dispatch(&trigger, source.next_event("a")).unwrap();
    assert!(runtime.wait_idle(crate::common::WAIT));
    runtime.dispatch(&trigger, source.next_event("b")).unwrap();
    settle(&runtime);

    assert_eq!(runtime.scheduler().stats().background_failed, 2);
}

#[test]
fn dispatch_after_shutdown_is_refused() {
    let runtime = runtime();
    let trigger = ChainBuilder::new("closed.sk:1")
        .then(Step::effect("noop", |_: &EventHandle| Ok(())))
        .unwrap()
        .build()
        .unwrap();
    runtime.shutdown(crate::common::WAIT);

    let result = runtime.dispatch(&trigger, EventSource::new().next_event("late"));
    assert!(matches!(result, Err(ScheduleError::Closed)));
}
