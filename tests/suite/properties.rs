//! Ordering, ownership and cleanup across many concurrent events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tether_engine::{ChainBuilder, EventHandle, EventSource, Step, locals};

use crate::common::{
    Journal, event_with_x, instrumented_runtime, on_privileged_thread, runtime, settle, x_of,
};

const EVENTS: u64 = 24;

#[test]
fn steps_after_a_detour_run_in_chain_order_per_event() {
    let runtime = runtime();
    let journal: Journal<(u64, &'static str, bool)> = Journal::default();
    let (a, b, c) = (journal.clone(), journal.clone(), journal.clone());
    let trigger = ChainBuilder::new("order.sk:1")
        .then(Step::detour("first", move |event: &EventHandle| {
            a.push((event.id().value(), "first", on_privileged_thread()));
            Ok(())
        }))
        .unwrap()
        .then(Step::detour("second", move |event: &EventHandle| {
            b.push((event.id().value(), "second", on_privileged_thread()));
            Ok(())
        }))
        .unwrap()
        .then(Step::effect("third", move |event: &EventHandle| {
            c.push((event.id().value(), "third", on_privileged_thread()));
            Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    let source = EventSource::new();
    for _ in 0..EVENTS {
        runtime.dispatch(&trigger, source.next_event("test")).unwrap();
    }
    settle(&runtime);

    let entries = journal.entries();
    for id in 1..=EVENTS {
        let steps: Vec<_> = entries
            .iter()
            .filter(|(event, _, _)| *event == id)
            .map(|(_, step, privileged)| (*step, *privileged))
            .collect();
        assert_eq!(
            steps,
            vec![("first", false), ("second", false), ("third", true)],
            "event {id}"
        );
    }
    let stats = runtime.scheduler().stats();
    assert_eq!(stats.background_submitted, 2 * EVENTS);
    // One dispatch plus one resumption per detour.
    assert_eq!(stats.privileged_submitted, 3 * EVENTS);
}

#[test]
fn locals_survive_both_hops_for_every_event() {
    let runtime = runtime();
    let results: Journal<(u64, Option<i64>)> = Journal::default();
    let record = results.clone();
    let trigger = ChainBuilder::new("integrity.sk:1")
        .then(Step::detour("check and bump {_x}", |event: &EventHandle| {
            let expected = i64::try_from(event.id().value())?;
            anyhow::ensure!(x_of(event) == Some(expected), "wrong locals on event {}", event.id());
            locals::with_locals(event, |vars| vars.set("x", expected + 100));
            Ok(())
        }))
        .unwrap()
        .then(Step::detour("bump {_x} again", crate::common::increment_x))
        .unwrap()
        .then(Step::effect("record {_x}", move |event: &EventHandle| {
            record.push((event.id().value(), x_of(event)));
            Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    let source = EventSource::new();
    let events: Vec<EventHandle> = (1..=EVENTS)
        .map(|id| {
            let event = event_with_x(&source, i64::try_from(id).unwrap());
            runtime.dispatch(&trigger, Arc::clone(&event)).unwrap();
            event
        })
        .collect();
    settle(&runtime);

    assert_eq!(runtime.scheduler().stats().failed(), 0);
    let mut results = results.entries();
    results.sort_unstable();
    let expected: Vec<_> = (1..=EVENTS)
        .map(|id| (id, Some(i64::try_from(id).unwrap() + 101)))
        .collect();
    assert_eq!(results, expected);
    for event in &events {
        assert!(locals::snapshot(event).is_none(), "locals leaked on {}", event.id());
    }
}

#[test]
fn one_unit_owns_an_event_at_a_time() {
    let runtime = runtime();
    let active: Arc<Mutex<HashMap<u64, usize>>> = Arc::default();
    let overlaps = Arc::new(AtomicUsize::new(0));

    let step = {
        let active = Arc::clone(&active);
        let overlaps = Arc::clone(&overlaps);
        move |event: &EventHandle| -> anyhow::Result<()> {
            let id = event.id().value();
            {
                let mut active = active.lock().unwrap();
                let count = active.entry(id).or_default();
                if *count > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                *count += 1;
            }
            thread::sleep(Duration::from_millis(2));
            *active.lock().unwrap().entry(id).or_default() -= 1;
            Ok(())
        }
    };
    let trigger = ChainBuilder::new("ownership.sk:1")
        .then(Step::effect("sync a", step.clone()))
        .unwrap()
        .then(Step::detour("async b", step.clone()))
        .unwrap()
        .then(Step::effect("sync c", step.clone()))
        .unwrap()
        .then(Step::detour("async d", step))
        .unwrap()
        .build()
        .unwrap();

    let source = EventSource::new();
    for _ in 0..EVENTS {
        runtime.dispatch(&trigger, source.next_event("test")).unwrap();
    }
    settle(&runtime);

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.scheduler().stats().failed(), 0);
}

#[test]
fn instrumentation_spans_close_even_when_the_remainder_fails() {
    let runtime = instrumented_runtime();
    let trigger = ChainBuilder::new("timed.sk:7")
        .then(Step::detour("work", crate::common::increment_x))
        .unwrap()
        .then(Step::effect("fail", |_: &EventHandle| anyhow::bail!("remainder failed")))
        .unwrap()
        .build()
        .unwrap();

    let source = EventSource::new();
    for _ in 0..EVENTS {
        runtime.dispatch(&trigger, source.next_event("test")).unwrap();
    }
    settle(&runtime);

    for recorder in [runtime.timings(), runtime.profiler()] {
        assert_eq!(recorder.open_spans(), 0, "{}", recorder.name());
        let report = recorder.report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].label, "timed.sk:7");
        assert_eq!(report[0].calls, EVENTS);
    }
}

#[test]
fn disabled_instrumentation_records_nothing() {
    let runtime = runtime();
    let trigger = ChainBuilder::new("untimed.sk:1")
        .then(Step::detour("work", crate::common::increment_x))
        .unwrap()
        .then(Step::effect("done", |_: &EventHandle| Ok(())))
        .unwrap()
        .build()
        .unwrap();

    runtime
        .dispatch(&trigger, EventSource::new().next_event("test"))
        .unwrap();
    settle(&runtime);

    assert_eq!(runtime.timings().started_count(), 0);
    assert_eq!(runtime.profiler().started_count(), 0);
}
