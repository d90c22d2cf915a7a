//! Snapshot and flush.
//!
//! A flush pauses new emissions (it does not interrupt in-flight writes),
//! copies every committed slot out of every registered ring, appends the
//! ts=0 metadata rows, stable-sorts by `(ts, tid, seq)`, optionally runs the
//! synthesis pass, writes the file, and restores the enabled flag — also on
//! failure.

use crate::error::{Result, TraceError};
use crate::event::{Event, Phase};
use crate::registry::{registry, Registry};
use crate::{emit, ring, synth, writer};
use std::path::Path;
use std::sync::atomic::Ordering;

/// Flush to the configured output (single file or rotation).
pub fn flush() -> Result<()> {
    flush_inner(None)
}

/// Flush to an explicit path, bypassing the configured output for this call.
pub fn flush_to(path: impl AsRef<Path>) -> Result<()> {
    flush_inner(Some(path.as_ref()))
}

pub(crate) fn flush_inner(path: Option<&Path>) -> Result<()> {
    let Some(_guard) = emit::enter_tracer() else {
        return Err(TraceError::ReentryDetected);
    };
    let reg = registry();
    let prev = reg.enabled.swap(false, Ordering::AcqRel);
    let result = snapshot_and_write(reg, path);
    reg.enabled.store(prev, Ordering::Release);
    if let Err(error) = &result {
        tracing::warn!(%error, "trace flush failed");
    }
    result
}

fn snapshot_and_write(reg: &Registry, path: Option<&Path>) -> Result<()> {
    let mut events = collect(reg);
    sort_events(&mut events);

    if reg.synth_enabled.load(Ordering::Relaxed) {
        let cfg = reg.synth.load();
        let extra = synth::synthesize(&events, &cfg, reg.pid.load(Ordering::Relaxed));
        if !extra.is_empty() {
            events.extend(extra);
            sort_events(&mut events);
        }
    }

    writer::write(reg, path, &events)
}

/// Copy committed events from every thread buffer and append the synthetic
/// metadata rows (thread names, sort indices, process name) at ts=0 so they
/// sort to the front.
fn collect(reg: &Registry) -> Vec<Event> {
    let mut out = Vec::with_capacity(4096);
    let pid = reg.pid.load(Ordering::Relaxed);

    ring::for_each_buffer(reg, |tb| {
        tb.ring.collect_committed(&mut out);

        let thread_name = tb.thread_name.lock().clone();
        if let Some(name) = thread_name {
            let mut ev = Event {
                ph: Phase::ThreadName,
                pid,
                tid: tb.tid,
                ..Event::default()
            };
            ev.name = name.as_str().into();
            out.push(ev);
        }

        let sort_index = tb.sort_index.load(Ordering::Relaxed);
        if sort_index != 0 {
            let mut ev = Event {
                ph: Phase::ThreadSortIndex,
                pid,
                tid: tb.tid,
                ..Event::default()
            };
            ev.push_number("sort_index", sort_index as f64);
            out.push(ev);
        }
    });

    let process_name = reg.process_name.lock().clone();
    if let Some(name) = process_name {
        let mut ev = Event {
            ph: Phase::ProcessName,
            pid,
            tid: 0,
            ..Event::default()
        };
        ev.name = name.as_str().into();
        out.push(ev);
    }

    out
}

/// Stable sort by `(ts, tid, seq)` — the determinism contract: identical
/// inputs produce an identical file.
pub(crate) fn sort_events(events: &mut [Event]) {
    events.sort_by_key(|e| e.sort_key());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ts: u64, tid: u32, seq: u64, name: &str) -> Event {
        let mut ev = Event {
            ts_us: ts,
            tid,
            seq,
            ..Event::default()
        };
        ev.name = name.into();
        ev
    }

    #[test]
    fn sort_orders_by_timestamp_first() {
        let mut events = vec![ev(20, 1, 1, "b"), ev(10, 2, 1, "a")];
        sort_events(&mut events);
        assert_eq!(events[0].name.as_str(), "a");
        assert_eq!(events[1].name.as_str(), "b");
    }

    #[test]
    fn timestamp_ties_break_by_tid_then_seq() {
        let mut events = vec![
            ev(10, 2, 1, "third"),
            ev(10, 1, 2, "second"),
            ev(10, 1, 1, "first"),
        ];
        sort_events(&mut events);
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let mut events = vec![ev(10, 1, 0, "one"), ev(10, 1, 0, "two"), ev(10, 1, 0, "three")];
        sort_events(&mut events);
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn metadata_rows_sort_to_the_front() {
        let mut meta = Event {
            ph: Phase::ThreadName,
            tid: 5,
            ..Event::default()
        };
        meta.name = "worker".into();
        let mut events = vec![ev(100, 1, 1, "payload"), meta];
        sort_events(&mut events);
        assert_eq!(events[0].ph, Phase::ThreadName);
    }
}
