//! Typed event emitters.
//!
//! Every emitter follows the same skeleton: re-entry guard, admission gate,
//! reserve a slot on the calling thread's ring, fill, commit (on guard drop).

use crate::event::{ArgValue, Event, Phase};
use crate::gate;
use crate::registry::{registry, Registry};
use crate::ring::{self, with_thread_buffer};
use crate::timebase;
use std::cell::Cell;
use std::sync::atomic::Ordering;

thread_local! {
    static IN_TRACER: Cell<bool> = const { Cell::new(false) };
}

/// Clears the in-tracer flag when dropped.
pub(crate) struct ReentryGuard {
    _priv: (),
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_TRACER.with(|flag| flag.set(false));
    }
}

/// Mark the thread as inside the tracer; `None` if it already is.
pub(crate) fn enter_tracer() -> Option<ReentryGuard> {
    IN_TRACER.with(|flag| {
        if flag.get() {
            None
        } else {
            flag.set(true);
            Some(ReentryGuard { _priv: () })
        }
    })
}

pub(crate) fn in_tracer() -> bool {
    IN_TRACER.with(Cell::get)
}

fn fill_common(reg: &Registry, ev: &mut Event, ph: Phase, name: &str, cat: &str) {
    ev.ts_us = timebase::now_us();
    // Refresh the cached pid lazily; it changes after fork.
    let pid = std::process::id();
    if reg.pid.load(Ordering::Relaxed) != pid {
        reg.pid.store(pid, Ordering::Relaxed);
    }
    ev.pid = pid;
    ev.ph = ph;
    ev.name = name.into();
    ev.cat = cat.into();
}

fn write_slot(reg: &Registry, ph: Phase, name: &str, cat: &str, fill: impl FnOnce(&mut Event)) {
    let tb = with_thread_buffer();
    let mut slot = tb.append();
    fill_common(reg, &mut slot, ph, name, cat);
    fill(&mut slot);
}

fn emit_gated(ph: Phase, name: &str, cat: &str, fill: impl FnOnce(&mut Event)) {
    let Some(_guard) = enter_tracer() else {
        return;
    };
    let reg = registry();
    if !gate::admit(reg, name, cat) {
        return;
    }
    write_slot(reg, ph, name, cat, fill);
}

/// Emit without consulting the gate; used by paths whose admission was
/// decided earlier (scope exit).
pub(crate) fn emit_pregated(ph: Phase, name: &str, cat: &str, fill: impl FnOnce(&mut Event)) {
    let Some(_guard) = enter_tracer() else {
        return;
    };
    let reg = registry();
    write_slot(reg, ph, name, cat, fill);
}

pub fn begin(name: &str) {
    begin_with_category(name, "");
}

pub fn begin_with_category(name: &str, cat: &str) {
    emit_gated(Phase::Begin, name, cat, |_| {});
}

pub fn end(name: &str) {
    end_with_category(name, "");
}

pub fn end_with_category(name: &str, cat: &str) {
    emit_gated(Phase::End, name, cat, |_| {});
}

pub fn instant(name: &str) {
    instant_with_category(name, "");
}

pub fn instant_with_category(name: &str, cat: &str) {
    emit_gated(Phase::Instant, name, cat, |_| {});
}

/// Instant with key/value arguments. Values come from the
/// [`ArgValue`] conversions (integers, floats, bools, bounded strings);
/// keys past the argument capacity are silently dropped.
pub fn instant_with_args(name: &str, cat: &str, args: &[(&str, ArgValue)]) {
    emit_gated(Phase::Instant, name, cat, |ev| {
        for (key, value) in args {
            ev.push_arg(key, *value);
        }
    });
}

/// Complete slice with an explicit duration in microseconds.
pub fn complete(name: &str, dur_us: u64) {
    complete_with_category(name, "", dur_us);
}

pub fn complete_with_category(name: &str, cat: &str, dur_us: u64) {
    emit_gated(Phase::Complete, name, cat, |ev| ev.dur_us = dur_us);
}

pub fn complete_with_args(name: &str, cat: &str, dur_us: u64, args: &[(&str, ArgValue)]) {
    emit_gated(Phase::Complete, name, cat, |ev| {
        ev.dur_us = dur_us;
        for (key, value) in args {
            ev.push_arg(key, *value);
        }
    });
}

/// Counter sample with a single series keyed by the counter's own name.
pub fn counter(name: &str, value: f64) {
    counter_with_category(name, "", value);
}

pub fn counter_with_category(name: &str, cat: &str, value: f64) {
    emit_gated(Phase::Counter, name, cat, |ev| {
        let own = ev.name;
        ev.push_number(own.as_str(), value);
    });
}

/// Multi-series counter. A counter always carries at least one numeric
/// argument: with an empty series list, the event's own name becomes the
/// first key with value 0.
pub fn counter_series(name: &str, cat: &str, series: &[(&str, f64)]) {
    emit_gated(Phase::Counter, name, cat, |ev| {
        for (key, value) in series {
            ev.push_number(key, *value);
        }
        if ev.argc == 0 {
            let own = ev.name;
            ev.push_number(own.as_str(), 0.0);
        }
    });
}

pub fn flow_begin(id: u64) {
    flow_begin_named(id, "", "");
}

pub fn flow_step(id: u64) {
    flow_step_named(id, "", "");
}

pub fn flow_end(id: u64) {
    flow_end_named(id, "", "");
}

pub fn flow_begin_named(id: u64, name: &str, cat: &str) {
    emit_flow(Phase::FlowStart, id, name, cat);
}

pub fn flow_step_named(id: u64, name: &str, cat: &str) {
    emit_flow(Phase::FlowStep, id, name, cat);
}

pub fn flow_end_named(id: u64, name: &str, cat: &str) {
    emit_flow(Phase::FlowEnd, id, name, cat);
}

fn emit_flow(ph: Phase, id: u64, name: &str, cat: &str) {
    let name = if name.is_empty() { "flow" } else { name };
    let cat = if cat.is_empty() { "flow" } else { cat };
    emit_gated(ph, name, cat, |ev| ev.flow_id = id);
}

/// Frame boundary: instant named "frame" in category "frame".
pub fn mark_frame(index: u64) {
    emit_gated(Phase::Instant, "frame", "frame", |ev| {
        ev.push_number("frame", index as f64);
    });
}

pub fn mark_frame_labeled(label: &str) {
    emit_gated(Phase::Instant, "frame", "frame", |ev| {
        ev.push_arg("label", label.into());
    });
}

/// Name the calling thread in the output. Stored on the thread buffer; the
/// snapshot emits the metadata row.
pub fn set_thread_name(name: &str) {
    let Some(_guard) = enter_tracer() else {
        return;
    };
    let tb = with_thread_buffer();
    let mut slot = tb.thread_name.lock();
    *slot = if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    };
}

/// Position the calling thread's track in the viewer; lower sorts higher.
pub fn set_thread_sort_index(index: i32) {
    let Some(_guard) = enter_tracer() else {
        return;
    };
    let tb = with_thread_buffer();
    tb.sort_index.store(index, Ordering::Relaxed);
}

pub fn set_process_name(name: &str) {
    let Some(_guard) = enter_tracer() else {
        return;
    };
    let reg = registry();
    let mut slot = reg.process_name.lock();
    *slot = if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    };
}

/// Color hint consumed by the next event emitted from this thread. One-shot.
pub fn set_next_color(cname: &str) {
    ring::set_pending_color(cname);
}
