//! Post-snapshot derived tracks.
//!
//! Synthesis is a pure function of the sorted snapshot: an FPS counter from
//! frame instants, a per-second derivative for every counter's primary
//! series, and latency percentile summaries for Complete events. Missing
//! inputs produce no output; the pass never fails.

use crate::event::{ArgValue, Event, Phase};
use crate::registry::SynthConfig;
use std::collections::BTreeMap;

pub(crate) const SYNTH_CATEGORY: &str = "synth";

/// Events must already be sorted by timestamp. Returned events carry
/// category "synth", tid 0, seq 0 and are re-sorted by the caller.
pub(crate) fn synthesize(events: &[Event], cfg: &SynthConfig, pid: u32) -> Vec<Event> {
    let mut out = Vec::new();
    synthesize_fps(events, cfg, pid, &mut out);
    synthesize_rates(events, pid, &mut out);
    synthesize_latencies(events, cfg, pid, &mut out);
    out
}

fn synth_event(ph: Phase, name: &str, ts_us: u64, pid: u32) -> Event {
    let mut ev = Event {
        ph,
        ts_us,
        pid,
        tid: 0,
        ..Event::default()
    };
    ev.name = name.into();
    ev.cat = SYNTH_CATEGORY.into();
    ev
}

/// Frames-per-second over a sliding window, sampled at each frame mark.
fn synthesize_fps(events: &[Event], cfg: &SynthConfig, pid: u32, out: &mut Vec<Event>) {
    let window = cfg.rate_window_us.max(1);
    let frames: Vec<u64> = events
        .iter()
        .filter(|e| {
            e.ph == Phase::Instant && e.name.as_str() == "frame" && e.cat.as_str() == "frame"
        })
        .map(|e| e.ts_us)
        .collect();

    let mut lo = 0;
    for (i, &ts) in frames.iter().enumerate() {
        while frames[lo] + window <= ts {
            lo += 1;
        }
        let count = (i - lo + 1) as f64;
        let fps = count * 1e6 / window as f64;
        let mut ev = synth_event(Phase::Counter, "fps", ts, pid);
        ev.push_number("fps", fps);
        out.push(ev);
    }
}

fn primary_series_value(ev: &Event) -> Option<f64> {
    match ev.arg_slice().first() {
        Some(arg) => match arg.value {
            ArgValue::Number(n) => Some(n),
            _ => None,
        },
        None => None,
    }
}

/// Per-second derivative of each counter's primary (first) series.
fn synthesize_rates(events: &[Event], pid: u32, out: &mut Vec<Event>) {
    let mut series: BTreeMap<&str, Vec<(u64, f64)>> = BTreeMap::new();
    for ev in events {
        if ev.ph != Phase::Counter || ev.cat.as_str() == SYNTH_CATEGORY {
            continue;
        }
        if let Some(value) = primary_series_value(ev) {
            series
                .entry(ev.name.as_str())
                .or_default()
                .push((ev.ts_us, value));
        }
    }

    for (name, mut samples) in series {
        if samples.len() < 2 {
            continue;
        }
        samples.sort_by_key(|&(ts, _)| ts);
        let rate_name = format!("rate({name})");
        for pair in samples.windows(2) {
            let (t0, v0) = pair[0];
            let (t1, v1) = pair[1];
            let dt_us = t1.saturating_sub(t0);
            if dt_us == 0 {
                continue;
            }
            let rate = (v1 - v0) * 1e6 / dt_us as f64;
            let mut ev = synth_event(Phase::Counter, &rate_name, t1, pid);
            ev.push_number("value", rate);
            out.push(ev);
        }
    }
}

fn percentile_key(q: f64) -> String {
    // Tenths of a percent avoid float display noise (0.999 -> "p99.9").
    let tenths = (q * 1000.0).round() as u64;
    if tenths % 10 == 0 {
        format!("p{}", tenths / 10)
    } else {
        format!("p{}.{}", tenths / 10, tenths % 10)
    }
}

/// One Instant per Complete-event name, at the trace's maximum timestamp,
/// with one argument per configured percentile, in milliseconds.
fn synthesize_latencies(events: &[Event], cfg: &SynthConfig, pid: u32, out: &mut Vec<Event>) {
    if cfg.percentiles.is_empty() {
        return;
    }
    let max_ts = match events.iter().map(|e| e.ts_us).max() {
        Some(ts) => ts,
        None => return,
    };

    let mut durations: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for ev in events {
        if ev.ph == Phase::Complete {
            durations.entry(ev.name.as_str()).or_default().push(ev.dur_us);
        }
    }

    for (name, mut durs) in durations {
        if durs.is_empty() {
            continue;
        }
        durs.sort_unstable();
        let n = durs.len();
        let mut ev = synth_event(Phase::Instant, &format!("latency({name})"), max_ts, pid);
        for &q in &cfg.percentiles {
            let q = q.clamp(0.0, 1.0);
            let idx = (q * (n - 1) as f64).floor() as usize;
            let ms = durs[idx.min(n - 1)] as f64 / 1000.0;
            ev.push_number(&percentile_key(q), ms);
        }
        out.push(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SynthConfig;

    fn frame_at(ts: u64) -> Event {
        let mut ev = Event {
            ph: Phase::Instant,
            ts_us: ts,
            ..Event::default()
        };
        ev.name = "frame".into();
        ev.cat = "frame".into();
        ev
    }

    fn counter_at(name: &str, ts: u64, value: f64) -> Event {
        let mut ev = Event {
            ph: Phase::Counter,
            ts_us: ts,
            ..Event::default()
        };
        ev.name = name.into();
        ev.push_number(name, value);
        ev
    }

    fn complete_at(name: &str, ts: u64, dur: u64) -> Event {
        let mut ev = Event {
            ph: Phase::Complete,
            ts_us: ts,
            dur_us: dur,
            ..Event::default()
        };
        ev.name = name.into();
        ev
    }

    fn cfg() -> SynthConfig {
        SynthConfig {
            rate_window_us: 1_000_000,
            percentiles: vec![0.5, 0.95, 0.99],
        }
    }

    #[test]
    fn empty_snapshot_produces_nothing() {
        assert!(synthesize(&[], &cfg(), 1).is_empty());
    }

    #[test]
    fn fps_counts_frames_in_window() {
        // Four frames 100ms apart; with a 1s window every frame so far counts.
        let events: Vec<Event> = (0..4).map(|i| frame_at(i * 100_000)).collect();
        let out = synthesize(&events, &cfg(), 1);
        let fps: Vec<&Event> = out.iter().filter(|e| e.name.as_str() == "fps").collect();
        assert_eq!(fps.len(), 4);
        // First frame alone in its window: 1 frame / 1s.
        assert_eq!(fps[0].arg_slice()[0].value, ArgValue::Number(1.0));
        assert_eq!(fps[3].arg_slice()[0].value, ArgValue::Number(4.0));
        assert!(fps.iter().all(|e| e.cat.as_str() == "synth" && e.tid == 0));
    }

    #[test]
    fn fps_window_slides() {
        let events = vec![frame_at(0), frame_at(100), frame_at(2_000_000)];
        let out = synthesize(&events, &cfg(), 1);
        let fps: Vec<f64> = out
            .iter()
            .filter(|e| e.name.as_str() == "fps")
            .map(|e| match e.arg_slice()[0].value {
                ArgValue::Number(n) => n,
                _ => f64::NAN,
            })
            .collect();
        // The late frame's window no longer contains the first two.
        assert_eq!(fps, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn counter_rate_is_per_second() {
        // +1024 bytes every 10ms -> 102400 bytes/s.
        let events: Vec<Event> = (0..5)
            .map(|i| counter_at("bytes", i * 10_000, (i as f64 + 1.0) * 1024.0))
            .collect();
        let out = synthesize(&events, &cfg(), 1);
        let rates: Vec<&Event> = out
            .iter()
            .filter(|e| e.name.as_str() == "rate(bytes)")
            .collect();
        assert_eq!(rates.len(), 4);
        for r in &rates {
            assert_eq!(r.arg_slice()[0].key.as_str(), "value");
            assert_eq!(r.arg_slice()[0].value, ArgValue::Number(102_400.0));
        }
    }

    #[test]
    fn single_sample_counters_produce_no_rate() {
        let events = vec![counter_at("lonely", 10, 1.0)];
        let out = synthesize(&events, &cfg(), 1);
        assert!(out.iter().all(|e| e.name.as_str() != "rate(lonely)"));
    }

    #[test]
    fn zero_dt_pairs_are_skipped() {
        let events = vec![counter_at("c", 10, 1.0), counter_at("c", 10, 5.0)];
        let out = synthesize(&events, &cfg(), 1);
        assert!(out.iter().all(|e| e.name.as_str() != "rate(c)"));
    }

    #[test]
    fn latency_percentiles_use_floor_index_in_ms() {
        // Durations 1000..=10000 us; p50 index = floor(0.5*9) = 4 -> 5000us.
        let events: Vec<Event> = (1..=10)
            .map(|i| complete_at("tile", i * 100, i * 1000))
            .collect();
        let out = synthesize(&events, &cfg(), 1);
        let lat: Vec<&Event> = out
            .iter()
            .filter(|e| e.name.as_str() == "latency(tile)")
            .collect();
        assert_eq!(lat.len(), 1);
        let ev = lat[0];
        assert_eq!(ev.ts_us, 1000); // max timestamp in the trace
        let args = ev.arg_slice();
        assert_eq!(args[0].key.as_str(), "p50");
        assert_eq!(args[0].value, ArgValue::Number(5.0));
        assert_eq!(args[1].key.as_str(), "p95");
        assert_eq!(args[1].value, ArgValue::Number(9.0));
        assert_eq!(args[2].key.as_str(), "p99");
        assert_eq!(args[2].value, ArgValue::Number(9.0));
    }

    #[test]
    fn synthesis_is_pure() {
        let events: Vec<Event> = (0..10)
            .map(|i| frame_at(i * 50_000))
            .chain((0..5).map(|i| counter_at("q", i * 1000, i as f64)))
            .chain((0..5).map(|i| complete_at("s", i * 10, 100 + i)))
            .collect();
        let a = synthesize(&events, &cfg(), 1);
        let b = synthesize(&events, &cfg(), 1);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.name.as_str(), y.name.as_str());
            assert_eq!(x.ts_us, y.ts_us);
            assert_eq!(x.arg_slice(), y.arg_slice());
        }
    }

    #[test]
    fn percentile_keys_format_cleanly() {
        assert_eq!(percentile_key(0.5), "p50");
        assert_eq!(percentile_key(0.95), "p95");
        assert_eq!(percentile_key(0.99), "p99");
        assert_eq!(percentile_key(0.999), "p99.9");
    }
}
