//! Microsecond timestamp source.
//!
//! All timestamps are microseconds since the first read in the process. The
//! backend is chosen once, at first use; [`set_clock_source`] has no effect
//! afterwards.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime};

/// Timestamp backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    /// Steady clock, immune to wall-clock adjustment. The default.
    Monotonic,
    /// x86 cycle counter, calibrated against the monotonic clock at first
    /// use. Falls back to Monotonic on other architectures.
    Tsc,
    /// System clock. May jump when the wall clock is adjusted; lossy.
    Wall,
}

const REQ_MONOTONIC: u8 = 0;
const REQ_TSC: u8 = 1;
const REQ_WALL: u8 = 2;

static REQUESTED: AtomicU8 = AtomicU8::new(REQ_MONOTONIC);
static CLOCK: OnceLock<Clock> = OnceLock::new();

enum Clock {
    Monotonic { epoch: Instant },
    #[cfg(target_arch = "x86_64")]
    Tsc { base: u64, cycles_per_us: f64 },
    Wall { epoch: SystemTime },
}

/// Select the timestamp backend. Only effective before the first timestamp is
/// taken; later calls are ignored with a diagnostic.
pub fn set_clock_source(source: ClockSource) {
    let req = match source {
        ClockSource::Monotonic => REQ_MONOTONIC,
        ClockSource::Tsc => REQ_TSC,
        ClockSource::Wall => REQ_WALL,
    };
    if CLOCK.get().is_some() {
        tracing::warn!(?source, "clock source change ignored, timebase already in use");
        return;
    }
    REQUESTED.store(req, Ordering::Relaxed);
}

/// Microseconds since the first call in this process. Thread-safe, wait-free
/// after the first call, and allocation-free.
pub fn now_us() -> u64 {
    match CLOCK.get_or_init(init_clock) {
        Clock::Monotonic { epoch } => epoch.elapsed().as_micros() as u64,
        #[cfg(target_arch = "x86_64")]
        Clock::Tsc {
            base,
            cycles_per_us,
        } => {
            let cycles = rdtsc_fenced().wrapping_sub(*base);
            (cycles as f64 / cycles_per_us) as u64
        }
        Clock::Wall { epoch } => SystemTime::now()
            .duration_since(*epoch)
            .unwrap_or(Duration::ZERO)
            .as_micros() as u64,
    }
}

fn init_clock() -> Clock {
    match REQUESTED.load(Ordering::Relaxed) {
        REQ_WALL => Clock::Wall {
            epoch: SystemTime::now(),
        },
        #[cfg(target_arch = "x86_64")]
        REQ_TSC => Clock::Tsc {
            base: rdtsc_fenced(),
            cycles_per_us: calibrate_tsc(),
        },
        _ => Clock::Monotonic {
            epoch: Instant::now(),
        },
    }
}

#[cfg(target_arch = "x86_64")]
fn rdtsc_fenced() -> u64 {
    use std::arch::x86_64::{_mm_lfence, _rdtsc};
    // SAFETY: lfence and rdtsc are unprivileged and have no memory effects;
    // the fences serialize the read against out-of-order execution.
    unsafe {
        _mm_lfence();
        let v = _rdtsc();
        _mm_lfence();
        v
    }
}

/// Busy-wait ~1 ms against the monotonic clock, five rounds, and keep the
/// minimum cycles-per-microsecond estimate.
#[cfg(target_arch = "x86_64")]
fn calibrate_tsc() -> f64 {
    const ROUNDS: usize = 5;
    const WINDOW: Duration = Duration::from_millis(1);

    let mut best = f64::MAX;
    for _ in 0..ROUNDS {
        let t0 = Instant::now();
        let c0 = rdtsc_fenced();
        while t0.elapsed() < WINDOW {
            std::hint::spin_loop();
        }
        let us = t0.elapsed().as_micros() as f64;
        let cycles = rdtsc_fenced().wrapping_sub(c0) as f64;
        if us > 0.0 {
            let per_us = cycles / us;
            if per_us < best {
                best = per_us;
            }
        }
    }
    if best > 0.0 && best.is_finite() {
        best
    } else {
        1.0
    }
}
