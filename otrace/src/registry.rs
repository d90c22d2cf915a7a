//! Process-wide recorder state.
//!
//! The registry is created lazily on first touch. Initialization reads the
//! `OTRACE_*` environment exactly once and registers the at-exit flush hook.

use crate::gate::FilterConfig;
use crate::ring::ThreadBuffer;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub(crate) const DEFAULT_OUTPUT_PATH: &str = "trace.json";
pub(crate) const DEFAULT_RING_CAPACITY: usize = 1 << 15;
pub(crate) const DEFAULT_RATE_WINDOW_US: u64 = 1_000_000;

/// Rotated-output settings. `max_size_mb` is advisory: a flush is never
/// split across files.
#[derive(Clone, Debug)]
pub(crate) struct RotationConfig {
    pub pattern: String,
    pub max_size_mb: u32,
    pub max_files: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct OutputConfig {
    pub path: PathBuf,
    pub rotation: Option<RotationConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            rotation: None,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SynthConfig {
    pub rate_window_us: u64,
    /// Ordered percentile list for latency summaries, as fractions in (0, 1].
    pub percentiles: Vec<f64>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            rate_window_us: DEFAULT_RATE_WINDOW_US,
            percentiles: vec![0.5, 0.95, 0.99],
        }
    }
}

pub(crate) struct Registry {
    /// Head of the CAS-linked chain of thread buffers.
    pub head: AtomicPtr<ThreadBuffer>,
    pub enabled: AtomicBool,
    pub pid: AtomicU32,
    pub process_name: Mutex<Option<String>>,
    pub output: ArcSwap<OutputConfig>,
    pub rotation_index: AtomicU32,
    pub filter: ArcSwap<FilterConfig>,
    pub synth_enabled: AtomicBool,
    pub synth: ArcSwap<SynthConfig>,
    ring_capacity: AtomicUsize,
}

impl Registry {
    pub(crate) fn ring_capacity(&self) -> usize {
        self.ring_capacity.load(Ordering::Relaxed)
    }

    pub(crate) fn set_ring_capacity(&self, capacity: usize) {
        self.ring_capacity
            .store(capacity.max(1), Ordering::Relaxed);
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub(crate) fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let mut enabled = true;
        let mut keep_probability = 1.0f64;

        // Environment is consulted exactly once; ENABLE wins over DISABLE.
        if std::env::var_os("OTRACE_DISABLE").is_some() {
            enabled = false;
        }
        if std::env::var_os("OTRACE_ENABLE").is_some() {
            enabled = true;
        }
        if let Some(sample) = std::env::var_os("OTRACE_SAMPLE") {
            match sample.to_string_lossy().trim().parse::<f64>() {
                Ok(p) => keep_probability = p.clamp(0.0, 1.0),
                Err(_) => {
                    tracing::warn!(value = ?sample, "ignoring unparsable OTRACE_SAMPLE");
                }
            }
        }

        #[cfg(all(feature = "on-exit", not(test)))]
        {
            // SAFETY: the handler is an extern "C" fn with no arguments and
            // no unwinding; atexit only records the pointer.
            unsafe {
                libc::atexit(atexit_flush);
            }
        }

        Registry {
            head: AtomicPtr::new(std::ptr::null_mut()),
            enabled: AtomicBool::new(enabled),
            pid: AtomicU32::new(std::process::id()),
            process_name: Mutex::new(None),
            output: ArcSwap::from_pointee(OutputConfig::default()),
            rotation_index: AtomicU32::new(0),
            filter: ArcSwap::new(Arc::new(FilterConfig {
                keep_probability,
                ..FilterConfig::default()
            })),
            synth_enabled: AtomicBool::new(false),
            synth: ArcSwap::from_pointee(SynthConfig::default()),
            ring_capacity: AtomicUsize::new(DEFAULT_RING_CAPACITY),
        }
    })
}

#[cfg(all(feature = "on-exit", not(test)))]
extern "C" fn atexit_flush() {
    if let Err(error) = crate::snapshot::flush_inner(None) {
        tracing::debug!(%error, "at-exit flush failed");
    }
}
