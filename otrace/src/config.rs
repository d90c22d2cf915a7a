//! Programmatic configuration surface.
//!
//! Setters swap immutable config snapshots through `ArcSwap`, so the emit
//! hot path never takes a lock to read them.

use crate::error::{Result, TraceError};
use crate::gate::{parse_csv, FilterConfig, FilterPredicate};
use crate::registry::{registry, OutputConfig, RotationConfig, SynthConfig};
use crate::writer;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Resume recording.
pub fn enable() {
    registry().enabled.store(true, Ordering::Release);
}

/// Pause recording. Already-reserved slots still commit.
pub fn disable() {
    registry().enabled.store(false, Ordering::Release);
}

pub fn is_enabled() -> bool {
    registry().enabled.load(Ordering::Relaxed)
}

/// Single-file output target; clears any rotation configuration.
pub fn set_output_path(path: impl Into<PathBuf>) {
    registry().output.store(Arc::new(OutputConfig {
        path: path.into(),
        rotation: None,
    }));
}

/// Rotated output. The pattern may contain one printf-style `%u`/`%d`
/// placeholder (a missing one gets `-NNNNNN` appended) and a `.gz` suffix
/// requests gzip. An empty pattern returns to single-file mode.
/// `max_size_mb` is advisory; a flush is never split across files.
pub fn set_output_pattern(pattern: &str, max_size_mb: u32, max_files: u32) -> Result<()> {
    let reg = registry();
    let current_path = reg.output.load().path.clone();
    if pattern.is_empty() {
        reg.output.store(Arc::new(OutputConfig {
            path: current_path,
            rotation: None,
        }));
        return Ok(());
    }
    if writer::placeholder_count(pattern) > 1 {
        return Err(TraceError::ConfigInvalid(format!(
            "rotation pattern has more than one placeholder: {pattern}"
        )));
    }
    reg.rotation_index.store(0, Ordering::Relaxed);
    reg.output.store(Arc::new(OutputConfig {
        path: current_path,
        rotation: Some(RotationConfig {
            pattern: pattern.to_string(),
            max_size_mb,
            max_files: max_files.max(1),
        }),
    }));
    Ok(())
}

fn update_filter(update: impl Fn(&mut FilterConfig)) {
    registry().filter.rcu(|current| {
        let mut next = FilterConfig::clone(current);
        update(&mut next);
        next
    });
}

/// Category allowlist CSV; empty admits every category.
pub fn set_allowed_categories(csv: &str) {
    update_filter(|f| f.allow = parse_csv(csv));
}

/// Category denylist CSV; empty denies none.
pub fn set_denied_categories(csv: &str) {
    update_filter(|f| f.deny = parse_csv(csv));
}

/// Keep probability in [0, 1]; out-of-range values are clamped.
pub fn set_sampling(keep_probability: f64) {
    let clamped = if keep_probability.is_finite() {
        keep_probability.clamp(0.0, 1.0)
    } else {
        1.0
    };
    if clamped != keep_probability {
        tracing::warn!(keep_probability, "sampling probability clamped");
    }
    update_filter(move |f| f.keep_probability = clamped);
}

/// Install a user predicate consulted last in the gate; it receives
/// (name, category) and drops the event when it returns false.
pub fn set_filter(predicate: impl Fn(&str, &str) -> bool + Send + Sync + 'static) {
    let predicate: FilterPredicate = Arc::new(predicate);
    update_filter(move |f| f.predicate = Some(predicate.clone()));
}

pub fn clear_filter() {
    update_filter(|f| f.predicate = None);
}

/// Toggle the post-snapshot synthesis pass (FPS, counter rates, latency
/// percentiles).
pub fn enable_synthesis(on: bool) {
    registry().synth_enabled.store(on, Ordering::Relaxed);
}

/// Synthesis parameters: the sliding-window width for rate tracks and the
/// ordered percentile list for latency summaries.
pub fn set_synthesis_config(rate_window_us: u64, percentiles: &[f64]) {
    let percentiles = percentiles.iter().map(|q| q.clamp(0.0, 1.0)).collect();
    registry().synth.store(Arc::new(SynthConfig {
        rate_window_us: rate_window_us.max(1),
        percentiles,
    }));
}

/// Events-per-thread ring capacity; applies to threads that register after
/// the call.
pub fn set_ring_capacity(capacity: usize) {
    registry().set_ring_capacity(capacity);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_with_two_placeholders_is_rejected() {
        let err = set_output_pattern("a-%u-%u.json", 1, 4).unwrap_err();
        assert!(matches!(err, TraceError::ConfigInvalid(_)));
        set_output_pattern("", 0, 0).unwrap();
    }

    #[test]
    fn empty_pattern_returns_to_single_file_mode() {
        set_output_pattern("rot-%u.json", 1, 2).unwrap();
        assert!(registry().output.load().rotation.is_some());
        set_output_pattern("", 0, 0).unwrap();
        assert!(registry().output.load().rotation.is_none());
    }

    #[test]
    fn sampling_is_clamped() {
        set_sampling(7.5);
        assert_eq!(registry().filter.load().keep_probability, 1.0);
        set_sampling(-1.0);
        assert_eq!(registry().filter.load().keep_probability, 0.0);
        set_sampling(1.0);
    }

    #[test]
    fn max_files_floor_is_one() {
        set_output_pattern("r-%u.json", 1, 0).unwrap();
        let out = registry().output.load();
        assert_eq!(out.rotation.as_ref().unwrap().max_files, 1);
        set_output_pattern("", 0, 0).unwrap();
    }
}
