//! Emit-time admission gate.
//!
//! Runs before any ring slot is reserved. The composition is fixed: enabled
//! flag, sampling, category allowlist, category denylist, user predicate.
//! The hot path takes no locks and performs no allocation: the filter
//! configuration is read through an `ArcSwap` and the sampling draw comes
//! from a thread-local xorshift generator.

use crate::registry::Registry;
use crate::ring;
use crate::timebase;
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) type FilterPredicate = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

#[derive(Clone)]
pub(crate) struct FilterConfig {
    /// Non-empty: only these categories pass.
    pub allow: Vec<String>,
    /// Categories that never pass.
    pub deny: Vec<String>,
    /// Probability an admitted event is kept; clamped to [0, 1].
    pub keep_probability: f64,
    pub predicate: Option<FilterPredicate>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            allow: Vec::new(),
            deny: Vec::new(),
            keep_probability: 1.0,
            predicate: None,
        }
    }
}

/// Split a CSV into trimmed, non-empty tokens.
pub(crate) fn parse_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn admit(reg: &Registry, name: &str, cat: &str) -> bool {
    if !reg.enabled.load(Ordering::Relaxed) {
        return false;
    }
    let filter = reg.filter.load();
    admit_filtered(&filter, name, cat, rand_unit)
}

fn admit_filtered(
    filter: &FilterConfig,
    name: &str,
    cat: &str,
    draw: impl FnOnce() -> f64,
) -> bool {
    if filter.keep_probability < 1.0 && draw() > filter.keep_probability {
        return false;
    }
    if !filter.allow.is_empty() && !filter.allow.iter().any(|t| t == cat) {
        return false;
    }
    if !filter.deny.is_empty() && filter.deny.iter().any(|t| t == cat) {
        return false;
    }
    if let Some(predicate) = &filter.predicate {
        if !predicate(name, cat) {
            return false;
        }
    }
    true
}

thread_local! {
    static RNG_STATE: Cell<u64> = const { Cell::new(0) };
}

/// Draw from [0, 1) with a per-thread xorshift64* generator, seeded from the
/// thread id and the timebase on first use. Per-thread state means two
/// emissions at the same source site may diverge across threads.
pub(crate) fn rand_unit() -> f64 {
    RNG_STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            x = (ring::current_tid() as u64) << 32
                ^ timebase::now_us()
                ^ 0x9E37_79B9_7F4A_7C15;
            if x == 0 {
                x = 0x9E37_79B9_7F4A_7C15;
            }
        }
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        let mixed = x.wrapping_mul(0x2545_F491_4F6C_DD1D);
        (mixed >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> FilterConfig {
        FilterConfig::default()
    }

    #[test]
    fn default_filter_admits_everything() {
        let f = filter();
        assert!(admit_filtered(&f, "any", "", rand_unit));
        assert!(admit_filtered(&f, "any", "net", rand_unit));
    }

    #[test]
    fn allowlist_restricts_categories() {
        let f = FilterConfig {
            allow: parse_csv("io, frame"),
            ..filter()
        };
        assert!(admit_filtered(&f, "x", "io", rand_unit));
        assert!(admit_filtered(&f, "x", "frame", rand_unit));
        assert!(!admit_filtered(&f, "x", "debug", rand_unit));
        assert!(!admit_filtered(&f, "x", "", rand_unit));
    }

    #[test]
    fn denylist_wins_over_allowlist() {
        let f = FilterConfig {
            allow: parse_csv("io,debug"),
            deny: parse_csv("debug"),
            ..filter()
        };
        assert!(admit_filtered(&f, "x", "io", rand_unit));
        assert!(!admit_filtered(&f, "x", "debug", rand_unit));
    }

    #[test]
    fn csv_tokens_are_trimmed_and_empties_dropped() {
        assert_eq!(parse_csv(" a , b ,, c "), vec!["a", "b", "c"]);
        assert!(parse_csv("").is_empty());
        assert!(parse_csv(" , ,").is_empty());
    }

    #[test]
    fn predicate_is_consulted_last() {
        let f = FilterConfig {
            predicate: Some(Arc::new(|name: &str, _cat: &str| name.contains("hot"))),
            ..filter()
        };
        assert!(admit_filtered(&f, "hot_path", "", rand_unit));
        assert!(!admit_filtered(&f, "cold_path", "", rand_unit));
    }

    #[test]
    fn sampling_draw_controls_admission() {
        let f = FilterConfig {
            keep_probability: 0.5,
            ..filter()
        };
        assert!(admit_filtered(&f, "x", "", || 0.2));
        assert!(!admit_filtered(&f, "x", "", || 0.9));
        // keep probability 1.0 never consults the generator
        let f = filter();
        assert!(admit_filtered(&f, "x", "", || panic!("must not draw")));
    }

    #[test]
    fn rand_unit_stays_in_range_and_varies() {
        let mut seen_distinct = false;
        let mut prev = rand_unit();
        for _ in 0..1000 {
            let v = rand_unit();
            assert!((0.0..1.0).contains(&v));
            if (v - prev).abs() > f64::EPSILON {
                seen_distinct = true;
            }
            prev = v;
        }
        assert!(seen_distinct);
    }

    #[test]
    fn long_run_kept_fraction_tracks_probability() {
        let f = FilterConfig {
            keep_probability: 0.3,
            ..filter()
        };
        let n = 20_000;
        let kept = (0..n)
            .filter(|_| admit_filtered(&f, "x", "", rand_unit))
            .count();
        // 3 sigma for Binomial(20000, 0.3) is ~194; allow a wide margin.
        let expected = (n as f64 * 0.3) as isize;
        assert!(
            (kept as isize - expected).abs() < 400,
            "kept {kept} of {n}, expected about {expected}"
        );
    }
}
