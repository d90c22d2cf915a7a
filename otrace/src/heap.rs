//! Allocation attribution riding on allocator hooks.
//!
//! The host (a `GlobalAlloc` wrapper or any other shim) calls
//! [`record_alloc`] after every successful allocation and [`record_free`]
//! before every free. Live allocations live in 64 sharded maps keyed by
//! pointer; a sampled subset additionally gets a callsite hash from a bounded
//! stack capture. Two thread-local flags — inside-tracer and inside-hook —
//! are the only mechanism breaking recursion between the hooks and the emit
//! path.

use crate::event::{ArgValue, MAX_ARGS};
use crate::{emit, gate, timebase};
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

const SHARD_COUNT: usize = 64;
const MAX_STACK_DEPTH: usize = 16;
/// Frames of hook machinery to drop from captures.
const HOOK_SKIP_FRAMES: usize = 2;
const TOP_GROUPS: usize = 10;
/// Minimum spacing of the live-bytes counter emission.
const COUNTER_PERIOD_US: u64 = 1_000_000;

#[derive(Clone, Copy)]
struct LiveAlloc {
    size: usize,
    /// Callsite hash, 0 when the allocation was not sampled.
    site: u64,
    #[allow(dead_code)]
    ts_us: u64,
}

#[derive(Default)]
struct SiteStats {
    total_bytes: u64,
    alloc_count: u64,
    live_bytes: u64,
    live_count: u64,
    /// Representative stack text, stored by the first writer of the site.
    stack: Option<String>,
}

struct HeapState {
    enabled: AtomicBool,
    sampling_bits: AtomicU64,
    live_bytes: AtomicU64,
    total_allocations: AtomicU64,
    total_frees: AtomicU64,
    last_counter_us: AtomicU64,
    shards: Vec<Mutex<HashMap<usize, LiveAlloc>>>,
    sites: Mutex<HashMap<u64, SiteStats>>,
}

static HEAP: OnceLock<HeapState> = OnceLock::new();

fn heap() -> &'static HeapState {
    HEAP.get_or_init(|| HeapState {
        enabled: AtomicBool::new(false),
        sampling_bits: AtomicU64::new(0f64.to_bits()),
        live_bytes: AtomicU64::new(0),
        total_allocations: AtomicU64::new(0),
        total_frees: AtomicU64::new(0),
        last_counter_us: AtomicU64::new(0),
        shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        sites: Mutex::new(HashMap::new()),
    })
}

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

struct HookGuard;

impl Drop for HookGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|flag| flag.set(false));
    }
}

fn enter_hook() -> Option<HookGuard> {
    IN_HOOK.with(|flag| {
        if flag.get() {
            None
        } else {
            flag.set(true);
            Some(HookGuard)
        }
    })
}

/// Turn the layer on or off. State is created on first use.
pub fn heap_enable(on: bool) {
    heap().enabled.store(on, Ordering::Relaxed);
}

/// Probability that an allocation gets callsite attribution. Clamped to
/// [0, 1]; 0 keeps live-byte accounting without stack capture.
pub fn heap_set_sampling(probability: f64) {
    let clamped = if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if clamped != probability {
        tracing::warn!(probability, "heap sampling probability clamped");
    }
    heap().sampling_bits.store(clamped.to_bits(), Ordering::Relaxed);
}

/// Bytes currently attributed to live allocations.
pub fn heap_live_bytes() -> u64 {
    HEAP.get()
        .map(|h| h.live_bytes.load(Ordering::Relaxed))
        .unwrap_or(0)
}

/// Record a successful allocation. Cheap and lock-light: two atomic bumps,
/// one shard insert, and (for the sampled subset) a stack capture.
pub fn record_alloc(ptr: *mut u8, size: usize) {
    let Some(h) = HEAP.get() else {
        return;
    };
    if !h.enabled.load(Ordering::Relaxed) {
        return;
    }
    if emit::in_tracer() {
        return;
    }
    let Some(_guard) = enter_hook() else {
        return;
    };

    h.live_bytes.fetch_add(size as u64, Ordering::Relaxed);
    h.total_allocations.fetch_add(1, Ordering::Relaxed);

    let sampling = f64::from_bits(h.sampling_bits.load(Ordering::Relaxed));
    let mut frames = [0usize; MAX_STACK_DEPTH];
    let mut depth = 0;
    let mut site = 0u64;
    if sampling > 0.0 && gate::rand_unit() <= sampling {
        depth = capture_stack(&mut frames);
        if depth > 0 {
            site = hash_frames(&frames[..depth]);
        }
    }

    let addr = ptr as usize;
    let ts_us = timebase::now_us();
    {
        let mut shard = h.shards[addr % SHARD_COUNT].lock();
        shard.insert(addr, LiveAlloc { size, site, ts_us });
    }

    if site != 0 {
        let mut sites = h.sites.lock();
        let entry = sites.entry(site).or_default();
        entry.total_bytes += size as u64;
        entry.alloc_count += 1;
        entry.live_bytes += size as u64;
        entry.live_count += 1;
        if entry.stack.is_none() {
            entry.stack = Some(format_stack(&frames[..depth]));
        }
    }

    maybe_emit_live_counter(h);
}

/// Record a free. Unknown pointers (allocated before the layer was enabled)
/// are ignored, which is what keeps the accounting untorn.
pub fn record_free(ptr: *mut u8) {
    let Some(h) = HEAP.get() else {
        return;
    };
    if !h.enabled.load(Ordering::Relaxed) {
        return;
    }
    if emit::in_tracer() {
        return;
    }
    let Some(_guard) = enter_hook() else {
        return;
    };

    let addr = ptr as usize;
    let removed = h.shards[addr % SHARD_COUNT].lock().remove(&addr);
    if let Some(info) = removed {
        h.live_bytes.fetch_sub(info.size as u64, Ordering::Relaxed);
        h.total_frees.fetch_add(1, Ordering::Relaxed);
        if info.site != 0 {
            let mut sites = h.sites.lock();
            if let Some(entry) = sites.get_mut(&info.site) {
                entry.live_bytes = entry.live_bytes.saturating_sub(info.size as u64);
                entry.live_count = entry.live_count.saturating_sub(1);
            }
        }
    }
}

/// Emit the `heap_live_bytes` counter at most once per second, gated by a
/// CAS on the last-emission timestamp.
fn maybe_emit_live_counter(h: &HeapState) {
    let now = timebase::now_us();
    let last = h.last_counter_us.load(Ordering::Relaxed);
    if now.saturating_sub(last) < COUNTER_PERIOD_US {
        return;
    }
    if h.last_counter_us
        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        emit::counter_with_category(
            "heap_live_bytes",
            "heap",
            h.live_bytes.load(Ordering::Relaxed) as f64,
        );
    }
}

fn capture_stack(frames: &mut [usize; MAX_STACK_DEPTH]) -> usize {
    let mut depth = 0;
    let mut skipped = 0;
    backtrace::trace(|frame| {
        if skipped < HOOK_SKIP_FRAMES {
            skipped += 1;
            return true;
        }
        frames[depth] = frame.ip() as usize;
        depth += 1;
        depth < MAX_STACK_DEPTH
    });
    depth
}

/// FNV-1a over the frame addresses. Never returns 0: the zero hash means
/// "not sampled".
fn hash_frames(frames: &[usize]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &ip in frames {
        for byte in ip.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
        }
    }
    if hash == 0 {
        1
    } else {
        hash
    }
}

/// Compact display form of a captured stack: up to three symbolized frames.
/// Unresolvable frames fall back to their raw address.
fn format_stack(frames: &[usize]) -> String {
    let mut parts = Vec::new();
    for &ip in frames.iter().take(3) {
        let mut name: Option<String> = None;
        backtrace::resolve(ip as *mut std::ffi::c_void, |symbol| {
            if name.is_none() {
                name = symbol.name().map(|n| n.to_string());
            }
        });
        parts.push(name.unwrap_or_else(|| format!("{ip:#x}")));
    }
    if parts.is_empty() {
        "<no stack>".to_string()
    } else {
        parts.join(" < ")
    }
}

fn keyed_chunks<'a>(prefix: &str, rows: &'a [String]) -> Vec<Vec<(String, &'a str)>> {
    rows.chunks(MAX_ARGS)
        .enumerate()
        .map(|(chunk_idx, chunk)| {
            chunk
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let number = chunk_idx * MAX_ARGS + i + 1;
                    (format!("{prefix}_{number}"), row.as_str())
                })
                .collect()
        })
        .collect()
}

fn emit_keyed_rows(name: &str, prefix: &str, rows: &[String]) {
    for chunk in keyed_chunks(prefix, rows) {
        let args: Vec<(&str, ArgValue)> = chunk
            .iter()
            .map(|(key, row)| (key.as_str(), ArgValue::from(*row)))
            .collect();
        emit::instant_with_args(name, "heap", &args);
    }
}

/// Emit the end-of-run report through the normal emit path:
/// `heap_report_started`, `heap_report_stats`, the top live groups as
/// `heap_leaks`, the top callsites as `heap_sites`, `heap_report_done`.
pub fn generate_report() {
    let Some(h) = HEAP.get() else {
        return;
    };
    let Some(_guard) = enter_hook() else {
        return;
    };

    emit::instant_with_category("heap_report_started", "heap");

    // Snapshot the shards under their locks, grouped by callsite hash.
    let mut groups: BTreeMap<u64, (u64, u64)> = BTreeMap::new();
    let mut live_alloc_count = 0u64;
    for shard in &h.shards {
        let shard = shard.lock();
        for info in shard.values() {
            live_alloc_count += 1;
            let group = groups.entry(info.site).or_insert((0, 0));
            group.0 += info.size as u64;
            group.1 += 1;
        }
    }

    emit::instant_with_args(
        "heap_report_stats",
        "heap",
        &[
            ("live_alloc_count", live_alloc_count.into()),
            ("site_count", (groups.len() as u64).into()),
        ],
    );

    if live_alloc_count == 0 {
        emit::instant_with_args(
            "heap_leaks",
            "heap",
            &[("info", "no_live_allocations_detected".into())],
        );
    } else {
        let mut ordered: Vec<(u64, u64, u64)> = groups
            .into_iter()
            .map(|(site, (bytes, count))| (site, bytes, count))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ordered.truncate(TOP_GROUPS);

        let rows: Vec<String> = {
            let sites = h.sites.lock();
            ordered
                .iter()
                .map(|&(site, bytes, count)| {
                    let label = sites
                        .get(&site)
                        .and_then(|s| s.stack.clone())
                        .unwrap_or_else(|| format!("hash={site:#x}"));
                    format!("{label} ({bytes} bytes, {count} allocations)")
                })
                .collect()
        };
        emit_keyed_rows("heap_leaks", "leak", &rows);
    }

    let top_sites: Vec<(u64, u64, u64, Option<String>)> = {
        let sites = h.sites.lock();
        let mut v: Vec<_> = sites
            .iter()
            .map(|(site, st)| (*site, st.total_bytes, st.alloc_count, st.stack.clone()))
            .collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        v.truncate(TOP_GROUPS);
        v
    };
    if top_sites.is_empty() {
        emit::instant_with_args("heap_sites", "heap", &[("info", "no_sampled_sites".into())]);
    } else {
        let rows: Vec<String> = top_sites
            .iter()
            .map(|(site, bytes, count, stack)| {
                let label = stack
                    .clone()
                    .unwrap_or_else(|| format!("hash={site:#x}"));
                format!("{label} ({bytes} bytes, {count} allocations)")
            })
            .collect();
        emit_keyed_rows("heap_sites", "site", &rows);
    }

    emit::instant_with_category("heap_report_done", "heap");
}
