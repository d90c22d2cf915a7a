//! Per-thread event buffers and their registration.
//!
//! Each thread gets a [`ThreadBuffer`] on its first emission. The buffer is
//! leaked (it lives until process exit) and published into the registry's
//! intrusive list with a CAS on the head pointer. Only the owning thread
//! writes the ring; the snapshotter reads committed slots.

use crate::event::{Event, FixedStr, MAX_CNAME};
use crate::registry::{registry, Registry};
use parking_lot::Mutex;
use slotring::{Reserved, SlotRing};
use std::cell::Cell;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU64, Ordering};

pub(crate) struct ThreadBuffer {
    /// Registry chain; written once during registration.
    next: AtomicPtr<ThreadBuffer>,
    pub(crate) tid: u32,
    /// Per-thread emission counter; monotonically increasing, never reset.
    seq: AtomicU64,
    /// Set by `set_thread_name`; read by the snapshotter.
    pub(crate) thread_name: Mutex<Option<String>>,
    pub(crate) sort_index: AtomicI32,
    pub(crate) ring: SlotRing<Event>,
}

impl ThreadBuffer {
    fn new(capacity: usize) -> Self {
        ThreadBuffer {
            next: AtomicPtr::new(std::ptr::null_mut()),
            tid: current_tid(),
            seq: AtomicU64::new(0),
            thread_name: Mutex::new(None),
            sort_index: AtomicI32::new(0),
            ring: SlotRing::with_capacity(capacity),
        }
    }

    /// Reserve the next slot: bump the sequence counter, clear the dynamic
    /// fields, and consume the thread's pending color hint. The returned
    /// guard commits on drop.
    pub(crate) fn append(&self) -> Reserved<'_, Event> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut slot = self.ring.reserve();
        let ev = &mut *slot;
        ev.argc = 0;
        ev.dur_us = 0;
        ev.flow_id = 0;
        ev.name = FixedStr::default();
        ev.cat = FixedStr::default();
        ev.cname = PENDING_COLOR
            .with(|c| c.take())
            .unwrap_or_default();
        ev.seq = seq;
        ev.tid = self.tid;
        slot
    }
}

thread_local! {
    static TBUF: Cell<Option<&'static ThreadBuffer>> = const { Cell::new(None) };
    static PENDING_COLOR: Cell<Option<FixedStr<MAX_CNAME>>> = const { Cell::new(None) };
    static TID: Cell<u32> = const { Cell::new(0) };
}

/// The calling thread's id, cached after the first read.
pub(crate) fn current_tid() -> u32 {
    TID.with(|cell| {
        let cached = cell.get();
        if cached != 0 {
            return cached;
        }
        let tid = read_tid();
        cell.set(tid);
        tid
    })
}

#[cfg(target_os = "linux")]
fn read_tid() -> u32 {
    // SAFETY: SYS_gettid takes no arguments and cannot fail.
    (unsafe { libc::syscall(libc::SYS_gettid) }) as u32
}

#[cfg(not(target_os = "linux"))]
fn read_tid() -> u32 {
    use std::sync::atomic::AtomicU32;
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// One-shot color hint for the next event reserved on this thread.
pub(crate) fn set_pending_color(cname: &str) {
    PENDING_COLOR.with(|c| c.set(Some(FixedStr::truncate_from(cname))));
}

/// The calling thread's buffer, created and registered on first use.
pub(crate) fn with_thread_buffer() -> &'static ThreadBuffer {
    TBUF.with(|cell| {
        if let Some(tb) = cell.get() {
            return tb;
        }
        let reg = registry();
        let tb: &'static ThreadBuffer =
            Box::leak(Box::new(ThreadBuffer::new(reg.ring_capacity())));
        link_buffer(reg, tb);
        cell.set(Some(tb));
        tracing::debug!(tid = tb.tid, capacity = tb.ring.capacity(), "thread buffer registered");
        tb
    })
}

fn link_buffer(reg: &Registry, tb: &'static ThreadBuffer) {
    let mut head = reg.head.load(Ordering::Relaxed);
    loop {
        tb.next.store(head, Ordering::Relaxed);
        match reg.head.compare_exchange_weak(
            head,
            tb as *const ThreadBuffer as *mut ThreadBuffer,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(current) => head = current,
        }
    }
}

/// Walk every registered thread buffer.
pub(crate) fn for_each_buffer(reg: &Registry, mut f: impl FnMut(&ThreadBuffer)) {
    let mut ptr = reg.head.load(Ordering::Acquire);
    while !ptr.is_null() {
        // SAFETY: buffers are leaked at registration and never freed, so any
        // pointer published through the head CAS stays valid for the process
        // lifetime.
        let tb = unsafe { &*ptr };
        f(tb);
        ptr = tb.next.load(Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_is_stable_within_a_thread() {
        assert_eq!(current_tid(), current_tid());
        assert_ne!(current_tid(), 0);
    }

    #[test]
    fn tids_differ_across_threads() {
        let here = current_tid();
        let there = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn append_bumps_sequence_and_clears_fields() {
        let tb = ThreadBuffer::new(8);
        {
            let mut slot = tb.append();
            slot.dur_us = 99;
            slot.flow_id = 7;
            slot.push_number("k", 1.0);
        }
        let seqs: Vec<u64> = {
            let mut out = Vec::new();
            tb.ring.collect_committed(&mut out);
            out.iter().map(|e| e.seq).collect()
        };
        assert_eq!(seqs, vec![1]);

        // Second append must come back clean.
        let slot = tb.append();
        assert_eq!(slot.seq, 2);
        assert_eq!(slot.dur_us, 0);
        assert_eq!(slot.flow_id, 0);
        assert_eq!(slot.argc, 0);
    }

    #[test]
    fn pending_color_is_one_shot() {
        let tb = ThreadBuffer::new(4);
        set_pending_color("good");
        {
            let slot = tb.append();
            assert_eq!(slot.cname.as_str(), "good");
        }
        {
            let slot = tb.append();
            assert!(slot.cname.is_empty());
        }
    }

    #[test]
    fn sequence_survives_ring_wrap() {
        let tb = ThreadBuffer::new(4);
        for _ in 0..6 {
            let _slot = tb.append();
        }
        let mut out = Vec::new();
        tb.ring.collect_committed(&mut out);
        let seqs: Vec<u64> = out.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
    }
}
