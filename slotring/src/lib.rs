//! Fixed-capacity ring of typed slots written by exactly one thread and
//! snapshotted by others.
//!
//! The writer reserves a slot, fills it through the returned guard, and the
//! guard commits the slot when dropped. Snapshot readers only observe slots
//! whose commit flag they load with acquire ordering; everything else is
//! skipped. When the ring wraps, the oldest slots are silently overwritten.
//!
//! # Example
//! ```rust
//! use slotring::SlotRing;
//!
//! let ring: SlotRing<u64> = SlotRing::with_capacity(4);
//! for i in 1..=6u64 {
//!     let mut slot = ring.reserve();
//!     *slot = i;
//! }
//! let mut out = Vec::new();
//! ring.collect_committed(&mut out);
//! assert_eq!(out, vec![3, 4, 5, 6]);
//! ```

mod sync;

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use sync::{AtomicBool, AtomicU32, AtomicU8, Ordering};

const SLOT_EMPTY: u8 = 0;
const SLOT_COMMITTED: u8 = 1;

struct Header {
    /// Next write index, modulo capacity. Stored by the owning thread only;
    /// snapshot readers load it to bound their scan.
    head: AtomicU32,
    /// Latched true the first time `head` wraps.
    wrapped: AtomicBool,
}

struct Slot<T> {
    committed: AtomicU8,
    value: UnsafeCell<T>,
}

pub struct SlotRing<T> {
    header: CachePadded<Header>,
    slots: Box<[Slot<T>]>,
}

// SAFETY: slots are mutated only by the single owning thread, through
// `reserve`. Readers copy a slot out only between two acquire loads that both
// observe the commit flag set, which the owner publishes with a release
// store after the slot contents are fully written.
unsafe impl<T: Send> Sync for SlotRing<T> {}
unsafe impl<T: Send> Send for SlotRing<T> {}

impl<T: Default> SlotRing<T> {
    /// Create a ring with `capacity` slots. Capacity must be at least 1.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "slot ring capacity must be non-zero");
        let slots = (0..capacity)
            .map(|_| Slot {
                committed: AtomicU8::new(SLOT_EMPTY),
                value: UnsafeCell::new(T::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        SlotRing {
            header: CachePadded::new(Header {
                head: AtomicU32::new(0),
                wrapped: AtomicBool::new(false),
            }),
            slots,
        }
    }
}

impl<T> SlotRing<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn head(&self) -> u32 {
        self.header.head.load(Ordering::Relaxed)
    }

    pub fn wrapped(&self) -> bool {
        self.header.wrapped.load(Ordering::Relaxed)
    }

    /// Reserve the next slot, overwriting the oldest entry once the ring has
    /// wrapped. The slot's commit flag is cleared before the guard hands out
    /// access; dropping the guard commits it.
    ///
    /// Must only be called from the thread that owns this ring.
    pub fn reserve(&self) -> Reserved<'_, T> {
        let cap = self.slots.len() as u32;
        let idx = self.header.head.load(Ordering::Relaxed);
        let mut next = idx + 1;
        if next >= cap {
            next = 0;
            self.header.wrapped.store(true, Ordering::Relaxed);
        }
        self.header.head.store(next, Ordering::Relaxed);

        let slot = &self.slots[idx as usize];
        slot.committed.store(SLOT_EMPTY, Ordering::Relaxed);
        Reserved { slot }
    }

    /// Append every committed slot, oldest first, to `out`.
    ///
    /// Slots are copied out between two acquire loads of the commit flag; a
    /// slot being overwritten concurrently fails the second load (overwrite
    /// clears the flag first) and is dropped from the snapshot.
    pub fn collect_committed(&self, out: &mut Vec<T>)
    where
        T: Copy,
    {
        let cap = self.slots.len() as u32;
        let head = self.header.head.load(Ordering::Relaxed);
        let wrapped = self.header.wrapped.load(Ordering::Relaxed);
        let (start, count) = if wrapped { (head, cap) } else { (0, head) };

        for i in 0..count {
            let mut idx = start + i;
            if idx >= cap {
                idx -= cap;
            }
            let slot = &self.slots[idx as usize];
            if slot.committed.load(Ordering::Acquire) != SLOT_COMMITTED {
                continue;
            }
            // SAFETY: `value` holds a plain-old-data `T: Copy`; the copy is
            // validated by re-reading the commit flag, which an overwriting
            // reserve clears before touching the contents.
            let value = unsafe { std::ptr::read(slot.value.get()) };
            if slot.committed.load(Ordering::Acquire) == SLOT_COMMITTED {
                out.push(value);
            }
        }
    }
}

/// Write access to a reserved slot. Commits on drop.
pub struct Reserved<'a, T> {
    slot: &'a Slot<T>,
}

impl<'a, T> Deref for Reserved<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard is held by the ring's single writer; no other
        // mutable access exists while the commit flag is clear.
        unsafe { &*self.slot.value.get() }
    }
}

impl<'a, T> DerefMut for Reserved<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `deref`.
        unsafe { &mut *self.slot.value.get() }
    }
}

impl<'a, T> Drop for Reserved<'a, T> {
    fn drop(&mut self) {
        self.slot.committed.store(SLOT_COMMITTED, Ordering::Release);
    }
}
