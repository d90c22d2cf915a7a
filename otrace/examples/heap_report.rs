//! Heap attribution through a `GlobalAlloc` shim plus the end-of-run report.
//!
//! Run with the (default) `heap` feature.

use std::alloc::{GlobalAlloc, Layout, System};

/// Allocator wrapper feeding the heap layer. Any shim works; the layer only
/// needs `record_alloc` after a successful allocation and `record_free`
/// before a free.
struct TracedAlloc;

// SAFETY: delegates every operation to the system allocator unchanged; the
// hooks only observe.
unsafe impl GlobalAlloc for TracedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            otrace::record_alloc(ptr, layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        otrace::record_free(ptr);
        System.dealloc(ptr, layout);
    }
}

#[global_allocator]
static ALLOC: TracedAlloc = TracedAlloc;

fn main() {
    otrace::set_process_name("ex-heap");
    otrace::set_output_path("heap_demo.json");
    otrace::instant("program_start");

    otrace::heap_set_sampling(1.0); // guarantee attribution in this window
    otrace::heap_enable(true);

    let mut hold: Vec<Vec<u8>> = Vec::new();
    for _ in 0..120 {
        hold.push(vec![0u8; 1 << 14]); // retained
    }
    std::mem::forget(vec![0u8; 1024]); // intentional leaks
    std::mem::forget(vec![0u8; 2048]);

    otrace::heap_set_sampling(0.0); // keep heap enabled; quiet hooks during the report
    otrace::generate_report(); // emits heap_report_stats / heap_leaks / heap_sites
    otrace::instant("report_done");

    otrace::flush().unwrap();
    otrace::heap_enable(false);
    drop(hold);
    println!("wrote heap_demo.json, live bytes now {}", otrace::heap_live_bytes());
}
