//! # otrace
//!
//! In-process, user-directed timeline tracing: annotate code with scopes,
//! instants, counters, flows and frame marks, then flush a snapshot to a
//! Chrome Trace Event JSON file viewable in chrome://tracing or Perfetto.
//!
//! The recorder is deliberate rather than sampling-based: nothing is recorded
//! unless an annotation fires. Emission is wait-free for the calling thread —
//! each thread owns a fixed-capacity ring of event slots and overwrites its
//! own oldest entries when it wraps. A flush copies committed slots out of
//! every ring, stable-sorts them by `(timestamp, thread, sequence)`, and
//! writes the file; with rotation configured, files are staged and published
//! atomically, optionally gzipped.
//!
//! ```no_run
//! otrace::set_process_name("demo");
//! otrace::set_output_path("trace.json");
//!
//! {
//!     let _scope = otrace::scope("startup");
//!     otrace::instant_with_category("tick", "boot");
//! }
//! otrace::counter("queue_len", 3.0);
//! otrace::flow_begin(0xC0FFEE);
//! otrace::flow_end(0xC0FFEE);
//!
//! otrace::flush().unwrap();
//! ```
//!
//! Environment (read once, at first touch): `OTRACE_DISABLE` turns recording
//! off, `OTRACE_ENABLE` wins over it, `OTRACE_SAMPLE` sets the keep
//! probability. An at-exit hook performs a final flush unless the `on-exit`
//! feature is disabled. The tracer is not async-signal-safe.

mod config;
mod emit;
mod error;
mod event;
mod gate;
#[cfg(feature = "heap")]
mod heap;
mod registry;
mod ring;
mod scope;
mod snapshot;
mod synth;
mod timebase;
mod writer;

pub use config::{
    clear_filter, disable, enable, enable_synthesis, is_enabled, set_allowed_categories,
    set_denied_categories, set_filter, set_output_path, set_output_pattern, set_ring_capacity,
    set_sampling, set_synthesis_config,
};
pub use emit::{
    begin, begin_with_category, complete, complete_with_args, complete_with_category, counter,
    counter_series, counter_with_category, end, end_with_category, flow_begin, flow_begin_named,
    flow_end, flow_end_named, flow_step, flow_step_named, instant, instant_with_args,
    instant_with_category, mark_frame, mark_frame_labeled, set_next_color, set_process_name,
    set_thread_name, set_thread_sort_index,
};
pub use error::TraceError;
pub use event::{
    Arg, ArgValue, Event, FixedStr, Phase, MAX_ARGS, MAX_ARG_KEY, MAX_ARG_VALUE, MAX_CAT,
    MAX_CNAME, MAX_NAME,
};
#[cfg(feature = "heap")]
pub use heap::{
    generate_report, heap_enable, heap_live_bytes, heap_set_sampling, record_alloc, record_free,
};
pub use scope::{scope, Scope};
pub use snapshot::{flush, flush_to};
pub use timebase::{now_us, set_clock_source, ClockSource};
