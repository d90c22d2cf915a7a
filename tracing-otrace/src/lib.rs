//! Bridge from the `tracing` ecosystem into the otrace recorder.
//!
//! [`OtraceLayer`] turns spans into Complete events (timed from enter to
//! exit) and events into Instants, with span/event fields carried as bounded
//! arguments and the `target` as the category.
//!
//! ```no_run
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! let subscriber = tracing_subscriber::registry().with(tracing_otrace::OtraceLayer::new());
//! tracing::subscriber::set_global_default(subscriber).unwrap();
//!
//! let span = tracing::info_span!("handle_request", route = "/api");
//! let _guard = span.enter();
//! ```

mod layer;
mod visitor;


pub use layer::OtraceLayer;
