use otrace::ArgValue;
use tracing::{span, Id, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Recorded span fields, filled by the [`tracing::field::Visit`] impl in
/// `visitor.rs`. Values are already bounded `ArgValue`s, so nothing here
/// borrows from the span.
pub(crate) struct StoredArgs {
    pub(crate) args: Vec<(&'static str, ArgValue)>,
}

impl StoredArgs {
    pub(crate) fn new() -> Self {
        StoredArgs { args: Vec::new() }
    }
}

/// Entry timestamp stored in span extensions on enter.
struct SpanTiming {
    start_us: u64,
}

/// Layer that forwards spans and events into the otrace recorder.
///
/// Spans become Complete events with the enter-to-exit duration; events
/// become Instants. The `target` is used as the category, so the recorder's
/// allow/deny CSVs filter tracing data by module path.
pub struct OtraceLayer;

impl OtraceLayer {
    pub fn new() -> Self {
        OtraceLayer
    }
}

impl Default for OtraceLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for OtraceLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !otrace::is_enabled() {
            return;
        }
        let mut stored = StoredArgs::new();
        attrs.record(&mut stored);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(stored);
        }
    }

    fn on_record(&self, id: &Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(stored) = span.extensions_mut().get_mut::<StoredArgs>() {
                values.record(stored);
            }
        }
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanTiming {
                start_us: otrace::now_us(),
            });
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let metadata = span.metadata();
        let (start_us, args) = {
            let extensions = span.extensions();
            let Some(timing) = extensions.get::<SpanTiming>() else {
                return;
            };
            let args = extensions
                .get::<StoredArgs>()
                .map(|s| s.args.clone())
                .unwrap_or_default();
            (timing.start_us, args)
        };
        let dur_us = otrace::now_us().saturating_sub(start_us);
        otrace::complete_with_args(metadata.name(), metadata.target(), dur_us, &args);
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if !otrace::is_enabled() {
            return;
        }
        let mut stored = StoredArgs::new();
        event.record(&mut stored);
        let metadata = event.metadata();
        otrace::instant_with_args(metadata.name(), metadata.target(), &stored.args);
    }
}
