//! # Chrome Trace Format
//!
//! Serde types for the subset of the Chrome Trace Event JSON format produced
//! by the otrace recorder, viewable in chrome://tracing and Perfetto.
//!
//! This models the writer side only: a single [`TraceEvent`] row shape whose
//! optional fields cover every phase the recorder emits, wrapped in a
//! [`TraceDocument`] (`{"traceEvents":[...],"displayTimeUnit":"ms"}`).
//! Deserialization is kept so traces can be read back for analysis and tests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Fixed metadata event name for thread names.
pub const META_THREAD_NAME: &str = "thread_name";
/// Fixed metadata event name for process names.
pub const META_PROCESS_NAME: &str = "process_name";
/// Fixed metadata event name for thread sort indices.
pub const META_THREAD_SORT_INDEX: &str = "thread_sort_index";

/// Event phase tag (`ph` field).
///
/// The recorder writes duration begin/end pairs, complete slices, instants,
/// counters, metadata rows, and flow hops. Metadata phases all collapse to
/// `"M"` on the wire; the fixed metadata names distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TracePhase {
    /// Begin of a duration pair.
    #[serde(rename = "B")]
    Begin,
    /// End of a duration pair.
    #[serde(rename = "E")]
    End,
    /// Complete slice carrying its own `dur`.
    #[serde(rename = "X")]
    Complete,
    /// Instant with no duration.
    #[serde(rename = "I")]
    Instant,
    /// Counter sample; series live in `args`.
    #[serde(rename = "C")]
    Counter,
    /// Metadata row (`thread_name`, `process_name`, `thread_sort_index`).
    #[serde(rename = "M")]
    Metadata,
    /// Flow start; binds to the enclosing slice.
    #[serde(rename = "s")]
    FlowStart,
    /// Flow step.
    #[serde(rename = "t")]
    FlowStep,
    /// Flow end.
    #[serde(rename = "f")]
    FlowEnd,
}

impl TracePhase {
    pub fn is_flow(self) -> bool {
        matches!(
            self,
            TracePhase::FlowStart | TracePhase::FlowStep | TracePhase::FlowEnd
        )
    }
}

/// Scope of an instant event (`s` field); the recorder always emits
/// thread-scoped instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstantScope {
    #[serde(rename = "g")]
    Global,
    #[serde(rename = "p")]
    Process,
    #[serde(rename = "t")]
    Thread,
}

/// One trace event row.
///
/// Field order matches emission order in the output; optional fields are
/// omitted when absent rather than serialized as null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Display name. Metadata rows use one of the fixed `META_*` names.
    pub name: String,
    /// Category; always present, possibly empty.
    #[serde(default)]
    pub cat: String,
    pub ph: TracePhase,
    /// Timestamp in microseconds.
    pub ts: u64,
    pub pid: u32,
    pub tid: u32,
    /// Instant scope; `"t"` on instants, absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<InstantScope>,
    /// Duration in microseconds; Complete events only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dur: Option<u64>,
    /// Flow id; flow phases only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Color hint from the trace viewer's reserved color names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    /// Arguments shown in the viewer; counter series, metadata payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

impl TraceEvent {
    pub fn new(name: impl Into<String>, ph: TracePhase, ts: u64, pid: u32, tid: u32) -> Self {
        TraceEvent {
            name: name.into(),
            cat: String::new(),
            ph,
            ts,
            pid,
            tid,
            s: None,
            dur: None,
            id: None,
            cname: None,
            args: None,
        }
    }

    pub fn with_category(mut self, cat: impl Into<String>) -> Self {
        self.cat = cat.into();
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = Some(args);
        self
    }
}

/// The top-level JSON object format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDocument {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    pub display_time_unit: String,
}

impl TraceDocument {
    pub fn new(trace_events: Vec<TraceEvent>) -> Self {
        TraceDocument {
            trace_events,
            display_time_unit: "ms".to_string(),
        }
    }
}

/// Encode an argument number the way the original `%g` formatter did:
/// integral values print without a fractional part.
pub fn number_value(v: f64) -> Value {
    const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0; // 2^53
    if v.is_finite() && v.fract() == 0.0 && v.abs() <= MAX_EXACT_INT {
        Value::Number(Number::from(v as i64))
    } else {
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }
}
