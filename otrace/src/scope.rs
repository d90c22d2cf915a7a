//! Scoped timing: record the entry timestamp, emit a Complete event with the
//! measured duration on every exit path.

use crate::event::{ArgValue, Phase};
use crate::registry::registry;
use crate::{emit, gate, timebase};

/// RAII guard that emits a Complete event when dropped.
///
/// Admission is decided once, at entry; a denied scope stays silent on exit
/// and a scope admitted at entry emits even if tracing was paused in the
/// meantime (the in-flight-write rule).
pub struct Scope<'a> {
    name: &'a str,
    cat: &'a str,
    arg: Option<(&'a str, ArgValue)>,
    t0: u64,
    admitted: bool,
}

impl<'a> Scope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_category(name, "")
    }

    pub fn with_category(name: &'a str, cat: &'a str) -> Self {
        let admitted = !emit::in_tracer() && gate::admit(registry(), name, cat);
        Scope {
            name,
            cat,
            arg: None,
            t0: timebase::now_us(),
            admitted,
        }
    }

    pub fn with_arg(name: &'a str, cat: &'a str, key: &'a str, value: impl Into<ArgValue>) -> Self {
        let mut scope = Self::with_category(name, cat);
        scope.arg = Some((key, value.into()));
        scope
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.admitted {
            return;
        }
        let dur_us = timebase::now_us().saturating_sub(self.t0);
        let arg = self.arg;
        emit::emit_pregated(Phase::Complete, self.name, self.cat, |ev| {
            ev.dur_us = dur_us;
            if let Some((key, value)) = arg {
                ev.push_arg(key, value);
            }
        });
    }
}

/// Shorthand for [`Scope::new`].
pub fn scope(name: &str) -> Scope<'_> {
    Scope::new(name)
}
