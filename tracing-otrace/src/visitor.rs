use crate::layer::StoredArgs;
use otrace::ArgValue;
use std::fmt;
use tracing::field::{Field, Visit};

impl Visit for StoredArgs {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.args.push((field.name(), ArgValue::from(value)));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.args.push((field.name(), ArgValue::from(value)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.args.push((field.name(), ArgValue::from(value)));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.args.push((field.name(), ArgValue::from(value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.args.push((field.name(), ArgValue::from(value)));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let text = format!("{value:?}");
        self.args.push((field.name(), ArgValue::from(text.as_str())));
    }
}
