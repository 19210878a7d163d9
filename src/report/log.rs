//! Status delivery to the service log.

use crate::reconcile::{Configurable, Schema};
use crate::report::{SinkError, StatusSink};

/// Writes events as tracing records, tagged with `label`.
#[derive(Debug, Default)]
pub struct LogSink {
    pub label: String,
}

impl Configurable for LogSink {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("label", |s: &mut LogSink| &mut s.label);
    }
}

impl StatusSink for LogSink {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn report_config_reload(&self, path: &str) -> Result<(), SinkError> {
        tracing::info!(sink = %self.label, path = %path, "configuration reloaded");
        Ok(())
    }

    fn report_config_is_bad(&self, path: &str, cause: &dyn std::error::Error) -> Result<(), SinkError> {
        tracing::error!(sink = %self.label, path = %path, cause = %cause, "configuration is bad");
        Ok(())
    }
}
