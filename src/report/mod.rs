//! Status reporting.
//!
//! # Data Flow
//! ```text
//! watch handler
//!     → MultiSink::report_config_reload / report_config_is_bad
//!         → for each sink, in order (snapshot of the current list):
//!             HttpPostSink → spawned POST (JSON body, x-request-id)
//!             LogSink      → tracing event
//!         a failing sink is logged and counted; the rest still receive the event
//!
//! ServiceRoot.statusReports (reconciled, allocator by "type")
//!     → on-change hook → MultiSink::replace
//! ```
//!
//! # Design Decisions
//! - Sink calls are synchronous and never block on I/O; HTTP delivery is spawned
//! - The sink list is swapped atomically (`ArcSwap`), readers never wait
//! - Per-sink failure isolation

pub mod http;
pub mod log;

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::observability::metrics;
use crate::reconcile::{Reconcile, Shared};

pub use http::HttpPostSink;
pub use log::LogSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{0} sink is not configured")]
    NotConfigured(&'static str),

    #[error("invalid sink url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no async runtime available to deliver the report")]
    NoRuntime,
}

/// Destination for reload / failure events.
pub trait StatusSink: Reconcile {
    fn kind(&self) -> &'static str;

    fn report_config_reload(&self, path: &str) -> Result<(), SinkError>;

    fn report_config_is_bad(&self, path: &str, cause: &dyn std::error::Error) -> Result<(), SinkError>;
}

crate::polymorphic_element!(dyn StatusSink);

/// Ordered fan-out to the configured sinks.
#[derive(Default)]
pub struct MultiSink {
    sinks: ArcSwap<Vec<Shared<dyn StatusSink>>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, sinks: Vec<Shared<dyn StatusSink>>) {
        tracing::info!(count = sinks.len(), "status sinks updated");
        self.sinks.store(Arc::new(sinks));
    }

    pub fn len(&self) -> usize {
        self.sinks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of sinks that failed.
    pub fn report_config_reload(&self, path: &str) -> usize {
        self.deliver(|sink| sink.report_config_reload(path))
    }

    /// Returns the number of sinks that failed.
    pub fn report_config_is_bad(&self, path: &str, cause: &dyn std::error::Error) -> usize {
        self.deliver(|sink| sink.report_config_is_bad(path, cause))
    }

    fn deliver(&self, send: impl Fn(&dyn StatusSink) -> Result<(), SinkError>) -> usize {
        let sinks = self.sinks.load();
        let mut failed = 0;
        for (index, sink) in sinks.iter().enumerate() {
            let outcome = match sink.read() {
                Ok(guard) => send(&*guard).map_err(|e| (guard.kind(), e.to_string())),
                Err(_) => Err(("unknown", "sink lock poisoned".to_string())),
            };
            if let Err((kind, error)) = outcome {
                failed += 1;
                metrics::record_sink_failure(kind);
                tracing::warn!(sink = kind, index, error = %error, "status sink failed");
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{shared, Configurable, Schema};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        fail: bool,
        seen: Arc<AtomicUsize>,
    }

    impl Configurable for Counting {
        fn declare(_schema: &mut Schema<Self>) {}
    }

    impl StatusSink for Counting {
        fn kind(&self) -> &'static str {
            "counting"
        }

        fn report_config_reload(&self, _path: &str) -> Result<(), SinkError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::NotConfigured("counting"));
            }
            Ok(())
        }

        fn report_config_is_bad(&self, path: &str, _cause: &dyn std::error::Error) -> Result<(), SinkError> {
            self.report_config_reload(path)
        }
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let seen = Arc::new(AtomicUsize::new(0));
        let first: Shared<dyn StatusSink> = shared(Counting {
            fail: true,
            seen: seen.clone(),
        });
        let second: Shared<dyn StatusSink> = shared(Counting {
            fail: false,
            seen: seen.clone(),
        });
        let multi = MultiSink::new();
        multi.replace(vec![first, second]);

        assert_eq!(multi.report_config_reload("/a.json"), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        let cause = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(multi.report_config_is_bad("/a.json", &cause), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_empty_multi_sink() {
        let multi = MultiSink::new();
        assert!(multi.is_empty());
        assert_eq!(multi.report_config_reload("/x"), 0);
    }
}
