//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! reconcile / watch / report / vps produce:
//!     → logging.rs (tracing subscriber: EnvFilter + fmt)
//!     → metrics.rs (counters via the `metrics` facade)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (optional, `--metrics-address`)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event (`path`, `key`, `sink`, `job`)
//! - Metric helpers are free functions so call sites stay one line
//! - Without an installed exporter the metric macros are no-ops

pub mod logging;
pub mod metrics;
