//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! watch listener stream ends or fails (not cancelled)
//!     → backoff.rs (exponential delay with jitter)
//!     → re-open the stream
//! ```
//!
//! # Design Decisions
//! - Delays carry random jitter
//! - The attempt counter resets once a stream delivers an event

pub mod backoff;

pub use backoff::calculate_backoff;
