//! VM manager service library.

pub mod config;
pub mod document;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod reconcile;
pub mod report;
pub mod resilience;
pub mod service;
pub mod vps;
pub mod watch;

pub use document::Document;
pub use lifecycle::Shutdown;
pub use reconcile::{Configurable, Reconciler};
pub use service::ServiceRoot;
