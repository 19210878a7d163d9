//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT / ctrl-c → Shutdown::trigger
//!     SIGHUP          → reload request (bootstrap config re-applied)
//!
//! Shutdown (shutdown.rs):
//!     trigger → every subscriber observes it
//!             → watch listeners cancelled via their CancellationToken
//! ```
//!
//! # Design Decisions
//! - Reload never restarts the process; preserved instances survive it
//! - Listener tasks are cancelled cooperatively; shutdown does not join them

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_listener, Signal};
