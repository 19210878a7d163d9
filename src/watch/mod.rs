//! Change-watch loop.
//!
//! # Data Flow
//! ```text
//! Watcher::sync_paths(dirs)            (diff: cancel removed, subscribe new)
//!     → one listener task per (path, handler)
//!         → FileAccess::watch(dir)     (ssh inotifywait CSV / notify)
//!         → ChangeEvent (dir, actions, file)
//!         → ChangeHandler::handle
//!             CREATE / MODIFIED → read_file → Document::parse
//!                               → Reconciler::apply_shared(registry[dir+file])
//!                               → MultiSink::report_config_reload
//!             failure           → MultiSink::report_config_is_bad, continue
//!             DELETE            → registry entry removed
//!             other             → ignored
//! ```
//!
//! # Design Decisions
//! - Reconciliation runs on the path's own listener task; a slow file only
//!   delays later events of that path
//! - Cancellation is cooperative through `CancellationToken`
//! - A dropped stream is re-opened with exponential backoff

pub mod events;
pub mod handler;
pub mod registry;
pub mod transport;

pub use events::{Action, ChangeEvent};
pub use handler::{ConfigDirectoryHandler, InstanceRegistry, WatchError};
pub use registry::{ChangeHandler, WatchDiff, Watcher};
pub use transport::{FileAccess, LocalFileAccess, SshFileAccess, TransportError};
