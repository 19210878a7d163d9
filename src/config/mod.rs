//! Bootstrap configuration of the service itself.
//!
//! # Data Flow
//! ```text
//! --config <path> | first existing of SEARCH_PATHS
//!     → loader.rs (read, parse JSON / TOML into a Document)
//!     → ServiceRoot::reconfigure (reconciled in place)
//!
//! On reload (SIGHUP, or watcher.rs seeing the file change):
//!     → loader.rs loads the same path again
//!     → ServiceRoot::reconfigure; live sources / sinks / providers are kept
//! ```
//!
//! # Design Decisions
//! - The service config goes through the same reconciler as per-machine files
//! - A file that fails to load or apply leaves the running configuration as it is

pub mod loader;
pub mod watcher;

pub use loader::{find_config_file, load_document, LoadError, CONFIG_FILE_NAME, SEARCH_PATHS};
pub use watcher::ConfigFileWatcher;
