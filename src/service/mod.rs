//! The service's root configuration object and its runtime.
//!
//! # Data Flow
//! ```text
//! vm-manager-service.conf
//!     → Reconciler::apply(ServiceRoot)
//!         ├── vmproviders   → allocator "linode"           → on-change: ProviderDirectory::publish
//!         ├── statusReports → allocator "httppost" / "log" → on-change: MultiSink::replace
//!         └── vmconfigs     → RemoteConfigSource            → pre-change:  deactivate dropped sources
//!                                                           → on-change:   activate(WatchRuntime)
//!                                                                 → Watcher::sync_paths(dirs)
//! ```
//!
//! # Design Decisions
//! - Every list is preserve-instance: a reload keeps open watchers, providers
//!   and sinks alive and only updates their fields
//! - Objects reach shared services through `WatchRuntime` and apply-context
//!   capabilities, never through a global

pub mod root;
pub mod source;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::reconcile::{Capabilities, Reconciler};
use crate::report::MultiSink;
use crate::vps::ProviderDirectory;
use crate::watch::{ChangeHandler, ConfigDirectoryHandler, InstanceRegistry};

pub use root::ServiceRoot;
pub use source::RemoteConfigSource;

/// Services shared by the root object, its sources, and every watch listener.
pub struct WatchRuntime {
    pub reconciler: Reconciler,
    pub capabilities: Capabilities,
    pub registry: Arc<InstanceRegistry>,
    pub sink: Arc<MultiSink>,
    pub directory: Arc<ProviderDirectory>,
    pub handler: Arc<dyn ChangeHandler>,
    /// Parent of every listener token.
    pub shutdown: CancellationToken,
}

impl WatchRuntime {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self::with_reconciler(Reconciler::new(), shutdown)
    }

    pub fn with_reconciler(reconciler: Reconciler, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(InstanceRegistry::new());
        let sink = Arc::new(MultiSink::new());
        let directory = Arc::new(ProviderDirectory::new());
        let capabilities = Capabilities::new().with(directory.clone());
        let handler: Arc<dyn ChangeHandler> = Arc::new(ConfigDirectoryHandler::new(
            registry.clone(),
            reconciler.clone(),
            capabilities.clone(),
            sink.clone(),
        ));
        Self {
            reconciler,
            capabilities,
            registry,
            sink,
            directory,
            handler,
            shutdown,
        }
    }
}

impl Default for WatchRuntime {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
