//! Turning change events into reconciled instances.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::document::{Document, DocumentError, Format};
use crate::model::InstanceConfig;
use crate::observability::metrics;
use crate::reconcile::{shared, Capabilities, ConfigError, Configurable, Reconciler, Shared};
use crate::report::MultiSink;
use crate::watch::events::{Action, ChangeEvent};
use crate::watch::registry::ChangeHandler;
use crate::watch::transport::{FileAccess, TransportError};

/// Per-file failure, delivered to the status sinks.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: DocumentError,
    },

    #[error("failed to apply {path}: {source}")]
    Apply {
        path: String,
        #[source]
        source: ConfigError,
    },
}

/// Live objects keyed by the full path of the file that configures them.
pub struct InstanceRegistry<T = InstanceConfig> {
    instances: DashMap<String, Shared<T>>,
}

impl<T: Configurable> Default for InstanceRegistry<T> {
    fn default() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }
}

impl<T: Configurable> InstanceRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Shared<T>> {
        self.instances.get(path).map(|entry| entry.value().clone())
    }

    /// The instance for `path`, created empty on first use.
    pub fn get_or_create(&self, path: &str) -> Shared<T> {
        self.instances
            .entry(path.to_string())
            .or_insert_with(|| shared(T::default()))
            .value()
            .clone()
    }

    pub fn remove(&self, path: &str) -> Option<Shared<T>> {
        self.instances.remove(path).map(|(_, instance)| instance)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

/// Fetch → parse → reconcile → notify, for every file event of a watched directory.
pub struct ConfigDirectoryHandler<T = InstanceConfig> {
    registry: Arc<InstanceRegistry<T>>,
    reconciler: Reconciler,
    capabilities: Capabilities,
    sink: Arc<MultiSink>,
}

impl<T: Configurable> ConfigDirectoryHandler<T> {
    pub fn new(
        registry: Arc<InstanceRegistry<T>>,
        reconciler: Reconciler,
        capabilities: Capabilities,
        sink: Arc<MultiSink>,
    ) -> Self {
        Self {
            registry,
            reconciler,
            capabilities,
            sink,
        }
    }

    async fn load(&self, access: &dyn FileAccess, path: &str) -> Result<(), WatchError> {
        let text = access.read_file(path).await.map_err(|source| WatchError::Fetch {
            path: path.to_string(),
            source,
        })?;
        let doc = Document::parse(&text, Format::from_path(path)).map_err(|source| WatchError::Parse {
            path: path.to_string(),
            source,
        })?;

        let instance = self.registry.get_or_create(path);
        let report = self
            .reconciler
            .apply_shared(&instance, &doc, &self.capabilities)
            .map_err(|source| WatchError::Apply {
                path: path.to_string(),
                source,
            })?;
        tracing::info!(
            path = %path,
            committed = report.committed.len(),
            vetoed = report.vetoed.len(),
            unknown = report.diagnostics.len(),
            "configuration applied"
        );
        Ok(())
    }
}

#[async_trait]
impl<T: Configurable> ChangeHandler for ConfigDirectoryHandler<T> {
    async fn handle(&self, access: &dyn FileAccess, event: &ChangeEvent) {
        let path = event.file_path();
        for action in &event.actions {
            match action {
                Action::Create | Action::Modified => match self.load(access, &path).await {
                    Ok(()) => {
                        metrics::record_reload();
                        self.sink.report_config_reload(&path);
                    }
                    Err(e) => {
                        let stage = match &e {
                            WatchError::Fetch { .. } => "fetch",
                            WatchError::Parse { .. } => "parse",
                            WatchError::Apply { .. } => "apply",
                        };
                        tracing::error!(path = %path, stage, error = %e, "configuration file rejected");
                        metrics::record_failure(stage);
                        self.sink.report_config_is_bad(&path, &e);
                    }
                },
                Action::Delete => {
                    if self.registry.remove(&path).is_some() {
                        tracing::info!(path = %path, "configuration removed");
                    }
                }
                Action::Other(token) => tracing::trace!(path = %path, action = %token, "ignoring action"),
            }
        }
    }
}
