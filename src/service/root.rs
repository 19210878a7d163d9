//! Root object of the service configuration file.

use std::sync::Arc;

use crate::document::Document;
use crate::reconcile::{shared, ApplyContext, ApplyReport, ConfigError, Configurable, Schema, Shared};
use crate::report::{HttpPostSink, LogSink, StatusSink};
use crate::service::{RemoteConfigSource, WatchRuntime};
use crate::vps::{LinodeProvider, VpsProvider};
use crate::watch::InstanceRegistry;

pub struct ServiceRoot {
    pub vmconfigs: Vec<Shared<RemoteConfigSource>>,
    pub status_reports: Vec<Shared<dyn StatusSink>>,
    pub vmproviders: Vec<Shared<dyn VpsProvider>>,
    instance_map: Arc<InstanceRegistry>,
    runtime: Arc<WatchRuntime>,
}

impl Default for ServiceRoot {
    fn default() -> Self {
        Self::new(Arc::new(WatchRuntime::default()))
    }
}

fn allocate_sink(variant: &str) -> Result<Shared<dyn StatusSink>, ConfigError> {
    let sink: Shared<dyn StatusSink> = match variant {
        "httppost" => shared(HttpPostSink::default()),
        "log" => shared(LogSink::default()),
        other => {
            return Err(ConfigError::UnmappedVariant {
                element: "status sink",
                variant: other.to_string(),
            })
        }
    };
    Ok(sink)
}

fn allocate_provider(variant: &str) -> Result<Shared<dyn VpsProvider>, ConfigError> {
    let provider: Shared<dyn VpsProvider> = match variant {
        "linode" => shared(LinodeProvider::default()),
        other => {
            return Err(ConfigError::UnmappedVariant {
                element: "vps provider",
                variant: other.to_string(),
            })
        }
    };
    Ok(provider)
}

impl Configurable for ServiceRoot {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("vmconfigs", |r: &mut ServiceRoot| &mut r.vmconfigs).preserve();
        schema.field("statusReports", |r: &mut ServiceRoot| &mut r.status_reports).preserve();
        schema.field("vmproviders", |r: &mut ServiceRoot| &mut r.vmproviders).preserve();
        schema.internal("instanceMap");
        schema.internal("runtime");

        schema.pre_change("vmconfigs", |r: &mut ServiceRoot, next: &Vec<Shared<RemoteConfigSource>>| {
            for source in r.vmconfigs.iter().filter(|old| !next.iter().any(|n| Arc::ptr_eq(old, n))) {
                match source.write() {
                    Ok(mut source) => source.deactivate(),
                    Err(_) => tracing::error!("config source lock poisoned, cannot stop its watcher"),
                }
            }
            true
        });
        schema.on_change("vmconfigs", |r: &mut ServiceRoot, sources: &Vec<Shared<RemoteConfigSource>>| {
            for source in sources {
                match source.write() {
                    Ok(mut source) => source.activate(&r.runtime),
                    Err(_) => tracing::error!("config source lock poisoned, cannot start its watcher"),
                }
            }
        });
        schema.on_change("statusReports", |r: &mut ServiceRoot, sinks: &Vec<Shared<dyn StatusSink>>| {
            r.runtime.sink.replace(sinks.clone());
        });
        schema.on_change("vmproviders", |r: &mut ServiceRoot, providers: &Vec<Shared<dyn VpsProvider>>| {
            r.runtime.directory.publish(providers);
        });

        schema.allocator(|_r: &ServiceRoot, variant: &str, _cx: &ApplyContext<'_>| allocate_sink(variant));
        schema.allocator(|_r: &ServiceRoot, variant: &str, _cx: &ApplyContext<'_>| allocate_provider(variant));
    }
}

impl ServiceRoot {
    pub fn new(runtime: Arc<WatchRuntime>) -> Self {
        Self {
            vmconfigs: Vec::new(),
            status_reports: Vec::new(),
            vmproviders: Vec::new(),
            instance_map: runtime.registry.clone(),
            runtime,
        }
    }

    pub fn runtime(&self) -> &Arc<WatchRuntime> {
        &self.runtime
    }

    /// Live per-file machine configurations, keyed by file path.
    pub fn instances(&self) -> &Arc<InstanceRegistry> {
        &self.instance_map
    }

    /// Reconcile the whole service configuration.
    pub fn reconfigure(&mut self, doc: &Document) -> Result<ApplyReport, ConfigError> {
        let runtime = self.runtime.clone();
        let report = runtime.reconciler.apply_with(self, doc, &runtime.capabilities)?;
        for path in report.unknown_keys() {
            tracing::warn!(path = %path, "unknown key in service configuration");
        }
        tracing::info!(
            sources = self.vmconfigs.len(),
            sinks = self.status_reports.len(),
            providers = self.vmproviders.len(),
            "service configuration applied"
        );
        Ok(report)
    }

    /// Stop every source and listener.
    pub fn shutdown(&mut self) {
        for source in &self.vmconfigs {
            if let Ok(mut source) = source.write() {
                source.deactivate();
            }
        }
        self.runtime.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sinks_and_providers_published() {
        let mut root = ServiceRoot::default();
        let doc = Document::from(json!({
            "statusReports": [{"type": "log", "label": "main"}, {"type": "httppost", "url": "http://hooks.example/s"}],
            "vmproviders": [{"type": "linode", "name": "east", "apiKey": "k"}]
        }));
        let report = root.reconfigure(&doc).unwrap();
        assert!(report.diagnostics.is_empty());
        assert_eq!(root.runtime().sink.len(), 2);
        assert_eq!(root.runtime().directory.names(), vec!["east"]);
        assert!(root.runtime().directory.get("east").unwrap().read().unwrap().connect().is_ok());
    }

    #[test]
    fn test_unknown_variant_is_fatal() {
        let mut root = ServiceRoot::default();
        let doc = Document::from(json!({"statusReports": [{"type": "carrier-pigeon"}]}));
        assert!(matches!(root.reconfigure(&doc), Err(ConfigError::UnmappedVariant { .. })));

        let doc = Document::from(json!({"vmproviders": [{"type": "aws"}]}));
        assert!(matches!(root.reconfigure(&doc), Err(ConfigError::UnmappedVariant { .. })));
    }

    #[test]
    fn test_reload_keeps_providers() {
        let mut root = ServiceRoot::default();
        let doc = Document::from(json!({"vmproviders": [{"type": "linode", "name": "east"}]}));
        root.reconfigure(&doc).unwrap();
        let before = root.vmproviders[0].clone();

        let doc = Document::from(json!({"vmproviders": [{"type": "linode", "name": "east", "apiKey": "new"}]}));
        root.reconfigure(&doc).unwrap();
        assert!(Arc::ptr_eq(&before, &root.vmproviders[0]));
        assert!(Arc::ptr_eq(&before, &root.runtime().directory.get("east").unwrap()));
    }

    #[tokio::test]
    async fn test_removed_source_is_deactivated() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let a_path = a.path().to_string_lossy().to_string();
        let b_path = b.path().to_string_lossy().to_string();

        let mut root = ServiceRoot::default();
        root.reconfigure(&Document::from(json!({"vmconfigs": [{"dirs": [a_path]}, {"dirs": [b_path.clone()]}]})))
            .unwrap();
        let second = root.vmconfigs[1].clone();
        assert!(second.read().unwrap().is_active());

        root.reconfigure(&Document::from(json!({"vmconfigs": [{"dirs": [b_path.clone()]}]})))
            .unwrap();
        // positional preservation: index 0 is kept and re-pointed, index 1 is dropped
        assert_eq!(root.vmconfigs.len(), 1);
        assert!(!second.read().unwrap().is_active());
        assert_eq!(root.vmconfigs[0].read().unwrap().watched_paths(), vec![b_path]);

        root.shutdown();
        assert!(root.runtime().shutdown.is_cancelled());
    }
}
