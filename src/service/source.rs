//! A set of watched configuration directories on one host.

use std::sync::Arc;

use crate::reconcile::{Configurable, Schema};
use crate::service::WatchRuntime;
use crate::watch::{FileAccess, LocalFileAccess, SshFileAccess, Watcher};

/// Directories on `host` (or locally, without a host) whose files describe machines.
pub struct RemoteConfigSource {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub identity_file: Option<String>,
    pub dirs: Vec<String>,
    watcher: Option<Watcher>,
    transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transport {
    Local,
    Ssh(SshFileAccess),
}

impl Default for RemoteConfigSource {
    fn default() -> Self {
        Self {
            host: None,
            port: 22,
            username: None,
            identity_file: None,
            dirs: Vec::new(),
            watcher: None,
            transport: None,
        }
    }
}

impl Configurable for RemoteConfigSource {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("host", |s: &mut RemoteConfigSource| &mut s.host);
        schema.field("port", |s: &mut RemoteConfigSource| &mut s.port);
        schema.field("username", |s: &mut RemoteConfigSource| &mut s.username);
        schema.field("identityFile", |s: &mut RemoteConfigSource| &mut s.identity_file);
        schema.field("dirs", |s: &mut RemoteConfigSource| &mut s.dirs);
        schema.internal("watcher");
        schema.internal("transport");
    }
}

impl RemoteConfigSource {
    fn desired_transport(&self) -> Transport {
        match self.host.as_deref().filter(|h| !h.is_empty()) {
            None => Transport::Local,
            Some(host) => Transport::Ssh(SshFileAccess {
                host: host.to_string(),
                port: self.port,
                username: self.username.clone(),
                identity_file: self.identity_file.clone(),
            }),
        }
    }

    /// Where the source reads from, for logs.
    pub fn location(&self) -> String {
        match &self.host {
            Some(host) => format!("{}:{}", host, self.port),
            None => "local".to_string(),
        }
    }

    /// Start watching `dirs`, reusing the running watcher when the transport settings are unchanged.
    pub fn activate(&mut self, runtime: &WatchRuntime) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::error!(source = %self.location(), "cannot start watching outside an async runtime");
            return;
        }

        let desired = self.desired_transport();
        if self.transport.as_ref() != Some(&desired) {
            if let Some(old) = self.watcher.take() {
                tracing::info!(source = %self.location(), "transport settings changed, restarting watcher");
                old.shutdown();
            }
            let access: Arc<dyn FileAccess> = match &desired {
                Transport::Local => Arc::new(LocalFileAccess::new()),
                Transport::Ssh(ssh) => Arc::new(ssh.clone()),
            };
            self.watcher = Some(Watcher::with_parent(access, runtime.shutdown.clone()));
            self.transport = Some(desired);
        }

        if let Some(watcher) = &self.watcher {
            watcher.sync_paths(&self.dirs, &runtime.handler);
        }
    }

    /// Cancel every subscription of this source.
    pub fn deactivate(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            tracing::info!(source = %self.location(), "source removed, stopping watcher");
            watcher.shutdown();
        }
        self.transport = None;
    }

    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn watched_paths(&self) -> Vec<String> {
        self.watcher.as_ref().map(Watcher::active_paths).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_follows_host() {
        let mut source = RemoteConfigSource::default();
        assert_eq!(source.desired_transport(), Transport::Local);
        assert_eq!(source.location(), "local");

        source.host = Some("cfg.example".to_string());
        source.username = Some("deploy".to_string());
        match source.desired_transport() {
            Transport::Ssh(ssh) => {
                assert_eq!(ssh.host, "cfg.example");
                assert_eq!(ssh.port, 22);
                assert_eq!(ssh.username.as_deref(), Some("deploy"));
            }
            other => panic!("expected ssh, got {:?}", other),
        }
    }

    #[test]
    fn test_activate_without_runtime_is_a_no_op() {
        let runtime = WatchRuntime::default();
        let mut source = RemoteConfigSource::default();
        source.dirs = vec!["/tmp".to_string()];
        source.activate(&runtime);
        assert!(!source.is_active());
    }

    #[tokio::test]
    async fn test_activate_and_deactivate_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let runtime = WatchRuntime::default();

        let mut source = RemoteConfigSource::default();
        source.dirs = vec![path.clone()];
        source.activate(&runtime);
        assert!(source.is_active());
        assert_eq!(source.watched_paths(), vec![path.clone()]);

        // same transport: watcher kept, paths re-synced
        source.dirs.clear();
        source.activate(&runtime);
        assert!(source.watched_paths().is_empty());

        source.deactivate();
        assert!(!source.is_active());
    }
}
