//! Reload trigger for edits of the service configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Sends `()` on every create or modify of the watched file.
pub struct ConfigFileWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigFileWatcher {
    /// Start watching `path`. Drop the watcher to stop.
    pub fn start(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<()>), notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = path.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::debug!(paths = ?event.paths, "service configuration changed");
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "service configuration watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %watched.display(), "service configuration watcher started");
        Ok((
            Self {
                path: watched,
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edit_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.conf");
        std::fs::write(&path, "{}").unwrap();

        let (watcher, mut rx) = ConfigFileWatcher::start(&path).unwrap();
        assert_eq!(watcher.path(), path.as_path());

        std::fs::write(&path, r#"{"vmconfigs": []}"#).unwrap();
        let signalled = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(matches!(signalled, Ok(Some(()))));
    }
}
