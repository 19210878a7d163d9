//! File access collaborators: local filesystem and ssh.
//!
//! # Design Decisions
//! - A watch is an mpsc stream of decoded events; the stream ends when the
//!   underlying process or watcher dies, and the listener decides to reconnect
//! - Dropping the receiver tears the watch down (child killed, watcher dropped)

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::watch::events::{Action, ChangeEvent};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote command `{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("file {0} is not valid UTF-8")]
    Utf8(String),

    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("malformed change event: {0}")]
    Protocol(String),
}

/// Decoded events of one watched directory.
pub type EventStream = mpsc::Receiver<Result<ChangeEvent, TransportError>>;

/// Read and watch access to a (possibly remote) filesystem.
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Full UTF-8 contents of `path`.
    async fn read_file(&self, path: &str) -> Result<String, TransportError>;

    /// Start streaming change events for `dir`.
    async fn watch(&self, dir: &str) -> Result<EventStream, TransportError>;

    /// Where this access points, for logs.
    fn describe(&self) -> String;
}

/// Local filesystem, watched through `notify`.
#[derive(Debug, Clone, Default)]
pub struct LocalFileAccess;

impl LocalFileAccess {
    pub fn new() -> Self {
        Self
    }
}

fn action_of(kind: &EventKind) -> Action {
    match kind {
        EventKind::Create(_) => Action::Create,
        EventKind::Modify(_) => Action::Modified,
        EventKind::Remove(_) => Action::Delete,
        other => Action::Other(format!("{:?}", other)),
    }
}

#[async_trait]
impl FileAccess for LocalFileAccess {
    async fn read_file(&self, path: &str) -> Result<String, TransportError> {
        tokio::fs::read_to_string(path).await.map_err(|source| match source.kind() {
            std::io::ErrorKind::InvalidData => TransportError::Utf8(path.to_string()),
            _ => TransportError::Io {
                path: path.to_string(),
                source,
            },
        })
    }

    async fn watch(&self, dir: &str) -> Result<EventStream, TransportError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let prefix = if dir.ends_with('/') { dir.to_string() } else { format!("{}/", dir) };
        let sender = tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let decoded: Vec<Result<ChangeEvent, TransportError>> = match res {
                    Ok(event) => {
                        let action = action_of(&event.kind);
                        event
                            .paths
                            .iter()
                            .filter_map(|p| p.file_name())
                            .map(|name| {
                                Ok(ChangeEvent::new(
                                    prefix.clone(),
                                    vec![action.clone()],
                                    name.to_string_lossy().into_owned(),
                                ))
                            })
                            .collect()
                    }
                    Err(e) => vec![Err(TransportError::Notify(e))],
                };
                for item in decoded {
                    // notify calls back on its own thread, outside the runtime
                    if sender.blocking_send(item).is_err() {
                        return;
                    }
                }
            },
            Config::default(),
        )?;
        watcher.watch(Path::new(dir), RecursiveMode::NonRecursive)?;
        tracing::info!(dir = %dir, "local directory watch started");

        // Keep the watcher alive until the consumer drops the stream.
        tokio::spawn(async move {
            tx.closed().await;
            drop(watcher);
        });
        Ok(rx)
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

/// Remote filesystem reached through the `ssh` client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshFileAccess {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub identity_file: Option<String>,
}

/// Quote for a POSIX shell: `'...'` with `'` written as `'\''`.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "'\\''"))
}

impl SshFileAccess {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            identity_file: None,
        }
    }

    fn destination(&self) -> String {
        match &self.username {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments for running `remote` on the host.
    pub fn ssh_args(&self, remote: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.push(self.destination());
        args.push(remote.to_string());
        args
    }

    fn command(&self, remote: &str) -> Command {
        let mut command = Command::new("ssh");
        command.args(self.ssh_args(remote)).stdin(Stdio::null()).kill_on_drop(true);
        command
    }
}

#[async_trait]
impl FileAccess for SshFileAccess {
    async fn read_file(&self, path: &str) -> Result<String, TransportError> {
        let remote = format!("cat {}", shell_quote(path));
        let output = self
            .command(&remote)
            .output()
            .await
            .map_err(|source| TransportError::Io {
                path: path.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(TransportError::Command {
                command: remote,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| TransportError::Utf8(path.to_string()))
    }

    async fn watch(&self, dir: &str) -> Result<EventStream, TransportError> {
        let remote = format!("inotifywait -m -c {}", shell_quote(dir));
        let mut child = self
            .command(&remote)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TransportError::Io {
                path: dir.to_string(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Command {
            command: remote.clone(),
            status: "spawned".to_string(),
            stderr: "stdout not captured".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let host = self.host.clone();
        let watched = dir.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = tx.closed() => break,
                    line = lines.next_line() => line,
                };
                let item = match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => ChangeEvent::from_csv_line(&line),
                    Ok(None) => break,
                    Err(source) => Err(TransportError::Io {
                        path: watched.clone(),
                        source,
                    }),
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            tracing::debug!(host = %host, dir = %watched, "remote watch stream closed");
            // kill_on_drop reaps the ssh process
            drop(child);
        });
        tracing::info!(host = %self.host, dir = %dir, "remote directory watch started");
        Ok(rx)
    }

    fn describe(&self) -> String {
        format!("ssh://{}:{}", self.destination(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/srv/vm configs/"), "'/srv/vm configs/'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_ssh_args() {
        let mut access = SshFileAccess::new("cfg.example.org");
        access.port = 2222;
        access.username = Some("deploy".into());
        access.identity_file = Some("/keys/id".into());
        assert_eq!(
            access.ssh_args("cat '/a'"),
            vec!["-o", "BatchMode=yes", "-p", "2222", "-i", "/keys/id", "deploy@cfg.example.org", "cat '/a'"]
        );
        assert_eq!(access.describe(), "ssh://deploy@cfg.example.org:2222");
    }

    #[tokio::test]
    async fn test_local_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, "{\"ram\": 1}").unwrap();

        let access = LocalFileAccess::new();
        let text = access.read_file(path.to_str().unwrap()).await.unwrap();
        assert_eq!(text, "{\"ram\": 1}");

        let missing = access.read_file(dir.path().join("nope").to_str().unwrap()).await;
        assert!(matches!(missing, Err(TransportError::Io { .. })));
    }

    #[tokio::test]
    async fn test_local_watch_sees_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let access = LocalFileAccess::new();
        let mut events = access.watch(dir.path().to_str().unwrap()).await.unwrap();

        std::fs::write(dir.path().join("vm.json"), "{}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Some(Ok(event)) if event.file == "vm.json" => return Some(event),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .unwrap()
        .unwrap();
        assert!(event.dir.ends_with('/'));
        assert!(event.file_path().ends_with("/vm.json"));
    }
}
