//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use vm_manager::reconcile::{Configurable, Schema};
use vm_manager::report::{SinkError, StatusSink};
use vm_manager::vps::{JobStatus, ProviderError};
use vm_manager::watch::transport::EventStream;
use vm_manager::watch::{ChangeEvent, FileAccess, TransportError};

/// In-memory filesystem whose watches are fed by the test.
#[derive(Default)]
pub struct MemoryFileAccess {
    files: Mutex<HashMap<String, String>>,
    streams: Mutex<HashMap<String, mpsc::Sender<Result<ChangeEvent, TransportError>>>>,
    watches: AtomicUsize,
}

impl MemoryFileAccess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, path: &str, contents: &str) {
        self.files.lock().unwrap().insert(path.to_string(), contents.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    /// Number of `watch` calls so far.
    pub fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }

    /// Wait until `dir` has an open stream.
    pub async fn wait_for_watch(&self, dir: &str) {
        for _ in 0..200 {
            if self.streams.lock().unwrap().get(dir).map_or(false, |tx| !tx.is_closed()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no watch opened for {}", dir);
    }

    /// Deliver an event on the stream of `event.dir`.
    pub async fn emit(&self, event: ChangeEvent) {
        let tx = self.streams.lock().unwrap().get(&event.dir).cloned();
        tx.expect("directory is not watched").send(Ok(event)).await.unwrap();
    }
}

#[async_trait]
impl FileAccess for MemoryFileAccess {
    async fn read_file(&self, path: &str) -> Result<String, TransportError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
    }

    async fn watch(&self, dir: &str) -> Result<EventStream, TransportError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        self.streams.lock().unwrap().insert(dir.to_string(), tx);
        Ok(rx)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// What a [`RecordingSink`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Reload(String),
    Bad(String),
}

pub type ReportLog = Arc<Mutex<Vec<Report>>>;

/// Sink that appends every report to a shared log.
#[derive(Default)]
pub struct RecordingSink {
    pub log: ReportLog,
    pub failing: bool,
}

impl RecordingSink {
    pub fn new(log: ReportLog) -> Self {
        Self { log, failing: false }
    }

    pub fn failing() -> Self {
        Self {
            log: ReportLog::default(),
            failing: true,
        }
    }

    fn record(&self, report: Report) -> Result<(), SinkError> {
        if self.failing {
            return Err(SinkError::NotConfigured("recording"));
        }
        self.log.lock().unwrap().push(report);
        Ok(())
    }
}

impl Configurable for RecordingSink {
    fn declare(_schema: &mut Schema<Self>) {}
}

impl StatusSink for RecordingSink {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn report_config_reload(&self, path: &str) -> Result<(), SinkError> {
        self.record(Report::Reload(path.to_string()))
    }

    fn report_config_is_bad(&self, path: &str, _cause: &dyn std::error::Error) -> Result<(), SinkError> {
        self.record(Report::Bad(path.to_string()))
    }
}

/// Job status answering the scripted counts in order, then zero.
pub struct StubJobStatus {
    counts: Mutex<Vec<u64>>,
    queries: AtomicUsize,
}

impl StubJobStatus {
    pub fn new(counts: Vec<u64>) -> Arc<Self> {
        Arc::new(Self {
            counts: Mutex::new(counts),
            queries: AtomicUsize::new(0),
        })
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStatus for StubJobStatus {
    async fn pending_count(&self, _resource_id: u64, _operation_id: u64) -> Result<u64, ProviderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut counts = self.counts.lock().unwrap();
        Ok(if counts.is_empty() { 0 } else { counts.remove(0) })
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
