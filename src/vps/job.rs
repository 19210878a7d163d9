//! Pollable handles for long-running provider operations.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::vps::ProviderError;

/// Interval between pending-count queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("waiting for `{0}` was cancelled")]
    Cancelled(String),

    #[error("`{description}` did not complete within {deadline:?}")]
    DeadlineExceeded { description: String, deadline: Duration },

    #[error("result of `{0}` is unavailable: a previous wait panicked")]
    Abandoned(String),
}

/// Pending-operation query of a provider.
#[async_trait]
pub trait JobStatus: Send + Sync {
    /// Number of still-pending operations matching `(resource_id, operation_id)`.
    async fn pending_count(&self, resource_id: u64, operation_id: u64) -> Result<u64, ProviderError>;
}

type Finish<T> = Box<dyn FnOnce() -> T + Send>;

/// A remote operation, complete once the provider reports nothing pending for it.
///
/// There is no push notification: [`wait_for_result`](Job::wait_for_result)
/// queries, sleeps, and queries again. Query failures are logged and retried
/// indefinitely; only the caller's token stops the wait.
pub struct Job<T> {
    description: String,
    resource_id: u64,
    operation_id: u64,
    status: Arc<dyn JobStatus>,
    poll_interval: Duration,
    result: OnceCell<T>,
    finish: Mutex<Option<Finish<T>>>,
}

impl<T: Send + Sync> Job<T> {
    /// `finish` computes the result once the operation is no longer pending.
    pub fn new(
        description: impl Into<String>,
        resource_id: u64,
        operation_id: u64,
        status: Arc<dyn JobStatus>,
        finish: impl FnOnce() -> T + Send + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            resource_id,
            operation_id,
            status,
            poll_interval: DEFAULT_POLL_INTERVAL,
            result: OnceCell::new(),
            finish: Mutex::new(Some(Box::new(finish))),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn resource_id(&self) -> u64 {
        self.resource_id
    }

    pub fn operation_id(&self) -> u64 {
        self.operation_id
    }

    pub fn is_complete(&self) -> bool {
        self.result.initialized()
    }

    /// Poll until complete, then return the cached result. Later calls return it without polling.
    pub async fn wait_for_result(&self, cancel: &CancellationToken) -> Result<&T, JobError> {
        if let Some(result) = self.result.get() {
            return Ok(result);
        }
        self.result.get_or_try_init(|| self.poll(cancel)).await
    }

    /// [`wait_for_result`](Self::wait_for_result) bounded by `deadline`.
    pub async fn wait_for_result_within(
        &self,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<&T, JobError> {
        match tokio::time::timeout(deadline, self.wait_for_result(cancel)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::DeadlineExceeded {
                description: self.description.clone(),
                deadline,
            }),
        }
    }

    async fn poll(&self, cancel: &CancellationToken) -> Result<T, JobError> {
        loop {
            let queried = tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled(self.description.clone())),
                queried = self.status.pending_count(self.resource_id, self.operation_id) => queried,
            };
            match queried {
                Ok(0) => {
                    metrics::record_job_poll("done");
                    break;
                }
                Ok(pending) => {
                    metrics::record_job_poll("pending");
                    tracing::debug!(job = %self.description, pending, "job still pending");
                }
                Err(e) => {
                    metrics::record_job_poll("error");
                    tracing::error!(job = %self.description, error = %e, "job status query failed, retrying");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled(self.description.clone())),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        let finish = self
            .finish
            .lock()
            .map_err(|_| JobError::Abandoned(self.description.clone()))?
            .take()
            .ok_or_else(|| JobError::Abandoned(self.description.clone()))?;
        tracing::info!(job = %self.description, resource = self.resource_id, operation = self.operation_id, "job complete");
        Ok(finish())
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("description", &self.description)
            .field("resource_id", &self.resource_id)
            .field("operation_id", &self.operation_id)
            .field("complete", &self.result.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with the scripted counts, then zero; `None` entries fail.
    struct Scripted {
        counts: Mutex<Vec<Option<u64>>>,
        queries: AtomicUsize,
    }

    impl Scripted {
        fn new(counts: Vec<Option<u64>>) -> Arc<Self> {
            Arc::new(Self {
                counts: Mutex::new(counts),
                queries: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl JobStatus for Scripted {
        async fn pending_count(&self, _resource_id: u64, _operation_id: u64) -> Result<u64, ProviderError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut counts = self.counts.lock().unwrap();
                if counts.is_empty() {
                    Some(0)
                } else {
                    counts.remove(0)
                }
            };
            match next {
                Some(n) => Ok(n),
                None => Err(ProviderError::Protocol {
                    action: "job.list".into(),
                    reason: "flaky".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_polls_until_nothing_pending() {
        let status = Scripted::new(vec![Some(2), Some(1), Some(0)]);
        let job = Job::new("boot", 7, 42, status.clone(), || 99u32).with_poll_interval(Duration::from_millis(1));
        assert!(!job.is_complete());

        let cancel = CancellationToken::new();
        assert_eq!(*job.wait_for_result(&cancel).await.unwrap(), 99);
        assert_eq!(status.queries.load(Ordering::SeqCst), 3);
        assert!(job.is_complete());

        assert_eq!(*job.wait_for_result(&cancel).await.unwrap(), 99);
        assert_eq!(status.queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_query_failures_are_retried() {
        let status = Scripted::new(vec![None, None, Some(0)]);
        let job = Job::new("disk", 1, 2, status.clone(), || ()).with_poll_interval(Duration::from_millis(1));
        job.wait_for_result(&CancellationToken::new()).await.unwrap();
        assert_eq!(status.queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_is_fatal() {
        let status = Scripted::new(vec![Some(1); 1000]);
        let job = Job::new("slow", 1, 2, status, || ()).with_poll_interval(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert_eq!(
            job.wait_for_result(&cancel).await.unwrap_err(),
            JobError::Cancelled("slow".into())
        );
        assert!(!job.is_complete());
    }

    /// Status query that never answers.
    struct Stalled;

    #[async_trait]
    impl JobStatus for Stalled {
        async fn pending_count(&self, _resource_id: u64, _operation_id: u64) -> Result<u64, ProviderError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_stalled_query() {
        let job = Job::new("hung", 1, 2, Arc::new(Stalled), || ());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let waited = tokio::time::timeout(Duration::from_secs(2), job.wait_for_result(&cancel))
            .await
            .expect("cancelled job should not block on its status query");
        assert_eq!(waited.unwrap_err(), JobError::Cancelled("hung".into()));
        assert!(!job.is_complete());
    }

    #[tokio::test]
    async fn test_deadline() {
        let status = Scripted::new(vec![Some(1); 1000]);
        let job = Job::new("stuck", 1, 2, status, || ()).with_poll_interval(Duration::from_millis(5));
        let err = job
            .wait_for_result_within(Duration::from_millis(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::DeadlineExceeded { .. }));
    }
}
