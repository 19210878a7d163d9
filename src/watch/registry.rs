//! Path → subscription bookkeeping and listener tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::resilience::backoff::Reconnect;
use crate::watch::events::ChangeEvent;
use crate::watch::transport::FileAccess;

/// Receives the event batches of a watched path.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, access: &dyn FileAccess, event: &ChangeEvent);
}

struct Subscription {
    handler: Arc<dyn ChangeHandler>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Cooperative: the listener notices at its next await point.
    fn stop(self) {
        self.cancel.cancel();
    }
}

/// Outcome of [`Watcher::sync_paths`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchDiff {
    pub cancelled: Vec<String>,
    pub added: Vec<String>,
}

impl WatchDiff {
    pub fn is_empty(&self) -> bool {
        self.cancelled.is_empty() && self.added.is_empty()
    }
}

fn same_handler(a: &Arc<dyn ChangeHandler>, b: &Arc<dyn ChangeHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Subscriptions of one [`FileAccess`], one listener task each.
///
/// The lock only guards bookkeeping and is never held across an await.
pub struct Watcher {
    access: Arc<dyn FileAccess>,
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
    root: CancellationToken,
    reconnect_base: Duration,
    reconnect_max: Duration,
}

impl Watcher {
    pub fn new(access: Arc<dyn FileAccess>) -> Self {
        Self::with_parent(access, CancellationToken::new())
    }

    /// Listener tokens are children of `parent`, so cancelling it stops every listener.
    pub fn with_parent(access: Arc<dyn FileAccess>, parent: CancellationToken) -> Self {
        Self {
            access,
            subscriptions: Mutex::new(HashMap::new()),
            root: parent.child_token(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }

    pub fn reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_max = max;
        self
    }

    pub fn access(&self) -> &Arc<dyn FileAccess> {
        &self.access
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        // Bookkeeping stays consistent even if a holder panicked.
        self.subscriptions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start(&self, path: &str, handler: Arc<dyn ChangeHandler>) -> Subscription {
        let cancel = self.root.child_token();
        tokio::spawn(listen(
            self.access.clone(),
            path.to_string(),
            handler.clone(),
            cancel.clone(),
            Reconnect::new(self.reconnect_base, self.reconnect_max),
        ));
        Subscription { handler, cancel }
    }

    /// Start delivering events of `path` to `handler`. Must run inside a tokio runtime.
    pub fn subscribe(&self, path: &str, handler: Arc<dyn ChangeHandler>) {
        let subscription = self.start(path, handler);
        self.lock().entry(path.to_string()).or_default().push(subscription);
        tracing::debug!(path = %path, access = %self.access.describe(), "subscribed");
    }

    /// Cancel the subscriptions of `handler` on `path`; returns how many were cancelled.
    pub fn unsubscribe_handler(&self, path: &str, handler: &Arc<dyn ChangeHandler>) -> usize {
        let removed: Vec<Subscription> = {
            let mut subscriptions = self.lock();
            let Some(list) = subscriptions.get_mut(path) else {
                return 0;
            };
            let (gone, kept) = std::mem::take(list)
                .into_iter()
                .partition(|s| same_handler(&s.handler, handler));
            *list = kept;
            if list.is_empty() {
                subscriptions.remove(path);
            }
            gone
        };
        let count = removed.len();
        removed.into_iter().for_each(Subscription::stop);
        count
    }

    /// Cancel every subscription on `path`.
    pub fn unsubscribe(&self, path: &str) -> usize {
        let removed = self.lock().remove(path).unwrap_or_default();
        let count = removed.len();
        removed.into_iter().for_each(Subscription::stop);
        count
    }

    /// Make `handler` the single subscriber of exactly the `desired` paths.
    ///
    /// Removed paths are cancelled, new ones subscribed. A kept path whose
    /// subscribers differ from `handler` is cancelled and re-subscribed in the
    /// same critical section, so no event window opens without a subscriber.
    pub fn sync_paths(&self, desired: &[String], handler: &Arc<dyn ChangeHandler>) -> WatchDiff {
        let mut diff = WatchDiff::default();
        let mut stopped = Vec::new();
        {
            let mut subscriptions = self.lock();

            let stale: Vec<String> = subscriptions
                .keys()
                .filter(|path| !desired.contains(path))
                .cloned()
                .collect();
            for path in stale {
                if let Some(list) = subscriptions.remove(&path) {
                    stopped.extend(list);
                    diff.cancelled.push(path);
                }
            }

            for path in desired {
                let list = subscriptions.entry(path.clone()).or_default();
                let current = list.len() == 1 && same_handler(&list[0].handler, handler);
                if current {
                    continue;
                }
                if !list.is_empty() {
                    stopped.extend(list.drain(..));
                    diff.cancelled.push(path.clone());
                }
                list.push(self.start(path, handler.clone()));
                diff.added.push(path.clone());
            }
        }
        stopped.into_iter().for_each(Subscription::stop);

        if !diff.is_empty() {
            tracing::info!(
                access = %self.access.describe(),
                cancelled = ?diff.cancelled,
                added = ?diff.added,
                "watched paths updated"
            );
        }
        diff
    }

    /// Currently watched paths, sorted.
    pub fn active_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn subscription_count(&self, path: &str) -> usize {
        self.lock().get(path).map(Vec::len).unwrap_or(0)
    }

    /// Cancel every subscription.
    pub fn shutdown(&self) {
        let all: Vec<Subscription> = self.lock().drain().flat_map(|(_, list)| list).collect();
        all.into_iter().for_each(Subscription::stop);
        self.root.cancel();
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Listener loop of one subscription: stream events, reconnect with backoff when the stream ends.
async fn listen(
    access: Arc<dyn FileAccess>,
    path: String,
    handler: Arc<dyn ChangeHandler>,
    cancel: CancellationToken,
    mut reconnect: Reconnect,
) {
    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = access.watch(&path) => opened,
        };

        match opened {
            Ok(mut events) => loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = events.recv() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        reconnect.reset();
                        handler.handle(access.as_ref(), &event).await;
                    }
                    Some(Err(e)) => tracing::error!(path = %path, error = %e, "dropping undecodable change event"),
                    None => {
                        tracing::warn!(path = %path, "change stream ended");
                        break;
                    }
                }
            },
            Err(e) => tracing::error!(path = %path, error = %e, "failed to open change stream"),
        }

        let delay = reconnect.next_delay();
        tracing::debug!(path = %path, attempt = reconnect.attempt(), delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
