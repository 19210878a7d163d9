//! Shutdown coordination.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Async tasks subscribe to the broadcast channel; watch listeners hold a
/// child of [`Shutdown::token`] so triggering also cancels them.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            token: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Root token; derive per-task tokens with `child_token`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers_and_children() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let child = shutdown.token().child_token();
        assert_eq!(shutdown.receiver_count(), 1);

        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
        assert!(child.is_cancelled());
        assert!(shutdown.is_triggered());
    }
}
