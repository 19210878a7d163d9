//! OS signal handling.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP requests a reload, not a shutdown

use tokio::sync::mpsc;

/// Lifecycle requests derived from OS signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Reload,
    Shutdown,
}

/// Forward OS signals into a channel until the receiver goes away.
pub fn spawn_signal_listener() -> mpsc::Receiver<Signal> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP handler unavailable, reload by signal disabled");
                None
            }
        };

        loop {
            #[cfg(unix)]
            let reload = async {
                match hangup.as_mut() {
                    Some(stream) => stream.recv().await,
                    None => std::future::pending().await,
                }
            };
            #[cfg(not(unix))]
            let reload = std::future::pending::<Option<()>>();

            let signal = tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "ctrl-c handler failed");
                    }
                    Signal::Shutdown
                }
                Some(()) = reload => Signal::Reload,
            };

            tracing::info!(?signal, "signal received");
            if tx.send(signal).await.is_err() || signal == Signal::Shutdown {
                break;
            }
        }
    });
    rx
}
