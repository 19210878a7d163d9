//! VM manager service.
//!
//! Watches configuration directories (over ssh or locally), reconciles every
//! changed file into a live per-machine object graph, and provisions machines
//! through the configured VPS providers.
//!
//! # Architecture Overview
//!
//! ```text
//!   vm-manager-service.conf ──▶ config::loader ──▶ ServiceRoot (reconciled)
//!                                                     │
//!          ┌──────────────────────────┬───────────────┴──────────────┐
//!          ▼                          ▼                              ▼
//!   vmconfigs: RemoteConfigSource   statusReports: MultiSink    vmproviders: ProviderDirectory
//!          │                          ▲                              │
//!          ▼                          │                              ▼
//!   watch::Watcher ──▶ ConfigDirectoryHandler ──▶ InstanceConfig ──▶ Linode API ──▶ Job<T>
//!   (inotifywait / notify)   fetch → parse → reconcile
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::sync::mpsc;

use vm_manager::config::{self, ConfigFileWatcher};
use vm_manager::lifecycle::{spawn_signal_listener, Shutdown, Signal};
use vm_manager::observability::{logging, metrics};
use vm_manager::service::{ServiceRoot, WatchRuntime};

#[derive(Parser)]
#[command(name = "vm-manager")]
#[command(about = "Watches VM configuration directories and provisions machines", long_about = None)]
struct Args {
    /// Service configuration file; searched in the default locations when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    metrics_address: Option<SocketAddr>,

    /// Do not reload when the configuration file changes (SIGHUP still reloads).
    #[arg(long)]
    no_watch_config: bool,
}

fn reload(root: &mut ServiceRoot, path: &Path) {
    let applied = config::load_document(path)
        .map_err(|e| e.to_string())
        .and_then(|doc| root.reconfigure(&doc).map_err(|e| e.to_string()));
    match applied {
        Ok(_) => {
            metrics::record_service_reload("ok");
            tracing::info!(path = %path.display(), "service configuration reloaded");
        }
        Err(e) => {
            metrics::record_service_reload("error");
            tracing::error!(path = %path.display(), error = %e, "reload failed, keeping the running configuration");
        }
    }
}

async fn next_file_change(rx: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vm-manager starting");

    if let Some(addr) = args.metrics_address {
        metrics::init_exporter(addr)?;
    }

    let path = match args.config {
        Some(path) => path,
        None => config::find_config_file(&config::SEARCH_PATHS)?,
    };
    tracing::info!(path = %path.display(), "using service configuration");

    let shutdown = Shutdown::new();
    let runtime = std::sync::Arc::new(WatchRuntime::new(shutdown.token()));
    let mut root = ServiceRoot::new(runtime);
    let doc = config::load_document(&path)?;
    root.reconfigure(&doc)?;

    // keep the watcher alive for the whole loop
    let (_file_watcher, mut file_changes) = if args.no_watch_config {
        (None, None)
    } else {
        match ConfigFileWatcher::start(&path) {
            Ok((watcher, rx)) => (Some(watcher), Some(rx)),
            Err(e) => {
                tracing::warn!(error = %e, "cannot watch the service configuration, reload with SIGHUP");
                (None, None)
            }
        }
    };

    let mut signals = spawn_signal_listener();
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(Signal::Reload) => reload(&mut root, &path),
                Some(Signal::Shutdown) | None => break,
            },
            Some(()) = next_file_change(&mut file_changes) => reload(&mut root, &path),
        }
    }

    tracing::info!("shutting down");
    root.shutdown();
    shutdown.trigger();
    tracing::info!("shutdown complete");
    Ok(())
}
