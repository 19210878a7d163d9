//! VPS providers and long-running jobs.
//!
//! # Data Flow
//! ```text
//! ServiceRoot.vmproviders (allocator by "type", preserved across reloads)
//!     → on-change hook → ProviderDirectory (name → provider)
//!         → ServerInfo.cloud converter looks providers up by name
//!
//! VpsProvider::connect → ProviderApi (HTTP client snapshot of the provider's fields)
//!     → provisioning call → Job<T>
//!         → Job::wait_for_result → JobStatus::pending_count every poll interval
//! ```
//!
//! # Design Decisions
//! - Providers are configurable objects; API calls go through a connected
//!   snapshot so no configuration lock is held across an await
//! - Jobs poll, they are never pushed; cancellation is the only way out

pub mod job;
pub mod linode;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::reconcile::{Reconcile, Shared};

pub use job::{Job, JobError, JobStatus, DEFAULT_POLL_INTERVAL};
pub use linode::{LinodeApiError, LinodeClient, LinodeProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Api(#[from] LinodeApiError),

    #[error("unexpected response to {action}: {reason}")]
    Protocol { action: String, reason: String },

    #[error("provider `{provider}` is not usable: {reason}")]
    NotConfigured { provider: String, reason: &'static str },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("provisioning failed: {0}")]
    Provisioning(String),
}

/// Operating system family, guessed from a distribution label prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Ubuntu,
    CentOs,
    Debian,
    Gentoo,
    OpenSuse,
    Slackware,
    Fedora,
    FreeBsd,
    OpenBsd,
    Unix,
    Windows,
    MacOs,
    Other,
}

impl OsFamily {
    const KNOWN: [(OsFamily, &'static str); 12] = [
        (OsFamily::Ubuntu, "ubuntu"),
        (OsFamily::CentOs, "centos"),
        (OsFamily::Debian, "debian"),
        (OsFamily::Gentoo, "gentoo"),
        (OsFamily::OpenSuse, "opensuse"),
        (OsFamily::Slackware, "slackware"),
        (OsFamily::Fedora, "fedora"),
        (OsFamily::FreeBsd, "freebsd"),
        (OsFamily::OpenBsd, "openbsd"),
        (OsFamily::Unix, "unix"),
        (OsFamily::Windows, "windows"),
        (OsFamily::MacOs, "macos"),
    ];

    /// Split `"Fedora 24"` into `(Fedora, "24")`; unknown labels are kept whole.
    pub fn guess(label: &str) -> (OsFamily, String) {
        for (family, prefix) in Self::KNOWN {
            let matches = label
                .get(..prefix.len())
                .map(|head| head.eq_ignore_ascii_case(prefix))
                .unwrap_or(false);
            if matches {
                return (family, label[prefix.len()..].trim().to_string());
            }
        }
        (OsFamily::Other, label.to_string())
    }
}

/// An installable OS image offered by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub id: u64,
    pub family: OsFamily,
    pub version: String,
    pub min_image_size_mb: u64,
    pub is_64bit: bool,
}

/// Parameters of a new instance.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub label: String,
    pub plan_id: u64,
    pub datacenter_id: u64,
    pub distribution_id: u64,
    pub kernel_id: u64,
    pub root_disk_mb: u64,
    pub swap_disk_mb: u64,
    pub root_password: String,
}

/// A booted instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedInstance {
    pub instance_id: u64,
    pub config_id: u64,
    pub public_ip: String,
}

/// Connected API of one provider.
#[async_trait]
pub trait ProviderApi: JobStatus {
    async fn available_distributions(&self) -> Result<Vec<Distribution>, ProviderError>;

    /// Create and boot an instance; a failed attempt is torn down before returning.
    async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInstance, ProviderError>;

    /// Shut down and delete an instance with all its disks.
    async fn destroy(&self, instance_id: u64, cancel: &CancellationToken) -> Result<(), ProviderError>;
}

/// A configurable cloud provider.
pub trait VpsProvider: Reconcile {
    fn kind(&self) -> &'static str;

    /// Name models refer to the provider by.
    fn name(&self) -> &str;

    fn connect(&self) -> Result<Arc<dyn ProviderApi>, ProviderError>;
}

crate::polymorphic_element!(dyn VpsProvider);

/// Configured providers by name.
#[derive(Default)]
pub struct ProviderDirectory {
    providers: DashMap<String, Shared<dyn VpsProvider>>,
}

impl ProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole directory; later duplicates of a name win.
    pub fn publish(&self, providers: &[Shared<dyn VpsProvider>]) {
        self.providers.clear();
        for provider in providers {
            let name = match provider.read() {
                Ok(guard) => guard.name().to_string(),
                Err(_) => {
                    tracing::error!("skipping provider with poisoned lock");
                    continue;
                }
            };
            if self.providers.insert(name.clone(), provider.clone()).is_some() {
                tracing::warn!(provider = %name, "duplicate provider name, keeping the last one");
            }
        }
        tracing::info!(providers = ?self.names(), "provider directory published");
    }

    pub fn get(&self, name: &str) -> Option<Shared<dyn VpsProvider>> {
        self.providers.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
