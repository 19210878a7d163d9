//! Linode v3 API provider.
//!
//! # Data Flow
//! ```text
//! {"type": "linode", "name": .., "apiUrl": .., "apiKey": ..}
//!     → LinodeProvider (reconciled in place on every reload)
//!         → connect() → LinodeClient (snapshot of url, key and poll interval)
//!             → GET apiUrl?api_key=..&api_action=..&<params>
//!                 → {"ACTION", "ERRORARRAY", "DATA"} envelope
//! ```
//!
//! # Design Decisions
//! - Every action is a GET with query parameters; the envelope's first
//!   error, if any, becomes the call's error
//! - A failed provisioning deletes the half-built instance before returning

pub mod client;
pub mod error;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::reconcile::{Configurable, Schema};
use crate::vps::{ProviderApi, ProviderError, VpsProvider};

pub use client::LinodeClient;
pub use error::LinodeApiError;
pub use types::{ConfigSpec, DatacenterRecord, DiskKind, DistributionRecord, IpRecord, KernelRecord, PlanRecord};

pub const DEFAULT_API_URL: &str = "https://api.linode.com/";

pub struct LinodeProvider {
    pub name: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub poll_interval_secs: u64,
    http: reqwest::Client,
}

impl Default for LinodeProvider {
    fn default() -> Self {
        Self {
            name: "linode".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            poll_interval_secs: 5,
            http: reqwest::Client::new(),
        }
    }
}

impl Configurable for LinodeProvider {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("name", |p: &mut LinodeProvider| &mut p.name);
        schema.field("apiUrl", |p: &mut LinodeProvider| &mut p.api_url);
        schema.field("apiKey", |p: &mut LinodeProvider| &mut p.api_key);
        schema.field("pollIntervalSecs", |p: &mut LinodeProvider| &mut p.poll_interval_secs);
        schema.pre_change("pollIntervalSecs", |_p: &mut LinodeProvider, next: &u64| *next > 0);
    }
}

impl LinodeProvider {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A client over the current settings.
    pub fn client(&self) -> Result<LinodeClient, ProviderError> {
        let api_url = Url::parse(&self.api_url).map_err(|_| ProviderError::NotConfigured {
            provider: self.name.clone(),
            reason: "apiUrl is not a valid URL",
        })?;
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ProviderError::NotConfigured {
                provider: self.name.clone(),
                reason: "apiKey is not set",
            });
        }
        Ok(LinodeClient::new(self.http.clone(), api_url, self.api_key.clone())
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs)))
    }
}

impl VpsProvider for LinodeProvider {
    fn kind(&self) -> &'static str {
        "linode"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<Arc<dyn ProviderApi>, ProviderError> {
        Ok(Arc::new(self.client()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::reconcile::Reconciler;
    use serde_json::json;

    #[test]
    fn test_defaults_and_reconcile() {
        let mut provider = LinodeProvider::default();
        assert_eq!(provider.name, "linode");
        assert_eq!(provider.api_url, DEFAULT_API_URL);

        let doc = Document::from(json!({"name": "east", "apiKey": "k", "pollIntervalSecs": 0}));
        let report = Reconciler::new().apply(&mut provider, &doc).unwrap();
        assert_eq!(provider.name(), "east");
        assert_eq!(provider.api_key.as_deref(), Some("k"));
        assert_eq!(provider.poll_interval_secs, 5);
        assert_eq!(report.vetoed, vec!["pollIntervalSecs"]);
    }

    #[test]
    fn test_connect_requires_key_and_url() {
        let mut provider = LinodeProvider::named("east");
        assert!(matches!(
            provider.connect(),
            Err(ProviderError::NotConfigured { reason: "apiKey is not set", .. })
        ));

        provider.api_key = Some("k".to_string());
        assert!(provider.connect().is_ok());

        provider.api_url = "not a url".to_string();
        assert!(matches!(provider.connect(), Err(ProviderError::NotConfigured { .. })));
    }
}
