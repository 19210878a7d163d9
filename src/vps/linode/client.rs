//! HTTP client for the Linode v3 JSON API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::types::{
    ConfigIdData, ConfigSpec, DatacenterRecord, DiskKind, DiskRecord, DistributionRecord, Envelope, IpRecord,
    JobIdData, KernelRecord, LinodeIdData, PlanRecord,
};
use crate::vps::{
    Distribution, Job, JobStatus, OsFamily, ProviderApi, ProviderError, ProvisionRequest, ProvisionedInstance,
    DEFAULT_POLL_INTERVAL,
};

/// Bound on each teardown wait after a failed provisioning.
const CLEANUP_DEADLINE: Duration = Duration::from_secs(600);

const AGENT: &str = concat!("vm-manager/", env!("CARGO_PKG_VERSION"));

/// Connected API client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LinodeClient {
    http: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
    poll_interval: Duration,
}

type Params<'a> = [(&'a str, String)];

impl LinodeClient {
    pub fn new(http: reqwest::Client, api_url: Url, api_key: Option<String>) -> Self {
        Self {
            http,
            api_url,
            api_key,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// GET `?api_key=..&api_action=<action>&<params>` and unwrap the response envelope.
    pub async fn call(&self, action: &str, params: &Params<'_>) -> Result<Value, ProviderError> {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 2);
        if let Some(key) = &self.api_key {
            query.push(("api_key", key));
        }
        query.push(("api_action", action));
        query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        tracing::trace!(action, "linode request");
        let envelope: Envelope = self
            .http
            .get(self.api_url.clone())
            .query(&query)
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if envelope.action != action {
            return Err(ProviderError::Protocol {
                action: action.to_string(),
                reason: format!("response is for action `{}`", envelope.action),
            });
        }
        if let Some(first) = envelope.errors.into_iter().next() {
            return Err(first.into_error(action).into());
        }
        Ok(envelope.data)
    }

    async fn call_as<T: DeserializeOwned>(&self, action: &str, params: &Params<'_>) -> Result<T, ProviderError> {
        let data = self.call(action, params).await?;
        serde_json::from_value(data).map_err(|e| ProviderError::Protocol {
            action: action.to_string(),
            reason: e.to_string(),
        })
    }

    fn job(&self, description: &str, linode_id: u64, job_id: u64) -> Job<()> {
        let status: Arc<dyn JobStatus> = Arc::new(self.clone());
        Job::new(description, linode_id, job_id, status, || ()).with_poll_interval(self.poll_interval)
    }

    pub async fn echo(&self, params: &Params<'_>) -> Result<Value, ProviderError> {
        self.call("test.echo", params).await
    }

    pub async fn distribution_records(&self) -> Result<Vec<DistributionRecord>, ProviderError> {
        self.call_as("avail.distributions", &[]).await
    }

    pub async fn available_kernels(&self) -> Result<Vec<KernelRecord>, ProviderError> {
        self.call_as("avail.kernels", &[]).await
    }

    pub async fn available_plans(&self) -> Result<Vec<PlanRecord>, ProviderError> {
        self.call_as("avail.linodeplans", &[]).await
    }

    pub async fn available_datacenters(&self) -> Result<Vec<DatacenterRecord>, ProviderError> {
        self.call_as("avail.datacenters", &[]).await
    }

    pub async fn create_instance(&self, plan_id: u64, datacenter_id: u64) -> Result<u64, ProviderError> {
        let data: LinodeIdData = self
            .call_as(
                "linode.create",
                &[("PlanID", plan_id.to_string()), ("DatacenterID", datacenter_id.to_string())],
            )
            .await?;
        Ok(data.linode_id)
    }

    pub async fn create_disk_from_distribution(
        &self,
        linode_id: u64,
        label: &str,
        size_mb: u64,
        distribution_id: u64,
        root_password: &str,
    ) -> Result<Job<()>, ProviderError> {
        let data: JobIdData = self
            .call_as(
                "linode.disk.createfromdistribution",
                &[
                    ("LinodeID", linode_id.to_string()),
                    ("Label", label.to_string()),
                    ("size", size_mb.to_string()),
                    ("DistributionID", distribution_id.to_string()),
                    ("rootPass", root_password.to_string()),
                ],
            )
            .await?;
        Ok(self.job("creating disk from distribution", linode_id, data.job_id))
    }

    pub async fn create_disk(
        &self,
        linode_id: u64,
        label: &str,
        kind: DiskKind,
        size_mb: u64,
    ) -> Result<Job<()>, ProviderError> {
        let data: JobIdData = self
            .call_as(
                "linode.disk.create",
                &[
                    ("LinodeID", linode_id.to_string()),
                    ("Label", label.to_string()),
                    ("Type", kind.as_str().to_string()),
                    ("size", size_mb.to_string()),
                ],
            )
            .await?;
        Ok(self.job("creating disk", linode_id, data.job_id))
    }

    pub async fn list_disk_ids(&self, linode_id: u64) -> Result<Vec<u64>, ProviderError> {
        let disks: Vec<DiskRecord> = self
            .call_as("linode.disk.list", &[("LinodeID", linode_id.to_string())])
            .await?;
        Ok(disks.into_iter().map(|d| d.id).collect())
    }

    pub async fn delete_disk(&self, linode_id: u64, disk_id: u64) -> Result<Job<()>, ProviderError> {
        let data: JobIdData = self
            .call_as(
                "linode.disk.delete",
                &[("LinodeID", linode_id.to_string()), ("DiskID", disk_id.to_string())],
            )
            .await?;
        Ok(self.job("deleting disk", linode_id, data.job_id))
    }

    pub async fn list_ips(&self, linode_id: u64) -> Result<Vec<IpRecord>, ProviderError> {
        self.call_as("linode.ip.list", &[("LinodeID", linode_id.to_string())]).await
    }

    pub async fn create_config(&self, spec: &ConfigSpec) -> Result<u64, ProviderError> {
        let disk_list = spec.disk_ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        let data: ConfigIdData = self
            .call_as(
                "linode.config.create",
                &[
                    ("LinodeID", spec.linode_id.to_string()),
                    ("Label", spec.label.clone()),
                    ("DiskList", disk_list),
                    ("helper_distro", spec.helper_distro.to_string()),
                    ("devtmpfs_automount", spec.devtmpfs_automount.to_string()),
                    ("helper_network", spec.helper_network.to_string()),
                    ("RootDeviceRO", spec.root_device_ro.to_string()),
                    ("RAMLimit", spec.ram_limit_mb.to_string()),
                    ("KernelID", spec.kernel_id.to_string()),
                    ("Comments", spec.comments.clone()),
                ],
            )
            .await?;
        Ok(data.config_id)
    }

    pub async fn boot(&self, linode_id: u64, config_id: u64) -> Result<Job<()>, ProviderError> {
        let data: JobIdData = self
            .call_as(
                "linode.boot",
                &[("LinodeID", linode_id.to_string()), ("ConfigID", config_id.to_string())],
            )
            .await?;
        Ok(self.job("booting instance", linode_id, data.job_id))
    }

    pub async fn shutdown(&self, linode_id: u64) -> Result<Job<()>, ProviderError> {
        let data: JobIdData = self
            .call_as("linode.shutdown", &[("LinodeID", linode_id.to_string())])
            .await?;
        Ok(self.job("shutting down instance", linode_id, data.job_id))
    }

    pub async fn delete_instance(&self, linode_id: u64) -> Result<(), ProviderError> {
        self.call("linode.delete", &[("LinodeID", linode_id.to_string())]).await?;
        Ok(())
    }

    async fn build(
        &self,
        linode_id: u64,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInstance, ProviderError> {
        tracing::info!(linode_id, "creating root disk");
        self.create_disk_from_distribution(
            linode_id,
            "ROOT",
            request.root_disk_mb,
            request.distribution_id,
            &request.root_password,
        )
        .await?
        .wait_for_result(cancel)
        .await?;

        tracing::info!(linode_id, "creating swap disk");
        self.create_disk(linode_id, "SWAP", DiskKind::Swap, request.swap_disk_mb)
            .await?
            .wait_for_result(cancel)
            .await?;

        let public_ip = self
            .list_ips(linode_id)
            .await?
            .into_iter()
            .find(|ip| ip.is_public != 0)
            .map(|ip| ip.address)
            .ok_or_else(|| ProviderError::Provisioning(format!("no public IP allocated to linode {}", linode_id)))?;
        tracing::info!(linode_id, ip = %public_ip, "public address allocated");

        let disk_ids = self.list_disk_ids(linode_id).await?;
        let config_id = self
            .create_config(&ConfigSpec::standard(linode_id, request.kernel_id, disk_ids))
            .await?;

        tracing::info!(linode_id, config_id, "booting");
        self.boot(linode_id, config_id).await?.wait_for_result(cancel).await?;

        Ok(ProvisionedInstance {
            instance_id: linode_id,
            config_id,
            public_ip,
        })
    }

    async fn teardown(&self, linode_id: u64, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.shutdown(linode_id)
            .await?
            .wait_for_result_within(CLEANUP_DEADLINE, cancel)
            .await?;
        for disk_id in self.list_disk_ids(linode_id).await? {
            self.delete_disk(linode_id, disk_id)
                .await?
                .wait_for_result_within(CLEANUP_DEADLINE, cancel)
                .await?;
        }
        self.delete_instance(linode_id).await
    }

    /// Create → root disk → swap → address → config → boot. On failure the instance is torn down.
    pub async fn provision_instance(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInstance, ProviderError> {
        tracing::info!(label = %request.label, plan = request.plan_id, datacenter = request.datacenter_id, "provisioning instance");
        let linode_id = self.create_instance(request.plan_id, request.datacenter_id).await?;

        match self.build(linode_id, request, cancel).await {
            Ok(instance) => Ok(instance),
            Err(e) => {
                tracing::error!(linode_id, error = %e, "provisioning failed, deleting instance");
                // cleanup runs even if the caller's wait was cancelled
                if let Err(cleanup) = self.teardown(linode_id, &CancellationToken::new()).await {
                    tracing::error!(linode_id, error = %cleanup, "cleanup of failed instance failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl JobStatus for LinodeClient {
    async fn pending_count(&self, resource_id: u64, operation_id: u64) -> Result<u64, ProviderError> {
        let jobs: Vec<Value> = self
            .call_as(
                "linode.job.list",
                &[
                    ("LinodeID", resource_id.to_string()),
                    ("JobID", operation_id.to_string()),
                    ("pendingOnly", "1".to_string()),
                ],
            )
            .await?;
        Ok(jobs.len() as u64)
    }
}

#[async_trait]
impl ProviderApi for LinodeClient {
    async fn available_distributions(&self) -> Result<Vec<Distribution>, ProviderError> {
        let records = self.distribution_records().await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let (family, version) = OsFamily::guess(&record.label);
                Distribution {
                    id: record.id,
                    family,
                    version,
                    min_image_size_mb: record.min_image_size,
                    is_64bit: record.is_64bit != 0,
                }
            })
            .collect())
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInstance, ProviderError> {
        self.provision_instance(request, cancel).await
    }

    async fn destroy(&self, instance_id: u64, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.teardown(instance_id, cancel).await
    }
}
