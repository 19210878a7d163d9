//! Wire records of the Linode v3 API.

use serde::Deserialize;
use serde_json::Value;

use super::error::ErrorEntry;

/// Response envelope shared by every action.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "ACTION")]
    pub action: String,
    #[serde(rename = "ERRORARRAY", default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(rename = "DATA", default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DistributionRecord {
    #[serde(rename = "DISTRIBUTIONID")]
    pub id: u64,
    #[serde(rename = "LABEL")]
    pub label: String,
    #[serde(rename = "CREATE_DT", default)]
    pub created: String,
    #[serde(rename = "REQUIRESPVOPSKERNEL", default)]
    pub requires_pvops_kernel: u8,
    #[serde(rename = "MINIMAGESIZE", default)]
    pub min_image_size: u64,
    #[serde(rename = "IS64BIT", default)]
    pub is_64bit: u8,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlanRecord {
    #[serde(rename = "PLANID")]
    pub id: u64,
    #[serde(rename = "LABEL", default)]
    pub label: String,
    #[serde(rename = "PRICE", default)]
    pub price: f64,
    #[serde(rename = "HOURLY", default)]
    pub hourly: f64,
    #[serde(rename = "RAM")]
    pub ram_mb: u64,
    #[serde(rename = "DISK")]
    pub disk_gb: u64,
    #[serde(rename = "CORES", default)]
    pub cores: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatacenterRecord {
    #[serde(rename = "DATACENTERID")]
    pub id: u64,
    #[serde(rename = "LOCATION")]
    pub location: String,
    #[serde(rename = "ABBR")]
    pub abbr: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KernelRecord {
    #[serde(rename = "KERNELID")]
    pub id: u64,
    #[serde(rename = "LABEL")]
    pub label: String,
    #[serde(rename = "ISKVM", default)]
    pub is_kvm: u8,
    #[serde(rename = "ISXEN", default)]
    pub is_xen: u8,
    #[serde(rename = "ISPVOPS", default)]
    pub is_pvops: u8,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IpRecord {
    #[serde(rename = "IPADDRESS")]
    pub address: String,
    #[serde(rename = "ISPUBLIC")]
    pub is_public: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiskRecord {
    #[serde(rename = "DISKID")]
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinodeIdData {
    #[serde(rename = "LinodeID")]
    pub linode_id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobIdData {
    #[serde(rename = "JobID")]
    pub job_id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigIdData {
    #[serde(rename = "ConfigID")]
    pub config_id: u64,
}

/// Filesystem of a blank disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskKind {
    Ext3,
    Ext4,
    Swap,
    Raw,
}

impl DiskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiskKind::Ext3 => "ext3",
            DiskKind::Ext4 => "ext4",
            DiskKind::Swap => "swap",
            DiskKind::Raw => "raw",
        }
    }
}

/// A boot configuration to create.
#[derive(Debug, Clone)]
pub struct ConfigSpec {
    pub linode_id: u64,
    pub label: String,
    pub disk_ids: Vec<u64>,
    pub kernel_id: u64,
    pub ram_limit_mb: u64,
    pub helper_distro: bool,
    pub helper_network: bool,
    pub devtmpfs_automount: bool,
    pub root_device_ro: bool,
    pub comments: String,
}

impl ConfigSpec {
    /// Root + swap configuration with the distro and network helpers on and no RAM limit.
    pub fn standard(linode_id: u64, kernel_id: u64, disk_ids: Vec<u64>) -> Self {
        Self {
            linode_id,
            label: "default".to_string(),
            disk_ids,
            kernel_id,
            ram_limit_mb: 0,
            helper_distro: true,
            helper_network: true,
            devtmpfs_automount: true,
            root_device_ro: true,
            comments: "root and swap disks, helpers enabled, no RAM limit".to_string(),
        }
    }
}
