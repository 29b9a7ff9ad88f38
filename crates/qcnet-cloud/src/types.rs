//! Provider-side resources as returned by the QingCloud API.

use std::net::Ipv4Addr;

use serde::{Deserialize, Deserializer, Serialize};

/// NIC role for the host VM's own primary interface.
pub const ROLE_HOST_PRIMARY: i32 = 1;

/// Lifecycle status of a NIC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NicStatus {
    /// Not attached to any instance.
    Available,
    /// Attached to an instance.
    InUse,
    /// Any status this client does not model.
    #[serde(other)]
    Unknown,
}

impl NicStatus {
    /// Wire name of the status, as used in API filters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Unknown => "unknown",
        }
    }
}

/// A provider-tracked virtual network interface.
///
/// The NIC ID is the interface's hardware address, so it also identifies the
/// link once the NIC is attached to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    /// NIC ID (hardware address).
    #[serde(rename = "nic_id")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub nic_name: String,
    /// Vxnet the NIC belongs to.
    #[serde(default)]
    pub vxnet_id: String,
    /// Private IP inside the vxnet.
    #[serde(default, deserialize_with = "empty_ip_as_none")]
    pub private_ip: Option<Ipv4Addr>,
    /// 0 for allocatable NICs, 1 for the VM's own primary interface.
    #[serde(default)]
    pub role: i32,
    /// Status.
    #[serde(default = "unknown_status")]
    pub status: NicStatus,
    /// Instance the NIC is attached to, empty when detached.
    #[serde(default)]
    pub instance_id: String,
}

impl Nic {
    /// Whether this is the VM's primary interface, which is never handed out.
    #[must_use]
    pub const fn is_host_primary(&self) -> bool {
        self.role == ROLE_HOST_PRIMARY
    }

    /// Hardware address form of the ID, as the kernel reports it.
    #[must_use]
    pub fn hardware_addr(&self) -> String {
        self.id.to_ascii_lowercase()
    }
}

const fn unknown_status() -> NicStatus {
    NicStatus::Unknown
}

fn empty_ip_as_none<'de, D>(deserializer: D) -> Result<Option<Ipv4Addr>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Status of an asynchronous provider job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued.
    Pending,
    /// Running.
    Working,
    /// Finished successfully.
    Successful,
    /// Finished with an error.
    Failed,
    /// Any status this client does not model.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Whether the job will not change status any more.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

/// An asynchronous provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID.
    #[serde(rename = "job_id")]
    pub id: String,
    /// Current status.
    pub status: JobStatus,
    /// Error codes reported on failure.
    #[serde(default)]
    pub error_codes: String,
    /// Resources the job acts on.
    #[serde(default)]
    pub resource_ids: String,
}
