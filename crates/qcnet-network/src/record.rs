//! Persisted network and endpoint records.
//!
//! Field names match the JSON the plugin has always written, so state from
//! older installs loads unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use qcnet_common::{EndpointId, NetworkId};

/// IPv4 address data Docker hands over when the network is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamData {
    /// Address space name.
    #[serde(rename = "AddressSpace", default)]
    pub address_space: String,
    /// Subnet in CIDR form.
    #[serde(rename = "Pool", default)]
    pub pool: String,
    /// Gateway in CIDR form.
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
    /// Auxiliary addresses.
    #[serde(rename = "AuxAddresses", default, deserialize_with = "null_as_empty")]
    pub aux_addresses: HashMap<String, String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

impl IpamData {
    /// Gateway address without the prefix length.
    #[must_use]
    pub fn gateway_ip(&self) -> &str {
        strip_prefix_len(&self.gateway)
    }

    /// Prefix length of the pool, if the pool is a CIDR.
    #[must_use]
    pub fn prefix_len(&self) -> Option<u8> {
        self.pool
            .split_once('/')
            .and_then(|(_, len)| len.parse().ok())
            .filter(|len| *len <= 32)
    }
}

/// `10.0.0.1/24` → `10.0.0.1`.
#[must_use]
pub fn strip_prefix_len(cidr: &str) -> &str {
    cidr.split_once('/').map_or(cidr, |(ip, _)| ip)
}

/// Network record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Docker network ID.
    #[serde(rename = "ID")]
    pub id: NetworkId,
    /// Provider vxnet the network maps onto.
    #[serde(rename = "Vxnet")]
    pub vxnet: String,
    /// IPv4 data.
    #[serde(rename = "IPAMData", default)]
    pub ipam: IpamData,
}

/// Endpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Docker endpoint ID.
    #[serde(rename = "ID")]
    pub id: EndpointId,
    /// Provider NIC ID, which is also the interface's hardware address.
    #[serde(rename = "NicID")]
    pub nic_id: String,
    /// Private IP, without prefix length.
    #[serde(rename = "IP")]
    pub ip: String,
    /// Sandbox of the container using the endpoint; empty when unbound.
    #[serde(rename = "SandboxKey", default)]
    pub sandbox_key: String,
}

impl EndpointRecord {
    /// Whether a container currently holds the endpoint.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.sandbox_key.is_empty()
    }

    /// Address in CIDR form using the network's prefix length, or the bare
    /// IP when the prefix is unknown.
    #[must_use]
    pub fn address(&self, ipam: &IpamData) -> String {
        let ip = strip_prefix_len(&self.ip);
        ipam.prefix_len()
            .map_or_else(|| ip.to_string(), |len| format!("{ip}/{len}"))
    }
}
