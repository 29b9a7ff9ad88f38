//! The NIC provider seam.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;

use qcnet_common::QcnetResult;

use crate::types::{Nic, NicStatus};

/// Filter for listing NICs. The vxnet is always required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicFilter {
    /// Vxnet to search.
    pub vxnet: String,
    /// Only NICs in this status.
    pub status: Option<NicStatus>,
    /// Only NICs attached to this instance.
    pub instance: Option<String>,
    /// Only the NIC holding this private IP.
    pub ip: Option<Ipv4Addr>,
}

impl NicFilter {
    /// Filter on a vxnet.
    #[must_use]
    pub fn vxnet(vxnet: impl Into<String>) -> Self {
        Self {
            vxnet: vxnet.into(),
            status: None,
            instance: None,
            ip: None,
        }
    }

    /// Restrict to a status.
    #[must_use]
    pub fn with_status(mut self, status: NicStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to NICs attached to an instance.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Restrict to an exact private IP.
    #[must_use]
    pub const fn with_ip(mut self, ip: Option<Ipv4Addr>) -> Self {
        self.ip = ip;
        self
    }

    /// Whether a NIC passes every criterion of this filter.
    ///
    /// Providers whose server-side search is fuzzy use this to enforce exact
    /// matches locally.
    #[must_use]
    pub fn matches(&self, nic: &Nic) -> bool {
        nic.vxnet_id == self.vxnet
            && self.status.as_ref().is_none_or(|s| *s == nic.status)
            && self
                .instance
                .as_deref()
                .is_none_or(|i| i == nic.instance_id)
            && self.ip.is_none_or(|ip| nic.private_ip == Some(ip))
    }
}

/// Cloud-side NIC inventory and attachment.
///
/// Attach and detach with `wait = true` block until the provider job reaches
/// `successful` or `failed`, or the provider's job timeout elapses
/// ([`qcnet_common::QcnetError::JobTimeout`]). Both return the job ID.
#[async_trait]
pub trait CloudNicProvider: Send + Sync {
    /// List NICs matching a filter, in provider order.
    async fn list_nics(&self, filter: &NicFilter) -> QcnetResult<Vec<Nic>>;

    /// Create one NIC in a vxnet, optionally pinned to an IP.
    async fn create_nic(&self, vxnet: &str, desired_ip: Option<Ipv4Addr>) -> QcnetResult<Nic>;

    /// Attach a NIC to an instance.
    async fn attach_nic(&self, nic_id: &str, instance_id: &str, wait: bool) -> QcnetResult<String>;

    /// Detach a NIC from whatever instance holds it.
    async fn detach_nic(&self, nic_id: &str, wait: bool) -> QcnetResult<String>;
}

#[async_trait]
impl<T: CloudNicProvider + ?Sized> CloudNicProvider for Arc<T> {
    async fn list_nics(&self, filter: &NicFilter) -> QcnetResult<Vec<Nic>> {
        (**self).list_nics(filter).await
    }

    async fn create_nic(&self, vxnet: &str, desired_ip: Option<Ipv4Addr>) -> QcnetResult<Nic> {
        (**self).create_nic(vxnet, desired_ip).await
    }

    async fn attach_nic(&self, nic_id: &str, instance_id: &str, wait: bool) -> QcnetResult<String> {
        (**self).attach_nic(nic_id, instance_id, wait).await
    }

    async fn detach_nic(&self, nic_id: &str, wait: bool) -> QcnetResult<String> {
        (**self).detach_nic(nic_id, wait).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nic(id: &str, vxnet: &str, ip: [u8; 4], status: NicStatus, instance: &str) -> Nic {
        Nic {
            id: id.to_string(),
            nic_name: String::new(),
            vxnet_id: vxnet.to_string(),
            private_ip: Some(Ipv4Addr::from(ip)),
            role: 0,
            status,
            instance_id: instance.to_string(),
        }
    }

    #[test]
    fn filter_matches() {
        let attached = nic("a", "vx-1", [10, 0, 0, 5], NicStatus::InUse, "i-host");
        let free = nic("b", "vx-1", [10, 0, 0, 9], NicStatus::Available, "");

        let by_vxnet = NicFilter::vxnet("vx-1");
        assert!(by_vxnet.matches(&attached));
        assert!(by_vxnet.matches(&free));
        assert!(!NicFilter::vxnet("vx-2").matches(&free));

        let on_host = NicFilter::vxnet("vx-1").with_instance("i-host");
        assert!(on_host.matches(&attached));
        assert!(!on_host.matches(&free));

        let available = NicFilter::vxnet("vx-1").with_status(NicStatus::Available);
        assert!(available.matches(&free));
        assert!(!available.matches(&attached));

        let pinned = NicFilter::vxnet("vx-1").with_ip(Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert!(pinned.matches(&free));
        assert!(!pinned.matches(&attached));
    }
}
