//! Network and endpoint lifecycle.
//!
//! An endpoint moves `absent → created → joined → created → deleted`:
//!
//! - *create* allocates a NIC, renames its link after the endpoint and
//!   persists the record with an empty sandbox key;
//! - *join* binds it to exactly one container sandbox;
//! - *leave* unbinds it, idempotently;
//! - *delete* drops the record and, when the host holds more idle interfaces
//!   than the configured threshold, detaches the freed NIC in the background.
//!
//! Every mutation of a network's endpoint map happens under that network's
//! lock and is persisted before the lock is released.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use qcnet_cloud::CloudNicProvider;
use qcnet_common::{EndpointId, NetworkId, QcnetError, QcnetResult};

use crate::allocator::{Allocation, NicAllocator, NicChooser, NicClaim};
use crate::config::DriverConfig;
use crate::context::{Network, PluginContext};
use crate::link::{Link, LinkRegistry};
use crate::options::NetworkOptions;
use crate::record::{EndpointRecord, IpamData, NetworkRecord};
use crate::store::NetworkStateStore;

/// Prefix Docker gives the interface inside the container.
pub const CONTAINER_INTERFACE_PREFIX: &str = "eth";

const LINK_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Result of creating an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEndpoint {
    /// Hardware address of the endpoint's interface.
    pub mac_address: String,
    /// Private IP of the NIC.
    pub ip: Ipv4Addr,
    /// IP with the network's prefix length, e.g. `10.0.0.5/24`.
    pub address: String,
}

/// Result of joining an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// Host-side interface to move into the sandbox.
    pub src_name: String,
    /// Name prefix for the interface inside the container.
    pub dst_prefix: String,
    /// Gateway of the network, without prefix length.
    pub gateway: String,
}

/// Drives networks and endpoints through their lifecycle.
pub struct EndpointLifecycle {
    config: DriverConfig,
    context: Arc<PluginContext>,
    store: NetworkStateStore,
    allocator: NicAllocator,
    provider: Arc<dyn CloudNicProvider>,
    links: Arc<dyn LinkRegistry>,
    detaches: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for EndpointLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointLifecycle")
            .field("config", &self.config)
            .field("networks", &self.context.len())
            .finish_non_exhaustive()
    }
}

impl EndpointLifecycle {
    /// Create a lifecycle over fresh, empty state. Call [`Self::load`] to
    /// restore persisted networks.
    pub fn new(
        config: DriverConfig,
        provider: Arc<dyn CloudNicProvider>,
        links: Arc<dyn LinkRegistry>,
    ) -> Self {
        let context = Arc::new(PluginContext::new());
        let allocator = NicAllocator::new(
            Arc::clone(&provider),
            Arc::clone(&links),
            context.claims().clone(),
            config.instance_id.clone(),
        );
        Self {
            store: NetworkStateStore::new(config.paths.clone()),
            config,
            context,
            allocator,
            provider,
            links,
            detaches: Mutex::new(JoinSet::new()),
        }
    }

    /// Replace the strategy used to pick among available cloud NICs.
    #[must_use]
    pub fn with_chooser(mut self, chooser: impl NicChooser + 'static) -> Self {
        self.allocator = self.allocator.with_chooser(chooser);
        self
    }

    /// Shared state.
    #[must_use]
    pub const fn context(&self) -> &Arc<PluginContext> {
        &self.context
    }

    /// Driver configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Prepare the data root and restore every persisted network. Returns the
    /// number of networks loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the data root cannot be prepared or a record is
    /// unreadable.
    pub fn load(&self) -> QcnetResult<usize> {
        self.store.init()?;
        let stored = self.store.load()?;
        let count = stored.len();
        for network in stored {
            self.context
                .insert(Network::new(network.network, network.endpoints));
        }
        tracing::info!(networks = count, root = %self.config.paths.root.display(), "Restored state");
        Ok(count)
    }

    /// Create a network on a vxnet.
    ///
    /// Repeating the call with the same vxnet is a no-op.
    ///
    /// # Errors
    ///
    /// [`QcnetError::InvalidOption`] if the network exists on another vxnet,
    /// or a persistence error.
    pub fn create_network(
        &self,
        id: NetworkId,
        options: &NetworkOptions,
        ipam: IpamData,
    ) -> QcnetResult<()> {
        if let Some(existing) = self.context.get(&id) {
            if existing.record.vxnet == options.vxnet {
                tracing::debug!(network_id = %id, "Network already exists");
                return Ok(());
            }
            return Err(QcnetError::InvalidOption {
                message: format!(
                    "network {id} already exists on vxnet {}",
                    existing.record.vxnet
                ),
            });
        }

        let record = NetworkRecord {
            id,
            vxnet: options.vxnet.clone(),
            ipam,
        };
        self.store.save_network(&record)?;
        tracing::info!(
            network_id = %record.id,
            vxnet = %record.vxnet,
            pool = %record.ipam.pool,
            "Created network"
        );
        self.context.insert(Network::new(record, Vec::new()));
        Ok(())
    }

    /// Delete a network. Unknown networks are ignored.
    ///
    /// # Errors
    ///
    /// [`QcnetError::NetworkInUse`] while more than one endpoint remains, or
    /// a persistence error.
    pub async fn delete_network(&self, id: &NetworkId) -> QcnetResult<()> {
        let Some(network) = self.context.get(id) else {
            tracing::debug!(network_id = %id, "Delete of unknown network ignored");
            return Ok(());
        };

        let endpoints = network.endpoints.lock().await;
        if !self.context.is_current(&network) {
            tracing::debug!(network_id = %id, "Network already deleted");
            return Ok(());
        }
        if endpoints.len() > 1 {
            return Err(QcnetError::NetworkInUse {
                id: id.to_string(),
                endpoints: endpoints.len(),
            });
        }
        if let Some(residual) = endpoints.values().next() {
            tracing::warn!(
                network_id = %id,
                endpoint_id = %residual.id,
                nic_id = %residual.nic_id,
                "Deleting network with a residual endpoint"
            );
        }

        self.store.delete_network(id)?;
        self.context.remove(id);
        drop(endpoints);

        tracing::info!(network_id = %id, "Deleted network");
        Ok(())
    }

    /// Allocate a NIC for a new endpoint, pinned to `requested_ip` if given.
    ///
    /// # Errors
    ///
    /// [`QcnetError::NetworkNotFound`], provider errors from allocation,
    /// [`QcnetError::LinkNotFound`] when the attached NIC never shows up on
    /// the host, netlink errors from the rename, or a persistence error.
    pub async fn create_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: EndpointId,
        requested_ip: Option<Ipv4Addr>,
    ) -> QcnetResult<CreatedEndpoint> {
        let network = self.context.network(network_id)?;
        {
            let endpoints = network.endpoints.lock().await;
            self.ensure_current(&network)?;
            if let Some(existing) = endpoints.get(&endpoint_id) {
                tracing::debug!(network_id = %network_id, endpoint_id = %endpoint_id, "Endpoint already exists");
                return created(existing, &network.record.ipam);
            }
        }

        let allocation = self.allocate(&network.record.vxnet, requested_ip).await?;
        let link = self.wait_for_link(allocation.hardware_addr()).await?;
        let name = endpoint_id.interface_name();
        if link.name != name {
            self.links.rename_link(&link, name).await?;
        }

        let record = EndpointRecord {
            id: endpoint_id,
            nic_id: allocation.hardware_addr().to_string(),
            ip: allocation.ip.to_string(),
            sandbox_key: String::new(),
        };
        let result = created(&record, &network.record.ipam)?;

        {
            let mut endpoints = network.endpoints.lock().await;
            // The network may have gone, or the endpoint been created, while
            // the NIC was being allocated. Dropping the allocation frees it.
            self.ensure_current(&network)?;
            if let Some(existing) = endpoints.get(&record.id) {
                tracing::debug!(
                    network_id = %network_id,
                    endpoint_id = %record.id,
                    nic_id = %record.nic_id,
                    "Endpoint created concurrently, releasing NIC"
                );
                return created(existing, &network.record.ipam);
            }
            self.store.save_endpoint(network_id, &record)?;
            tracing::info!(
                network_id = %network_id,
                endpoint_id = %record.id,
                nic_id = %record.nic_id,
                ip = %record.ip,
                source = ?allocation.source,
                "Created endpoint"
            );
            endpoints.insert(record.id.clone(), record);
        }
        // The NIC is now owned by the endpoint map; the claim can go.
        allocation.release();

        Ok(result)
    }

    /// Allocate, retrying while the chosen NIC turns out to be owned by an
    /// endpoint registered concurrently.
    ///
    /// Endpoints are registered before their claim is dropped, so once we
    /// hold a claim every earlier owner of the NIC is visible in the map.
    async fn allocate(&self, vxnet: &str, requested_ip: Option<Ipv4Addr>) -> QcnetResult<Allocation> {
        loop {
            let in_use = self.context.owned_nics().await;
            let allocation = self.allocator.allocate(vxnet, requested_ip, &in_use).await?;
            if !self
                .context
                .owned_nics()
                .await
                .contains(allocation.hardware_addr())
            {
                return Ok(allocation);
            }
            tracing::debug!(
                nic_id = allocation.hardware_addr(),
                "NIC was taken by a concurrent endpoint, retrying"
            );
        }
    }

    /// Fail with [`QcnetError::NetworkNotFound`] if `network` was deleted
    /// after it was looked up. Call with its endpoint lock held.
    fn ensure_current(&self, network: &Arc<Network>) -> QcnetResult<()> {
        if self.context.is_current(network) {
            Ok(())
        } else {
            Err(QcnetError::NetworkNotFound {
                id: network.id().to_string(),
            })
        }
    }

    /// Wait for a freshly attached NIC to appear on the host.
    async fn wait_for_link(&self, mac: &str) -> QcnetResult<Link> {
        let deadline = Instant::now() + self.config.link_wait_timeout;
        loop {
            if let Some(link) = self.links.list_links().await?.remove(mac) {
                return Ok(link);
            }
            if Instant::now() + LINK_POLL_INTERVAL > deadline {
                return Err(QcnetError::LinkNotFound {
                    mac: mac.to_string(),
                });
            }
            tokio::time::sleep(LINK_POLL_INTERVAL).await;
        }
    }

    /// Bind an endpoint to a container sandbox.
    ///
    /// # Errors
    ///
    /// [`QcnetError::NetworkNotFound`], [`QcnetError::EndpointNotFound`],
    /// [`QcnetError::EndpointInUse`] if already bound, or a persistence
    /// error (the endpoint stays unbound).
    pub async fn join(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
        sandbox_key: &str,
    ) -> QcnetResult<JoinInfo> {
        let network = self.context.network(network_id)?;
        let mut endpoints = network.endpoints.lock().await;
        self.ensure_current(&network)?;
        let endpoint = endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| QcnetError::EndpointNotFound {
                network_id: network_id.to_string(),
                endpoint_id: endpoint_id.to_string(),
            })?;

        if endpoint.is_bound() {
            return Err(QcnetError::EndpointInUse {
                id: endpoint_id.to_string(),
            });
        }

        endpoint.sandbox_key = sandbox_key.to_string();
        if let Err(e) = self.store.save_endpoint(network_id, endpoint) {
            endpoint.sandbox_key.clear();
            return Err(e);
        }

        tracing::info!(
            network_id = %network_id,
            endpoint_id = %endpoint_id,
            sandbox_key,
            "Joined endpoint"
        );
        Ok(JoinInfo {
            src_name: endpoint_id.interface_name().to_string(),
            dst_prefix: CONTAINER_INTERFACE_PREFIX.to_string(),
            gateway: network.record.ipam.gateway_ip().to_string(),
        })
    }

    /// Unbind an endpoint. Unknown or unbound endpoints are left alone.
    ///
    /// # Errors
    ///
    /// [`QcnetError::NetworkNotFound`], or a persistence error (the endpoint
    /// stays bound).
    pub async fn leave(&self, network_id: &NetworkId, endpoint_id: &EndpointId) -> QcnetResult<()> {
        let network = self.context.network(network_id)?;
        let mut endpoints = network.endpoints.lock().await;
        self.ensure_current(&network)?;
        let Some(endpoint) = endpoints.get_mut(endpoint_id) else {
            tracing::debug!(network_id = %network_id, endpoint_id = %endpoint_id, "Leave of unknown endpoint ignored");
            return Ok(());
        };
        if !endpoint.is_bound() {
            return Ok(());
        }

        let previous = std::mem::take(&mut endpoint.sandbox_key);
        if let Err(e) = self.store.save_endpoint(network_id, endpoint) {
            endpoint.sandbox_key = previous;
            return Err(e);
        }

        tracing::info!(network_id = %network_id, endpoint_id = %endpoint_id, "Left endpoint");
        Ok(())
    }

    /// Delete an unbound endpoint. Unknown endpoints are ignored.
    ///
    /// Failing to remove the record file or to detach the freed NIC is
    /// logged, not returned.
    ///
    /// # Errors
    ///
    /// [`QcnetError::NetworkNotFound`], or [`QcnetError::EndpointInUse`]
    /// while a container holds the endpoint.
    pub async fn delete_endpoint(
        &self,
        network_id: &NetworkId,
        endpoint_id: &EndpointId,
    ) -> QcnetResult<()> {
        let network = self.context.network(network_id)?;
        let mut endpoints = network.endpoints.lock().await;
        self.ensure_current(&network)?;
        let Some(endpoint) = endpoints.get(endpoint_id) else {
            tracing::debug!(network_id = %network_id, endpoint_id = %endpoint_id, "Delete of unknown endpoint ignored");
            return Ok(());
        };
        if endpoint.is_bound() {
            return Err(QcnetError::EndpointInUse {
                id: endpoint_id.to_string(),
            });
        }

        let mac = endpoint.nic_id.to_ascii_lowercase();
        // Held until the detach decision so the NIC is not reallocated first.
        let claim = self.context.claims().try_claim(&mac);
        endpoints.remove(endpoint_id);
        if let Err(e) = self.store.delete_endpoint(network_id, endpoint_id) {
            tracing::warn!(
                network_id = %network_id,
                endpoint_id = %endpoint_id,
                error = %e,
                "Failed to remove endpoint record"
            );
        }
        drop(endpoints);
        tracing::info!(network_id = %network_id, endpoint_id = %endpoint_id, nic_id = %mac, "Deleted endpoint");

        if let Some(claim) = claim {
            self.maybe_detach(mac, claim).await;
        }
        Ok(())
    }

    /// Detach a freed NIC in the background if the host keeps more idle
    /// interfaces than the threshold without it.
    async fn maybe_detach(&self, mac: String, claim: NicClaim) {
        let links = match self.links.list_links().await {
            Ok(links) => links,
            Err(e) => {
                tracing::warn!(nic_id = %mac, error = %e, "Unable to list links, keeping NIC attached");
                return;
            }
        };

        let idle = idle_after_release(&links, &mac);
        if idle <= self.config.idle_nic_threshold {
            tracing::debug!(nic_id = %mac, idle, threshold = self.config.idle_nic_threshold, "Keeping idle NIC attached");
            return;
        }

        tracing::info!(nic_id = %mac, idle, threshold = self.config.idle_nic_threshold, "Detaching idle NIC");
        let provider = Arc::clone(&self.provider);
        let mut detaches = self.detaches.lock();
        // Reap finished detaches so the set only holds pending ones.
        while detaches.try_join_next().is_some() {}
        detaches.spawn(async move {
            let _claim = claim;
            match provider.detach_nic(&mac, true).await {
                Ok(job_id) => tracing::info!(nic_id = %mac, %job_id, "Detached idle NIC"),
                Err(e) => tracing::error!(nic_id = %mac, error = %e, "Failed to detach idle NIC"),
            }
        });
    }

    /// Wait for background detaches started so far.
    pub async fn wait_for_detaches(&self) {
        let mut pending = std::mem::take(&mut *self.detaches.lock());
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Detach task failed");
            }
        }
    }
}

/// Idle interfaces left once `freed` is gone: plain devices minus the VM's
/// primary interface and minus the freed NIC if the host still shows it.
fn idle_after_release(links: &HashMap<String, Link>, freed: &str) -> usize {
    let devices = links.values().filter(|l| l.is_countable_device()).count();
    let freed_present = links.get(freed).is_some_and(Link::is_countable_device);
    devices
        .saturating_sub(1)
        .saturating_sub(usize::from(freed_present))
}

fn created(record: &EndpointRecord, ipam: &IpamData) -> QcnetResult<CreatedEndpoint> {
    let ip = record.ip.parse().map_err(|_| QcnetError::Internal {
        message: format!("endpoint {} has invalid IP {:?}", record.id, record.ip),
    })?;
    Ok(CreatedEndpoint {
        mac_address: record.nic_id.clone(),
        ip,
        address: record.address(ipam),
    })
}
