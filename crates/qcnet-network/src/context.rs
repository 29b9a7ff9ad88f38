//! Shared plugin state.
//!
//! One [`PluginContext`] per process owns the network map and the claim set.
//! Each [`Network`] carries its own endpoint lock, so requests against
//! different networks never wait on each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use qcnet_common::{EndpointId, NetworkId, QcnetError, QcnetResult};

use crate::allocator::ClaimSet;
use crate::record::{EndpointRecord, NetworkRecord};

/// An in-memory network and its endpoints.
#[derive(Debug)]
pub struct Network {
    /// The persisted network record. Immutable once created.
    pub record: NetworkRecord,
    /// Endpoints by ID. Only touched while holding this lock.
    pub endpoints: Mutex<HashMap<EndpointId, EndpointRecord>>,
}

impl Network {
    /// Wrap a record with the given endpoints.
    #[must_use]
    pub fn new(record: NetworkRecord, endpoints: Vec<EndpointRecord>) -> Self {
        Self {
            record,
            endpoints: Mutex::new(endpoints.into_iter().map(|ep| (ep.id.clone(), ep)).collect()),
        }
    }

    /// Network ID.
    #[must_use]
    pub const fn id(&self) -> &NetworkId {
        &self.record.id
    }
}

/// Process-wide state shared by every request.
#[derive(Debug, Default)]
pub struct PluginContext {
    networks: RwLock<HashMap<NetworkId, Arc<Network>>>,
    claims: ClaimSet,
}

impl PluginContext {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The NIC claim set shared with the allocator.
    #[must_use]
    pub const fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Look up a network.
    #[must_use]
    pub fn get(&self, id: &NetworkId) -> Option<Arc<Network>> {
        self.networks.read().get(id).cloned()
    }

    /// Look up a network, failing with [`QcnetError::NetworkNotFound`].
    ///
    /// # Errors
    ///
    /// If the network is unknown.
    pub fn network(&self, id: &NetworkId) -> QcnetResult<Arc<Network>> {
        self.get(id)
            .ok_or_else(|| QcnetError::NetworkNotFound { id: id.to_string() })
    }

    /// Whether `network` is still the one registered under its ID.
    ///
    /// A request that looked a network up before a concurrent delete holds a
    /// stale handle; checked under the endpoint lock this tells it apart.
    #[must_use]
    pub fn is_current(&self, network: &Arc<Network>) -> bool {
        self.networks
            .read()
            .get(network.id())
            .is_some_and(|current| Arc::ptr_eq(current, network))
    }

    /// Insert a network unless one with the same ID exists; returns the one
    /// now registered.
    pub fn insert(&self, network: Network) -> Arc<Network> {
        let mut networks = self.networks.write();
        Arc::clone(
            networks
                .entry(network.id().clone())
                .or_insert_with(|| Arc::new(network)),
        )
    }

    /// Remove a network.
    pub fn remove(&self, id: &NetworkId) -> Option<Arc<Network>> {
        self.networks.write().remove(id)
    }

    /// Snapshot of all registered networks.
    #[must_use]
    pub fn networks(&self) -> Vec<Arc<Network>> {
        self.networks.read().values().cloned().collect()
    }

    /// Number of registered networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.read().len()
    }

    /// Whether no network is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.read().is_empty()
    }

    /// Hardware addresses of every NIC owned by an endpoint, in any network.
    pub async fn owned_nics(&self) -> HashSet<String> {
        let mut owned = HashSet::new();
        for network in self.networks() {
            let endpoints = network.endpoints.lock().await;
            owned.extend(endpoints.values().map(|ep| ep.nic_id.to_ascii_lowercase()));
        }
        owned
    }
}
