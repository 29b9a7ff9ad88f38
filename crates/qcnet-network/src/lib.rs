//! # qcnet-network
//!
//! NIC allocation and endpoint lifecycle for containers joining a QingCloud
//! vxnet.
//!
//! Three views of the world have to agree here: the host's interface list
//! ([`LinkRegistry`]), the provider's NIC inventory
//! ([`qcnet_cloud::CloudNicProvider`]) and the plugin's own records on disk
//! ([`NetworkStateStore`]). [`EndpointLifecycle`] drives them; the
//! [`NicAllocator`] guarantees no interface is handed out twice.

#![warn(missing_docs)]

pub mod allocator;
pub mod config;
pub mod context;
pub mod lifecycle;
pub mod link;
pub mod options;
pub mod record;
pub mod store;

pub use allocator::{
    Allocation, AllocationSource, ClaimSet, FirstChooser, NicAllocator, NicChooser, NicClaim,
    RandomChooser,
};
pub use config::DriverConfig;
pub use context::{Network, PluginContext};
pub use lifecycle::{CreatedEndpoint, EndpointLifecycle, JoinInfo};
pub use link::{Link, LinkRegistry, NetlinkRegistry};
pub use options::NetworkOptions;
pub use record::{EndpointRecord, IpamData, NetworkRecord};
pub use store::{NetworkStateStore, StoredNetwork};
