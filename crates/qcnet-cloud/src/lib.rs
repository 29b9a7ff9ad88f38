//! # qcnet-cloud
//!
//! The cloud side of NIC management.
//!
//! [`CloudNicProvider`] is the seam the allocator talks to; [`QingCloudClient`]
//! implements it against the QingCloud IaaS API, including request signing
//! and the bounded wait on asynchronous jobs.

#![warn(missing_docs)]

pub mod client;
pub mod job;
pub mod params;
pub mod provider;
pub mod types;

pub use client::{CloudConfig, QingCloudClient};
pub use provider::{CloudNicProvider, NicFilter};
pub use types::{Job, JobStatus, Nic, NicStatus};
