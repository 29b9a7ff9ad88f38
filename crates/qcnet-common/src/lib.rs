//! # qcnet-common
//!
//! Shared types for the qcnet network plugin.
//!
//! This crate provides common functionality used across all qcnet crates:
//! - The error taxonomy surfaced to plugin callers
//! - Validated network and endpoint identifiers
//! - The on-disk layout of persisted network state

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{QcnetError, QcnetResult};
pub use id::{EndpointId, NetworkId};
pub use paths::QcnetPaths;
