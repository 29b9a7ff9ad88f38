//! Docker remote network driver API.

pub mod server;
pub mod types;
