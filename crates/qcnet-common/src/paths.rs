//! On-disk layout of the plugin's persisted state.
//!
//! ```text
//! <root>/
//!   tmp/                                   staging area for atomic writes
//!   networks/<network>/<network>.json      network record
//!   networks/<network>/endpoints/<ep>.json endpoint records
//! ```

use std::path::PathBuf;

use crate::id::{EndpointId, NetworkId};

/// Default root directory for plugin data.
pub const DEFAULT_ROOT: &str = "/var/lib/docker/qingcloud-network";

/// Standard paths used by the plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcnetPaths {
    /// Root data directory.
    pub root: PathBuf,
}

impl Default for QcnetPaths {
    fn default() -> Self {
        Self::with_root(DEFAULT_ROOT)
    }
}

impl QcnetPaths {
    /// Create paths with the default root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Staging directory for temp files. Lives under the root so the final
    /// rename never crosses a filesystem boundary.
    #[must_use]
    pub fn tmp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Directory holding every network.
    #[must_use]
    pub fn networks(&self) -> PathBuf {
        self.root.join("networks")
    }

    /// Directory for a specific network.
    #[must_use]
    pub fn network_dir(&self, id: &NetworkId) -> PathBuf {
        self.networks().join(id.as_str())
    }

    /// Network record file.
    #[must_use]
    pub fn network_record(&self, id: &NetworkId) -> PathBuf {
        self.network_dir(id).join(format!("{id}.json"))
    }

    /// Directory holding a network's endpoint records.
    #[must_use]
    pub fn endpoints_dir(&self, id: &NetworkId) -> PathBuf {
        self.network_dir(id).join("endpoints")
    }

    /// Endpoint record file.
    #[must_use]
    pub fn endpoint_record(&self, network: &NetworkId, endpoint: &EndpointId) -> PathBuf {
        self.endpoints_dir(network).join(format!("{endpoint}.json"))
    }
}
