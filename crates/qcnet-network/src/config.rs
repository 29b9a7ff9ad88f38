//! Driver configuration.

use std::path::PathBuf;
use std::time::Duration;

use qcnet_common::QcnetPaths;

/// Default number of non-primary interfaces a host keeps attached after an
/// endpoint is deleted.
pub const DEFAULT_IDLE_NIC_THRESHOLD: usize = 2;

/// Default time to wait for an attached NIC to show up on the host.
pub const DEFAULT_LINK_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Paths for plugin state.
    pub paths: QcnetPaths,
    /// Provider instance ID of this host.
    pub instance_id: String,
    /// Idle interfaces kept on the host; beyond this, freed NICs are detached.
    pub idle_nic_threshold: usize,
    /// How long to wait for an attached NIC's link to appear.
    pub link_wait_timeout: Duration,
}

impl DriverConfig {
    /// Configuration for the host `instance_id` with default settings.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            paths: QcnetPaths::new(),
            instance_id: instance_id.into(),
            idle_nic_threshold: DEFAULT_IDLE_NIC_THRESHOLD,
            link_wait_timeout: DEFAULT_LINK_WAIT_TIMEOUT,
        }
    }

    /// Set the data root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = QcnetPaths::with_root(root);
        self
    }

    /// Set the idle interface threshold.
    #[must_use]
    pub const fn with_idle_nic_threshold(mut self, threshold: usize) -> Self {
        self.idle_nic_threshold = threshold;
        self
    }

    /// Set the link wait timeout.
    #[must_use]
    pub const fn with_link_wait_timeout(mut self, timeout: Duration) -> Self {
        self.link_wait_timeout = timeout;
        self
    }
}
