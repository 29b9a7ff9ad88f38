//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use qcnet_cloud::CloudConfig;
use qcnet_cloud::client::DEFAULT_ENDPOINT;
use qcnet_common::paths::DEFAULT_ROOT;
use qcnet_common::{QcnetError, QcnetResult};
use qcnet_network::DriverConfig;
use qcnet_network::config::DEFAULT_IDLE_NIC_THRESHOLD;

/// Default plugin socket Docker discovers the driver on.
pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/qingcloud.sock";

/// qcnetd - QingCloud vxnet network plugin for Docker
#[derive(Parser, Debug, Clone)]
#[command(name = "qcnetd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Access key ID created from the QingCloud console
    #[arg(short = 'a', long, env = "ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// Secret key of the access key
    #[arg(short = 's', long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Zone the host instance lives in
    #[arg(short = 'z', long, env = "ZONE")]
    pub zone: Option<String>,

    /// Directory for network and endpoint records
    #[arg(short = 'd', long, env = "DATA_DIR", default_value = DEFAULT_ROOT)]
    pub data_dir: PathBuf,

    /// Unix socket to serve the plugin API on
    #[arg(long, env = "PLUGIN_SOCKET", default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// QingCloud IaaS API endpoint
    #[arg(long, env = "API_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub api_endpoint: String,

    /// Idle interfaces kept attached to the host before freed NICs are detached
    #[arg(long, env = "IDLE_NIC_THRESHOLD", default_value_t = DEFAULT_IDLE_NIC_THRESHOLD)]
    pub idle_nic_threshold: usize,

    /// Seconds to wait for an attach or detach job
    #[arg(long, env = "JOB_TIMEOUT", default_value_t = 30)]
    pub job_timeout: u64,

    /// Host instance ID; discovered from the instance metadata when unset
    #[arg(long, env = "INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

impl Args {
    /// Cloud client configuration.
    ///
    /// # Errors
    ///
    /// [`QcnetError::Config`] if a credential or the zone is missing or blank.
    pub fn cloud_config(&self) -> QcnetResult<CloudConfig> {
        let access_key_id = required("access-key-id", self.access_key_id.as_deref())?;
        let secret_key = required("secret-key", self.secret_key.as_deref())?;
        let zone = required("zone", self.zone.as_deref())?;
        Ok(CloudConfig::new(access_key_id, secret_key, zone)
            .with_endpoint(self.api_endpoint.trim())
            .with_job_timeout(Duration::from_secs(self.job_timeout)))
    }

    /// Driver configuration for the host `instance_id`.
    #[must_use]
    pub fn driver_config(&self, instance_id: impl Into<String>) -> DriverConfig {
        DriverConfig::new(instance_id)
            .with_root(&self.data_dir)
            .with_idle_nic_threshold(self.idle_nic_threshold)
    }

    /// Log filter directive implied by `--debug`.
    #[must_use]
    pub const fn default_log_level(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

fn required(name: &str, value: Option<&str>) -> QcnetResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(QcnetError::Config {
            message: format!("{name} must be provided"),
        }),
    }
}
