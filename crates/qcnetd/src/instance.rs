//! Host instance discovery.

use std::path::Path;

use qcnet_common::{QcnetError, QcnetResult};

/// Instance ID written by the QingCloud metadata agent.
pub const INSTANCE_ID_FILE: &str = "/etc/qingcloud/instance-id";

/// Instances are named after their ID, so the hostname is a fallback.
pub const HOSTNAME_FILE: &str = "/proc/sys/kernel/hostname";

const INSTANCE_PREFIX: &str = "i-";
const MIN_INSTANCE_ID_LENGTH: usize = 10;

/// Determine the host's instance ID from the first readable source.
///
/// # Errors
///
/// [`QcnetError::Config`] if no source holds a plausible instance ID.
pub fn discover(sources: &[&Path]) -> QcnetResult<String> {
    for source in sources {
        match std::fs::read_to_string(source) {
            Ok(content) => {
                let id = content.trim();
                tracing::debug!(source = %source.display(), id, "Read instance ID candidate");
                return validate(id);
            }
            Err(e) => {
                tracing::debug!(source = %source.display(), error = %e, "Instance ID source unavailable");
            }
        }
    }
    Err(QcnetError::Config {
        message: "unable to determine the host instance ID".into(),
    })
}

/// Check that `id` looks like a QingCloud instance ID.
///
/// # Errors
///
/// [`QcnetError::Config`] otherwise.
pub fn validate(id: &str) -> QcnetResult<String> {
    let id = id.trim();
    if id.starts_with(INSTANCE_PREFIX) && id.len() >= MIN_INSTANCE_ID_LENGTH {
        Ok(id.to_string())
    } else {
        Err(QcnetError::Config {
            message: format!("invalid instance ID {id:?}"),
        })
    }
}
