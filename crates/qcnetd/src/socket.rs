//! The plugin's unix socket.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::Context;
use nix::unistd::{Gid, Group};
use tokio::net::UnixListener;

/// Group that may talk to the plugin besides root.
pub const SOCKET_GROUP: &str = "docker";

const SOCKET_MODE: u32 = 0o660;

/// Bind the plugin socket, replacing a stale one, readable by `docker`.
///
/// # Errors
///
/// Returns an error if the socket cannot be created or its mode cannot be
/// set. Failing to change its group is only logged.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    remove_stale(path)?;

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind {}", path.display()))?;

    if let Some(gid) = socket_group() {
        if let Err(e) = nix::unistd::chown(path, None, Some(gid)) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to hand socket to the docker group");
        }
    }
    std::fs::set_permissions(path, Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("failed to set mode of {}", path.display()))?;

    Ok(listener)
}

/// Remove the socket on shutdown.
pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket");
    }
}

fn remove_stale(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

fn socket_group() -> Option<Gid> {
    match Group::from_name(SOCKET_GROUP) {
        Ok(Some(group)) => Some(group.gid),
        Ok(None) => {
            tracing::debug!(group = SOCKET_GROUP, "Group not found, socket stays root-only");
            None
        }
        Err(e) => {
            tracing::warn!(group = SOCKET_GROUP, error = %e, "Group lookup failed");
            None
        }
    }
}
