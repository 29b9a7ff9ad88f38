//! Durable network and endpoint state.
//!
//! Every record is written to a temp file under `<root>/tmp`, fsynced, then
//! renamed over its destination. A reader sees the old record or the new one,
//! never a partial write.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use qcnet_common::{EndpointId, NetworkId, QcnetError, QcnetPaths, QcnetResult};

use crate::record::{EndpointRecord, NetworkRecord};

/// A network as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNetwork {
    /// The network record.
    pub network: NetworkRecord,
    /// Its endpoint records.
    pub endpoints: Vec<EndpointRecord>,
}

/// Reads and writes plugin state under a data root.
#[derive(Debug, Clone)]
pub struct NetworkStateStore {
    paths: QcnetPaths,
}

impl NetworkStateStore {
    /// Create a store rooted at `paths`.
    #[must_use]
    pub const fn new(paths: QcnetPaths) -> Self {
        Self { paths }
    }

    /// The on-disk layout.
    #[must_use]
    pub const fn paths(&self) -> &QcnetPaths {
        &self.paths
    }

    /// Create the directory layout and clear temp files left by a crash
    /// between write and rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn init(&self) -> QcnetResult<()> {
        std::fs::create_dir_all(self.paths.networks())?;
        let tmp = self.paths.tmp();
        std::fs::create_dir_all(&tmp)?;

        for entry in std::fs::read_dir(&tmp)? {
            let path = entry?.path();
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
            } else {
                tracing::debug!(path = %path.display(), "Removed stale temp file");
            }
        }
        Ok(())
    }

    /// Persist a network record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn save_network(&self, network: &NetworkRecord) -> QcnetResult<()> {
        self.write_atomic(&self.paths.network_record(&network.id), network)
    }

    /// Persist an endpoint record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn save_endpoint(&self, network: &NetworkId, endpoint: &EndpointRecord) -> QcnetResult<()> {
        self.write_atomic(&self.paths.endpoint_record(network, &endpoint.id), endpoint)
    }

    /// Remove an endpoint record. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete_endpoint(&self, network: &NetworkId, endpoint: &EndpointId) -> QcnetResult<()> {
        remove_if_exists(&self.paths.endpoint_record(network, endpoint))
    }

    /// Remove a network directory and everything under it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete_network(&self, network: &NetworkId) -> QcnetResult<()> {
        match std::fs::remove_dir_all(self.paths.network_dir(network)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Load every network and its endpoints.
    ///
    /// A network without an `endpoints/` directory loads with no endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error on unreadable or malformed records.
    pub fn load(&self) -> QcnetResult<Vec<StoredNetwork>> {
        let mut networks = Vec::new();
        for path in glob_json(&self.paths.networks(), &["*", "*.json"])? {
            let network: NetworkRecord = read_json(&path)?;
            let expected = self.paths.network_record(&network.id);
            if path != expected {
                tracing::warn!(
                    path = %path.display(),
                    network_id = %network.id,
                    "Skipping network record stored under the wrong name"
                );
                continue;
            }

            let mut endpoints = Vec::new();
            for ep_path in glob_json(&self.paths.endpoints_dir(&network.id), &["*.json"])? {
                endpoints.push(read_json::<EndpointRecord>(&ep_path)?);
            }

            tracing::debug!(
                network_id = %network.id,
                vxnet = %network.vxnet,
                endpoints = endpoints.len(),
                "Loaded network"
            );
            networks.push(StoredNetwork { network, endpoints });
        }
        Ok(networks)
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> QcnetResult<()> {
        let parent = path.parent().ok_or_else(|| QcnetError::Internal {
            message: format!("record path {} has no parent", path.display()),
        })?;
        std::fs::create_dir_all(parent)?;
        let tmp_dir = self.paths.tmp();
        std::fs::create_dir_all(&tmp_dir)?;

        let tmp = NamedTempFile::new_in(&tmp_dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, value)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        // On error the temp file is dropped and removed.
        tmp.persist(path).map_err(|e| QcnetError::Io(e.error))?;
        File::open(parent)?.sync_all()?;

        tracing::trace!(path = %path.display(), "Wrote record");
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> QcnetResult<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Glob `base/<components...>`, escaping `base` so odd root paths still match.
fn glob_json(base: &Path, components: &[&str]) -> QcnetResult<Vec<PathBuf>> {
    let mut pattern = glob::Pattern::escape(&base.to_string_lossy());
    for component in components {
        pattern.push('/');
        pattern.push_str(component);
    }

    let paths = glob::glob(&pattern).map_err(|e| QcnetError::Internal {
        message: format!("invalid glob pattern {pattern}: {e}"),
    })?;
    let mut found = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| QcnetError::Io(std::io::Error::from(e)))?;
        if path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> QcnetResult<T> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| {
        QcnetError::Serialization(format!("{}: {}", path.display(), e))
    })
}
