//! In-memory cloud and host used by the integration tests.
//!
//! Attaching a NIC in [`FakeCloud`] plugs a link into the shared
//! [`FakeLinks`]; detaching unplugs it, the way a real hot-plug would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use qcnet_cloud::{CloudNicProvider, Nic, NicFilter, NicStatus};
use qcnet_common::{QcnetError, QcnetResult};
use qcnet_network::{DriverConfig, EndpointLifecycle, FirstChooser, Link, LinkRegistry};

pub const INSTANCE: &str = "i-testhost01";
pub const PRIMARY_MAC: &str = "52:54:9a:00:00:00";

/// Provider calls, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(NicFilter),
    Create(String, Option<Ipv4Addr>),
    Attach(String, String),
    Detach(String),
}

#[derive(Debug, Default)]
pub struct FakeLinks {
    links: Mutex<HashMap<String, Link>>,
    renames: Mutex<Vec<(String, String)>>,
}

impl FakeLinks {
    /// Host with loopback and the VM's primary interface.
    pub fn new() -> Self {
        let links = Self::default();
        links.insert("lo", "00:00:00:00:00:00");
        links.insert("eth0", PRIMARY_MAC);
        links
    }

    fn insert(&self, name: &str, mac: &str) {
        let mut links = self.links.lock();
        let index = u32::try_from(links.len()).unwrap() + 1;
        links.insert(
            mac.to_string(),
            Link {
                index,
                name: name.to_string(),
                mac: mac.to_string(),
                is_device: true,
            },
        );
    }

    pub fn plug(&self, mac: &str) {
        let name = format!("eth{}", self.links.lock().len());
        self.insert(&name, mac);
    }

    pub fn unplug(&self, mac: &str) {
        self.links.lock().remove(mac);
    }

    pub fn has(&self, mac: &str) -> bool {
        self.links.lock().contains_key(mac)
    }

    pub fn name_of(&self, mac: &str) -> Option<String> {
        self.links.lock().get(mac).map(|l| l.name.clone())
    }

    pub fn renames(&self) -> Vec<(String, String)> {
        self.renames.lock().clone()
    }
}

#[async_trait]
impl LinkRegistry for FakeLinks {
    async fn list_links(&self) -> QcnetResult<HashMap<String, Link>> {
        tokio::task::yield_now().await;
        Ok(self.links.lock().clone())
    }

    async fn rename_link(&self, link: &Link, new_name: &str) -> QcnetResult<()> {
        let mut links = self.links.lock();
        let entry = links.get_mut(&link.mac).ok_or_else(|| QcnetError::LinkNotFound {
            mac: link.mac.clone(),
        })?;
        entry.name = new_name.to_string();
        self.renames
            .lock()
            .push((link.mac.clone(), new_name.to_string()));
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeCloud {
    host: Arc<FakeLinks>,
    nics: Mutex<Vec<Nic>>,
    calls: Mutex<Vec<Call>>,
    created: Mutex<u8>,
    fail_attach: Mutex<bool>,
    fail_detach: Mutex<bool>,
    no_hotplug: Mutex<bool>,
}

impl FakeCloud {
    /// Cloud where the host's primary NIC sits in `vxnet`.
    pub fn new(host: Arc<FakeLinks>, vxnet: &str) -> Self {
        let primary = Nic {
            id: PRIMARY_MAC.to_string(),
            nic_name: String::new(),
            vxnet_id: vxnet.to_string(),
            private_ip: Some(Ipv4Addr::new(10, 0, 0, 2)),
            role: 1,
            status: NicStatus::InUse,
            instance_id: INSTANCE.to_string(),
        };
        Self {
            host,
            nics: Mutex::new(vec![primary]),
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(0),
            fail_attach: Mutex::new(false),
            fail_detach: Mutex::new(false),
            no_hotplug: Mutex::new(false),
        }
    }

    /// A NIC already attached to this host and visible as a link.
    pub fn add_attached(&self, mac: &str, vxnet: &str, ip: [u8; 4]) {
        self.nics.lock().push(nic(mac, vxnet, ip, NicStatus::InUse, INSTANCE));
        self.host.plug(mac);
    }

    /// A detached NIC waiting in the vxnet.
    pub fn add_available(&self, mac: &str, vxnet: &str, ip: [u8; 4]) {
        self.nics.lock().push(nic(mac, vxnet, ip, NicStatus::Available, ""));
    }

    pub fn fail_attach(&self) {
        *self.fail_attach.lock() = true;
    }

    pub fn fail_detach(&self) {
        *self.fail_detach.lock() = true;
    }

    /// Attached NICs never show up as links on the host.
    pub fn no_hotplug(&self) {
        *self.no_hotplug.lock() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List(_)))
            .collect()
    }

    pub fn status_of(&self, mac: &str) -> Option<NicStatus> {
        self.nics
            .lock()
            .iter()
            .find(|n| n.id == mac)
            .map(|n| n.status.clone())
    }
}

fn nic(mac: &str, vxnet: &str, ip: [u8; 4], status: NicStatus, instance: &str) -> Nic {
    Nic {
        id: mac.to_string(),
        nic_name: String::new(),
        vxnet_id: vxnet.to_string(),
        private_ip: Some(Ipv4Addr::from(ip)),
        role: 0,
        status,
        instance_id: instance.to_string(),
    }
}

#[async_trait]
impl CloudNicProvider for FakeCloud {
    async fn list_nics(&self, filter: &NicFilter) -> QcnetResult<Vec<Nic>> {
        self.calls.lock().push(Call::List(filter.clone()));
        tokio::task::yield_now().await;
        Ok(self
            .nics
            .lock()
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect())
    }

    async fn create_nic(&self, vxnet: &str, desired_ip: Option<Ipv4Addr>) -> QcnetResult<Nic> {
        self.calls
            .lock()
            .push(Call::Create(vxnet.to_string(), desired_ip));
        tokio::task::yield_now().await;

        let n = {
            let mut created = self.created.lock();
            *created += 1;
            *created
        };
        let ip = desired_ip.unwrap_or(Ipv4Addr::new(10, 0, 0, 100 + n));
        let created = nic(
            &format!("52:54:9a:ff:00:{n:02x}"),
            vxnet,
            ip.octets(),
            NicStatus::Available,
            "",
        );
        self.nics.lock().push(created.clone());
        Ok(created)
    }

    async fn attach_nic(&self, nic_id: &str, instance_id: &str, _wait: bool) -> QcnetResult<String> {
        self.calls
            .lock()
            .push(Call::Attach(nic_id.to_string(), instance_id.to_string()));
        tokio::task::yield_now().await;

        if *self.fail_attach.lock() {
            return Err(QcnetError::JobFailed {
                job_id: "j-attach".into(),
                error_codes: "5100".into(),
            });
        }
        let mut nics = self.nics.lock();
        let nic = nics
            .iter_mut()
            .find(|n| n.id == nic_id)
            .ok_or_else(|| QcnetError::Provider {
                action: "AttachNics".into(),
                code: 2100,
                message: format!("nic {nic_id} not found"),
            })?;
        nic.status = NicStatus::InUse;
        nic.instance_id = instance_id.to_string();
        if !*self.no_hotplug.lock() {
            self.host.plug(&nic.hardware_addr());
        }
        Ok("j-attach".into())
    }

    async fn detach_nic(&self, nic_id: &str, _wait: bool) -> QcnetResult<String> {
        self.calls.lock().push(Call::Detach(nic_id.to_string()));
        tokio::task::yield_now().await;

        if *self.fail_detach.lock() {
            return Err(QcnetError::JobTimeout {
                job_id: "j-detach".into(),
            });
        }
        let mut nics = self.nics.lock();
        if let Some(nic) = nics.iter_mut().find(|n| n.hardware_addr() == nic_id) {
            nic.status = NicStatus::Available;
            nic.instance_id.clear();
        }
        self.host.unplug(nic_id);
        Ok("j-detach".into())
    }
}

/// A lifecycle wired to fakes, with its data root in a temp dir.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub links: Arc<FakeLinks>,
    pub cloud: Arc<FakeCloud>,
    pub lifecycle: EndpointLifecycle,
}

impl Harness {
    pub fn new(vxnet: &str, idle_threshold: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let links = Arc::new(FakeLinks::new());
        let cloud = Arc::new(FakeCloud::new(Arc::clone(&links), vxnet));
        let lifecycle = Self::lifecycle(dir.path(), &links, &cloud, idle_threshold);
        lifecycle.load().unwrap();
        Self {
            dir,
            links,
            cloud,
            lifecycle,
        }
    }

    /// Another lifecycle over the same data root, as after a restart.
    pub fn restart(&self, idle_threshold: usize) -> EndpointLifecycle {
        let lifecycle = Self::lifecycle(self.dir.path(), &self.links, &self.cloud, idle_threshold);
        lifecycle.load().unwrap();
        lifecycle
    }

    fn lifecycle(
        root: &std::path::Path,
        links: &Arc<FakeLinks>,
        cloud: &Arc<FakeCloud>,
        idle_threshold: usize,
    ) -> EndpointLifecycle {
        let config = DriverConfig::new(INSTANCE)
            .with_root(root)
            .with_idle_nic_threshold(idle_threshold)
            .with_link_wait_timeout(std::time::Duration::from_secs(1));
        EndpointLifecycle::new(
            config,
            Arc::clone(cloud) as Arc<dyn CloudNicProvider>,
            Arc::clone(links) as Arc<dyn LinkRegistry>,
        )
        .with_chooser(FirstChooser)
    }
}
