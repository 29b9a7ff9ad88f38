//! Host network interfaces.

use std::collections::HashMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::link::{LinkAttribute, LinkInfo, LinkMessage};
use rtnetlink::{Handle, LinkUnspec};

use qcnet_common::{QcnetError, QcnetResult};

/// A host network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Kernel interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
    /// Hardware address, lowercase and colon separated.
    pub mac: String,
    /// Plain device (no link-info kind): physical NICs and hot-plugged
    /// provider NICs, as opposed to bridges, veths and the like.
    pub is_device: bool,
}

impl Link {
    /// Whether the link counts towards the host's interface budget.
    #[must_use]
    pub fn is_countable_device(&self) -> bool {
        self.is_device && self.name != "lo"
    }
}

/// Host interface enumeration and renaming.
#[async_trait]
pub trait LinkRegistry: Send + Sync {
    /// All links, keyed by hardware address.
    async fn list_links(&self) -> QcnetResult<HashMap<String, Link>>;

    /// Bring a link down and give it a new name.
    async fn rename_link(&self, link: &Link, new_name: &str) -> QcnetResult<()>;
}

/// [`LinkRegistry`] over rtnetlink.
#[derive(Debug, Clone)]
pub struct NetlinkRegistry {
    handle: Handle,
}

impl NetlinkRegistry {
    /// Open a netlink socket. Must be called inside a tokio runtime, the
    /// connection task is spawned onto it.
    ///
    /// # Errors
    ///
    /// [`QcnetError::Netlink`] if the socket cannot be opened.
    pub fn new() -> QcnetResult<Self> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| QcnetError::Netlink {
            message: format!("unable to create netlink socket: {e}"),
        })?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn link_set(&self, message: LinkMessage) -> QcnetResult<()> {
        self.handle
            .link()
            .set(message)
            .execute()
            .await
            .map_err(|e| QcnetError::Netlink {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl LinkRegistry for NetlinkRegistry {
    async fn list_links(&self) -> QcnetResult<HashMap<String, Link>> {
        let mut links = HashMap::new();
        let mut stream = self.handle.link().get().execute();
        while let Some(message) = stream.try_next().await.map_err(|e| QcnetError::Netlink {
            message: format!("failed to list links: {e}"),
        })? {
            if let Some(link) = link_from_message(&message) {
                links.insert(link.mac.clone(), link);
            }
        }
        Ok(links)
    }

    async fn rename_link(&self, link: &Link, new_name: &str) -> QcnetResult<()> {
        tracing::debug!(from = %link.name, to = new_name, mac = %link.mac, "Renaming link");
        // The kernel refuses to rename an interface that is up.
        self.link_set(LinkUnspec::new_with_index(link.index).down().build())
            .await?;
        self.link_set(
            LinkUnspec::new_with_index(link.index)
                .name(new_name.to_string())
                .build(),
        )
        .await
    }
}

/// Extract a [`Link`]; links without a 6-byte hardware address are skipped.
fn link_from_message(message: &LinkMessage) -> Option<Link> {
    let mut name = String::new();
    let mut mac = None;
    let mut is_device = true;

    for attribute in &message.attributes {
        match attribute {
            LinkAttribute::IfName(n) => name.clone_from(n),
            LinkAttribute::Address(addr) if addr.len() == 6 => mac = Some(format_mac(addr)),
            LinkAttribute::LinkInfo(infos) => {
                if infos.iter().any(|info| matches!(info, LinkInfo::Kind(_))) {
                    is_device = false;
                }
            }
            _ => {}
        }
    }

    mac.map(|mac| Link {
        index: message.header.index,
        name,
        mac,
        is_device,
    })
}

/// Render a hardware address as `aa:bb:cc:dd:ee:ff`.
#[must_use]
pub fn format_mac(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}
