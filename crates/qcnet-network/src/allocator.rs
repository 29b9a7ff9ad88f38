//! NIC allocation.
//!
//! Allocation prefers, in order:
//!
//! 1. an idle NIC already attached to this host (no cloud mutation at all),
//! 2. an `available` NIC in the vxnet, attached to this host,
//! 3. a freshly created NIC, attached to this host.
//!
//! Between picking a NIC and the caller finishing with it (rename and
//! registration), the NIC sits in a [`ClaimSet`]. Concurrent allocations skip
//! claimed NICs and fall through to the next step instead of waiting. The
//! claim set is in memory only: after a restart nothing is in flight, so
//! there is nothing to protect.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use qcnet_cloud::{CloudNicProvider, Nic, NicFilter, NicStatus};
use qcnet_common::{QcnetError, QcnetResult};

use crate::link::LinkRegistry;

const CREATE_ATTEMPTS: usize = 3;

/// Picks one of `len` candidates. Called with `len >= 1`.
pub trait NicChooser: Send + Sync {
    /// Index of the chosen candidate.
    fn choose(&self, len: usize) -> usize;
}

/// Uniform random choice, spreading load over otherwise equal NICs.
#[derive(Debug)]
pub struct RandomChooser {
    rng: Mutex<StdRng>,
}

impl RandomChooser {
    /// Seeded from the OS.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sequence for a given seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomChooser {
    fn default() -> Self {
        Self::new()
    }
}

impl NicChooser for RandomChooser {
    fn choose(&self, len: usize) -> usize {
        self.rng.lock().random_range(0..len)
    }
}

/// Always the first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstChooser;

impl NicChooser for FirstChooser {
    fn choose(&self, _len: usize) -> usize {
        0
    }
}

/// Process-wide set of NIC IDs currently being claimed.
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ClaimSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a specific NIC. `None` if someone else holds it.
    #[must_use]
    pub fn try_claim(&self, nic_id: &str) -> Option<NicClaim> {
        let key = nic_id.to_ascii_lowercase();
        if self.held.lock().insert(key.clone()) {
            Some(NicClaim {
                set: self.clone(),
                nic_id: key,
            })
        } else {
            None
        }
    }

    /// Atomically pick one unclaimed candidate and claim it.
    ///
    /// `pick` receives the number of unclaimed candidates (at least one) and
    /// returns the index to take.
    pub fn claim_one<F>(&self, candidates: &[Nic], pick: F) -> Option<(Nic, NicClaim)>
    where
        F: FnOnce(usize) -> usize,
    {
        let mut held = self.held.lock();
        let free: Vec<&Nic> = candidates
            .iter()
            .filter(|nic| !held.contains(&nic.hardware_addr()))
            .collect();
        if free.is_empty() {
            return None;
        }

        let nic = free[pick(free.len()).min(free.len() - 1)].clone();
        let key = nic.hardware_addr();
        held.insert(key.clone());
        drop(held);

        Some((
            nic,
            NicClaim {
                set: self.clone(),
                nic_id: key,
            },
        ))
    }

    /// Whether a NIC is currently claimed.
    #[must_use]
    pub fn is_claimed(&self, nic_id: &str) -> bool {
        self.held.lock().contains(&nic_id.to_ascii_lowercase())
    }

    /// Number of NICs currently claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    /// Whether no NIC is claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}

/// A held claim; released on drop.
#[derive(Debug)]
pub struct NicClaim {
    set: ClaimSet,
    nic_id: String,
}

impl NicClaim {
    /// The claimed NIC.
    #[must_use]
    pub fn nic_id(&self) -> &str {
        &self.nic_id
    }
}

impl Drop for NicClaim {
    fn drop(&mut self) {
        self.set.held.lock().remove(&self.nic_id);
    }
}

/// Where an allocated NIC came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    /// Already attached to this host and idle.
    LocalIdle,
    /// An available NIC from the vxnet, now attached.
    CloudAvailable,
    /// Created for this allocation, now attached.
    Created,
}

/// A NIC attached to this host and claimed for the caller.
#[derive(Debug)]
pub struct Allocation {
    /// The NIC.
    pub nic: Nic,
    /// Private IP of the NIC.
    pub ip: Ipv4Addr,
    /// Which step produced it.
    pub source: AllocationSource,
    claim: NicClaim,
}

impl Allocation {
    /// Hardware address of the NIC.
    #[must_use]
    pub fn hardware_addr(&self) -> &str {
        self.claim.nic_id()
    }

    /// Give up the claim. Dropping the allocation does the same.
    pub fn release(self) {
        drop(self.claim);
    }
}

/// Produces host-visible NICs for endpoints.
pub struct NicAllocator {
    provider: Arc<dyn CloudNicProvider>,
    links: Arc<dyn LinkRegistry>,
    chooser: Box<dyn NicChooser>,
    claims: ClaimSet,
    instance_id: String,
}

impl std::fmt::Debug for NicAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NicAllocator")
            .field("instance_id", &self.instance_id)
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

impl NicAllocator {
    /// Create an allocator for the host `instance_id`, sharing `claims`.
    pub fn new(
        provider: Arc<dyn CloudNicProvider>,
        links: Arc<dyn LinkRegistry>,
        claims: ClaimSet,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            links,
            chooser: Box::new(RandomChooser::new()),
            claims,
            instance_id: instance_id.into(),
        }
    }

    /// Replace the strategy used to pick among available cloud NICs.
    #[must_use]
    pub fn with_chooser(mut self, chooser: impl NicChooser + 'static) -> Self {
        self.chooser = Box::new(chooser);
        self
    }

    /// The claim set this allocator guards.
    #[must_use]
    pub const fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Host instance NICs are attached to.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Allocate a NIC in `vxnet`, pinned to `desired_ip` if given.
    ///
    /// `in_use` holds hardware addresses of NICs already owned by endpoints;
    /// they are never handed out again even if they still look idle.
    ///
    /// # Errors
    ///
    /// Provider errors from any step, unchanged. A NIC created but not
    /// attached is left behind; it is picked up by a later cloud search.
    pub async fn allocate(
        &self,
        vxnet: &str,
        desired_ip: Option<Ipv4Addr>,
        in_use: &HashSet<String>,
    ) -> QcnetResult<Allocation> {
        if let Some(allocation) = self.find_local_idle(vxnet, desired_ip, in_use).await? {
            tracing::info!(
                nic_id = %allocation.nic.id,
                ip = %allocation.ip,
                vxnet,
                "Reusing idle NIC attached to this host"
            );
            return Ok(allocation);
        }

        let (nic, claim, source) = match self.find_available(vxnet, desired_ip, in_use).await? {
            Some((nic, claim)) => (nic, claim, AllocationSource::CloudAvailable),
            None => {
                let (nic, claim) = self.create_claimed(vxnet, desired_ip).await?;
                (nic, claim, AllocationSource::Created)
            }
        };

        let ip = nic.private_ip.or(desired_ip).ok_or_else(|| QcnetError::Internal {
            message: format!("NIC {} has no private IP", nic.id),
        })?;

        let job_id = self
            .provider
            .attach_nic(&nic.id, &self.instance_id, true)
            .await?;
        tracing::info!(
            nic_id = %nic.id,
            %ip,
            vxnet,
            %job_id,
            ?source,
            "Attached NIC to this host"
        );

        Ok(Allocation {
            nic,
            ip,
            source,
            claim,
        })
    }

    /// Step 1: NICs the provider says are on this host and that the host can
    /// actually see, minus the VM's own interface and anything taken.
    async fn find_local_idle(
        &self,
        vxnet: &str,
        desired_ip: Option<Ipv4Addr>,
        in_use: &HashSet<String>,
    ) -> QcnetResult<Option<Allocation>> {
        let filter = NicFilter::vxnet(vxnet).with_instance(&self.instance_id);
        let attached = self.provider.list_nics(&filter).await?;
        let links = self.links.list_links().await?;

        let candidates: Vec<Nic> = attached
            .into_iter()
            .filter(|nic| !nic.is_host_primary())
            .filter(|nic| nic.private_ip.is_some())
            .filter(|nic| desired_ip.is_none_or(|ip| nic.private_ip == Some(ip)))
            .filter(|nic| {
                let mac = nic.hardware_addr();
                links.contains_key(&mac) && !in_use.contains(&mac)
            })
            .collect();

        Ok(self.claims.claim_one(&candidates, |_| 0).and_then(|(nic, claim)| {
            nic.private_ip.map(|ip| Allocation {
                nic,
                ip,
                source: AllocationSource::LocalIdle,
                claim,
            })
        }))
    }

    /// Step 2: an `available` NIC in the vxnet, by IP or at random.
    async fn find_available(
        &self,
        vxnet: &str,
        desired_ip: Option<Ipv4Addr>,
        in_use: &HashSet<String>,
    ) -> QcnetResult<Option<(Nic, NicClaim)>> {
        let filter = NicFilter::vxnet(vxnet)
            .with_status(NicStatus::Available)
            .with_ip(desired_ip);
        let candidates: Vec<Nic> = self
            .provider
            .list_nics(&filter)
            .await?
            .into_iter()
            .filter(|nic| filter.matches(nic))
            .filter(|nic| !nic.is_host_primary())
            .filter(|nic| !in_use.contains(&nic.hardware_addr()))
            .collect();

        if desired_ip.is_some() {
            Ok(self.claims.claim_one(&candidates, |_| 0))
        } else {
            Ok(self
                .claims
                .claim_one(&candidates, |len| self.chooser.choose(len)))
        }
    }

    /// Step 3: create a NIC and claim it.
    ///
    /// A new NIC is `available` until attached, so a concurrent cloud search
    /// may claim it first. The creator then just creates another.
    async fn create_claimed(
        &self,
        vxnet: &str,
        desired_ip: Option<Ipv4Addr>,
    ) -> QcnetResult<(Nic, NicClaim)> {
        for _ in 0..CREATE_ATTEMPTS {
            tracing::debug!(vxnet, ?desired_ip, "No available NIC, creating one");
            let nic = self.provider.create_nic(vxnet, desired_ip).await?;
            if let Some(claim) = self.claims.try_claim(&nic.id) {
                return Ok((nic, claim));
            }
            tracing::debug!(nic_id = %nic.id, "Created NIC was claimed by a concurrent allocation");
        }
        Err(QcnetError::AllocationExhausted {
            vxnet: vxnet.to_string(),
        })
    }
}
