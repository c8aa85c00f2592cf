//! Deterministic, collision-safe subnet allocation for enclave networks.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use enclaved_docker::ContainerRuntime;
use ipnetwork::Ipv4Network;
use tracing::debug;

use crate::error::BackendError;
use crate::free_ip_tracker::FreeIpTracker;

const SUPPORTED_IP_ADDR_BIT_LENGTH: u32 = 32;

/// Width of one enclave network slice: /22, i.e. 1024 addresses.
pub const NETWORK_WIDTH_BITS: u32 = 10;

/// Width of the enclave index: 64 candidate slices.
pub const ENCLAVE_INDEX_WIDTH_BITS: u32 = 6;

/// Width of the reserved block all slices are carved from.
///
/// Invariant: `NETWORK_WIDTH_BITS + ENCLAVE_INDEX_WIDTH_BITS` must equal
/// this, or the bit arithmetic in [`find_free_subnet`] is unsound. A unit
/// test pins it.
pub const ALLOCATABLE_BLOCK_WIDTH_BITS: u32 = 16;

/// The reserved private block enclave subnets are carved from.
const BASE_BLOCK_ADDR: Ipv4Addr = Ipv4Addr::new(172, 23, 0, 0);

const SLICE_PREFIX: u8 = (SUPPORTED_IP_ADDR_BIT_LENGTH - NETWORK_WIDTH_BITS) as u8;

// The daemon returns an error containing this text when a requested CIDR
// overlaps a preexisting network's pool. Matching on daemon error text is
// inherently fragile across runtime versions; this single exact fragment is
// deliberately not widened with guessed variants.
const OVERLAPPING_ADDRESS_SPACE_ERR_FRAGMENT: &str =
    "Pool overlaps with other one on this address space";

const MAX_NETWORK_ALLOCATION_RETRIES: u32 = 10;
const TIME_BETWEEN_NETWORK_CREATION_RETRIES: Duration = Duration::from_secs(1);

/// A successfully allocated enclave network.
#[derive(Debug, Clone)]
pub struct AllocatedNetwork {
    /// Runtime-assigned network ID.
    pub network_id: String,
    /// The subnet slice the network occupies.
    pub subnet: Ipv4Network,
    /// The gateway address picked inside the slice.
    pub gateway_ip: Ipv4Addr,
}

/// Allocates enclave networks out of the reserved block.
///
/// The subnet-selection read (list networks) and the create call are not
/// atomic with respect to other allocators; correctness relies on the
/// runtime rejecting overlapping pools plus bounded retry.
pub struct NetworkAllocator {
    runtime: Arc<dyn ContainerRuntime>,
    max_retries: u32,
    retry_delay: Duration,
}

impl NetworkAllocator {
    /// Creates an allocator with the default retry policy.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_retry_policy(
            runtime,
            MAX_NETWORK_ALLOCATION_RETRIES,
            TIME_BETWEEN_NETWORK_CREATION_RETRIES,
        )
    }

    /// Creates an allocator with an explicit retry policy.
    #[must_use]
    pub fn with_retry_policy(
        runtime: Arc<dyn ContainerRuntime>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            runtime,
            max_retries,
            retry_delay,
        }
    }

    /// Creates a network on an unused subnet slice.
    ///
    /// Scans the runtime for every in-use subnet, picks the lowest free
    /// enclave index, takes the slice's first free address as the gateway,
    /// and asks the runtime to create the network. The runtime may briefly
    /// under-report a just-deleted network's IP reservation, so the
    /// overlapping-pool rejection is treated as transient and the whole
    /// procedure retried after a delay; any other error aborts immediately.
    pub async fn create_new_network(
        &self,
        network_name: &str,
        labels: HashMap<String, String>,
    ) -> Result<AllocatedNetwork, BackendError> {
        for attempt in 0..self.max_retries {
            let networks = self.runtime.list_networks().await?;
            let used_subnets: Vec<Ipv4Network> =
                networks.iter().filter_map(|network| network.subnet).collect();

            let candidate = find_free_subnet(&used_subnets)?;

            let mut gateway_tracker = FreeIpTracker::new(candidate, BTreeSet::new());
            let gateway_ip = gateway_tracker.get_free_ip_addr()?;

            match self
                .runtime
                .create_network(network_name, candidate, gateway_ip, labels.clone())
                .await
            {
                Ok(network_id) => {
                    debug!(
                        network_name,
                        network_id,
                        subnet = %candidate,
                        "allocated enclave network"
                    );
                    return Ok(AllocatedNetwork {
                        network_id,
                        subnet: candidate,
                        gateway_ip,
                    });
                }
                Err(err) if err.to_string().contains(OVERLAPPING_ADDRESS_SPACE_ERR_FRAGMENT) => {
                    debug!(
                        network_name,
                        subnet = %candidate,
                        attempt,
                        "runtime reported an overlapping address pool for a subnet we \
                         computed as free; assuming a stale reservation or a concurrent \
                         allocator and retrying after {:?}",
                        self.retry_delay,
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    return Err(BackendError::allocation(format!(
                        "a non-recoverable error occurred creating network '{network_name}' \
                         with CIDR '{candidate}': {err}"
                    )));
                }
            }
        }

        Err(BackendError::timeout(format!(
            "couldn't allocate a network for '{network_name}' even after {} attempts with {:?} \
             between retries",
            self.max_retries, self.retry_delay,
        )))
    }
}

/// Picks the first enclave index whose slice doesn't intersect any in-use
/// subnet.
///
/// The mutual `contains` test covers both directions since either range
/// may be the larger one.
fn find_free_subnet(used_subnets: &[Ipv4Network]) -> Result<Ipv4Network, BackendError> {
    let base = u32::from(BASE_BLOCK_ADDR);
    for enclave_index in 0..(1u32 << ENCLAVE_INDEX_WIDTH_BITS) {
        let slice_addr = Ipv4Addr::from(base | (enclave_index << NETWORK_WIDTH_BITS));
        let candidate = Ipv4Network::new(slice_addr, SLICE_PREFIX)
            .map_err(|err| BackendError::internal(format!("building candidate subnet: {err}")))?;

        let collides = used_subnets.iter().any(|used| {
            used.contains(candidate.network()) || candidate.contains(used.network())
        });
        if !collides {
            return Ok(candidate);
        }
    }
    Err(BackendError::allocation(format!(
        "every one of the {} candidate subnets in block {}/{} is in use",
        1u32 << ENCLAVE_INDEX_WIDTH_BITS,
        BASE_BLOCK_ADDR,
        ALLOCATABLE_BLOCK_WIDTH_BITS,
    )))
}
