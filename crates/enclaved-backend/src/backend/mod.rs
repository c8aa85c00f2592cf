//! The resource-lifecycle engine.
//!
//! [`DockerBackend`] orchestrates the allocator, the attributes providers,
//! and the parallel executor to implement create/get/stop/destroy for
//! enclaves, their support containers, and user services. All mutable
//! state lives on the instance (free-IP registries, service registrations,
//! the enclave-creation lock); the runtime's label store is the source of
//! truth for everything else and is always re-read rather than cached.

mod api_container;
mod compensation;
mod consts;
mod enclave;
mod logs_aggregator;
mod logs_collector;
mod networking_sidecar;
mod reverse_proxy;
mod service_registration;
mod shared;
mod user_services;

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use enclaved_docker::ContainerRuntime;
use ipnetwork::Ipv4Network;
use tokio::sync::Mutex;

use crate::attributes::ObjectAttributesProvider;
use crate::error::{BackendError, Result};
use crate::free_ip_tracker::FreeIpTracker;
use crate::network_allocator::NetworkAllocator;
use crate::objects::enclave::EnclaveUuid;

pub use shared::is_container_running;

use service_registration::ServiceRegistrationRepository;

/// Tunables for the engine's bounded-retry loops.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Attempts of the subnet-allocation procedure.
    pub network_allocation_max_retries: u32,
    /// Fixed delay between subnet-allocation attempts.
    pub network_allocation_retry_delay: Duration,
    /// Polls of a newly started container's listening port.
    pub availability_wait_max_retries: u32,
    /// Fixed delay between availability polls.
    pub availability_wait_retry_delay: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            network_allocation_max_retries: 10,
            network_allocation_retry_delay: Duration::from_secs(1),
            availability_wait_max_retries: 10,
            availability_wait_retry_delay: Duration::from_secs(1),
        }
    }
}

/// The lifecycle engine over a Docker-API-compatible runtime.
pub struct DockerBackend {
    runtime: Arc<dyn ContainerRuntime>,
    attrs_provider: ObjectAttributesProvider,
    network_allocator: NetworkAllocator,
    config: BackendConfig,
    // Per-enclave IP trackers, registered only inside the process that owns
    // the enclave's address space (the API container). Their presence gates
    // operations that must not run elsewhere.
    enclave_free_ip_trackers: Mutex<HashMap<EnclaveUuid, Arc<Mutex<FreeIpTracker>>>>,
    service_registrations: ServiceRegistrationRepository,
    // Serializes enclave creation so two concurrent creates can't both pass
    // the existence guard.
    enclave_creation_lock: Mutex<()>,
}

impl DockerBackend {
    /// Creates an engine with default retry tunables.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_config(runtime, BackendConfig::default())
    }

    /// Creates an engine with explicit retry tunables.
    #[must_use]
    pub fn with_config(runtime: Arc<dyn ContainerRuntime>, config: BackendConfig) -> Self {
        let network_allocator = NetworkAllocator::with_retry_policy(
            Arc::clone(&runtime),
            config.network_allocation_max_retries,
            config.network_allocation_retry_delay,
        );
        Self {
            runtime,
            attrs_provider: ObjectAttributesProvider::new(),
            network_allocator,
            config,
            enclave_free_ip_trackers: Mutex::new(HashMap::new()),
            service_registrations: ServiceRegistrationRepository::new(),
            enclave_creation_lock: Mutex::new(()),
        }
    }

    pub(crate) fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub(crate) fn attrs_provider(&self) -> &ObjectAttributesProvider {
        &self.attrs_provider
    }

    pub(crate) fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn network_allocator(&self) -> &NetworkAllocator {
        &self.network_allocator
    }

    pub(crate) fn service_registrations(&self) -> &ServiceRegistrationRepository {
        &self.service_registrations
    }

    pub(crate) fn enclave_creation_lock(&self) -> &Mutex<()> {
        &self.enclave_creation_lock
    }

    /// Registers a free-IP tracker for an enclave's subnet.
    ///
    /// Only the process owning the enclave's address space does this;
    /// destroy operations refuse enclaves with a registered tracker.
    pub async fn register_enclave_free_ip_tracker(
        &self,
        enclave_uuid: EnclaveUuid,
        subnet: Ipv4Network,
        already_taken: BTreeSet<Ipv4Addr>,
    ) -> Result<()> {
        let mut trackers = self.enclave_free_ip_trackers.lock().await;
        if trackers.contains_key(&enclave_uuid) {
            return Err(BackendError::already_exists(format!(
                "free IP address tracker for enclave '{enclave_uuid}'"
            )));
        }
        trackers.insert(
            enclave_uuid,
            Arc::new(Mutex::new(FreeIpTracker::new(subnet, already_taken))),
        );
        Ok(())
    }

    /// Drops the tracker registered for an enclave, if any.
    pub async fn unregister_enclave_free_ip_tracker(&self, enclave_uuid: &EnclaveUuid) {
        self.enclave_free_ip_trackers
            .lock()
            .await
            .remove(enclave_uuid);
    }

    pub(crate) async fn has_enclave_free_ip_tracker(&self, enclave_uuid: &EnclaveUuid) -> bool {
        self.enclave_free_ip_trackers
            .lock()
            .await
            .contains_key(enclave_uuid)
    }

    pub(crate) async fn enclave_free_ip_tracker(
        &self,
        enclave_uuid: &EnclaveUuid,
    ) -> Result<Arc<Mutex<FreeIpTracker>>> {
        self.enclave_free_ip_trackers
            .lock()
            .await
            .get(enclave_uuid)
            .cloned()
            .ok_or_else(|| {
                BackendError::config(format!(
                    "no free IP address tracker is registered for enclave '{enclave_uuid}'; \
                     this operation can only run in the process that owns the enclave's \
                     address space"
                ))
            })
    }
}
