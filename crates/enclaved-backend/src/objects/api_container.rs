//! The per-enclave API container.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::objects::container::ContainerState;
use crate::objects::enclave::EnclaveUuid;
use crate::port_spec::PortSpec;

/// The API container serving one enclave. At most one exists per enclave.
#[derive(Debug, Clone)]
pub struct ApiContainer {
    pub enclave_uuid: EnclaveUuid,
    pub status: ContainerState,
    /// Static address inside the enclave network.
    pub private_ip: Ipv4Addr,
    pub private_grpc_port: PortSpec,
    /// Host-side address, populated while the container runs with a
    /// published port.
    pub public_ip: Option<Ipv4Addr>,
    pub public_grpc_port: Option<PortSpec>,
}

/// Filters for API-container operations. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct ApiContainerFilters {
    pub enclave_uuids: BTreeSet<EnclaveUuid>,
    pub statuses: BTreeSet<ContainerState>,
}

impl ApiContainerFilters {
    #[must_use]
    pub fn by_enclave(enclave_uuid: EnclaveUuid) -> Self {
        Self {
            enclave_uuids: BTreeSet::from([enclave_uuid]),
            statuses: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn matches(&self, api_container: &ApiContainer) -> bool {
        (self.enclave_uuids.is_empty() || self.enclave_uuids.contains(&api_container.enclave_uuid))
            && (self.statuses.is_empty() || self.statuses.contains(&api_container.status))
    }
}
