//! Per-service networking-sidecar containers.

use std::collections::BTreeSet;

use crate::objects::container::ContainerState;
use crate::objects::enclave::EnclaveUuid;
use crate::objects::service::ServiceUuid;

/// A networking sidecar paired with one user service, used for traffic
/// qualification inside the enclave network.
#[derive(Debug, Clone)]
pub struct NetworkingSidecar {
    pub service_uuid: ServiceUuid,
    pub enclave_uuid: EnclaveUuid,
    pub status: ContainerState,
}

/// Filters for networking-sidecar operations. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct NetworkingSidecarFilters {
    pub enclave_uuids: BTreeSet<EnclaveUuid>,
    pub service_uuids: BTreeSet<ServiceUuid>,
    pub statuses: BTreeSet<ContainerState>,
}

impl NetworkingSidecarFilters {
    #[must_use]
    pub fn by_service(enclave_uuid: EnclaveUuid, service_uuid: ServiceUuid) -> Self {
        Self {
            enclave_uuids: BTreeSet::from([enclave_uuid]),
            service_uuids: BTreeSet::from([service_uuid]),
            statuses: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn matches(&self, sidecar: &NetworkingSidecar) -> bool {
        (self.enclave_uuids.is_empty() || self.enclave_uuids.contains(&sidecar.enclave_uuid))
            && (self.service_uuids.is_empty() || self.service_uuids.contains(&sidecar.service_uuid))
            && (self.statuses.is_empty() || self.statuses.contains(&sidecar.status))
    }
}
