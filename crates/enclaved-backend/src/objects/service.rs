//! User services: the containers users run inside an enclave.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::objects::container::ContainerState;
use crate::objects::enclave::EnclaveUuid;
use crate::port_spec::PortSpec;

/// Human-oriented service identifier, unique within an enclave.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName(String);

impl ServiceName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique service identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceUuid(String);

impl ServiceUuid {
    #[must_use]
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    /// Generates a fresh random UUID (hex, no hyphens, name-safe).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A service registration: identity plus the enclave-network address
/// reserved for it before its container starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub name: ServiceName,
    pub uuid: ServiceUuid,
    pub enclave_uuid: EnclaveUuid,
    pub ip_addr: Ipv4Addr,
}

/// Configuration for starting a registered service's container.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub image: String,
    /// Private ports, keyed by port ID.
    pub private_ports: BTreeMap<String, PortSpec>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env_vars: BTreeMap<String, String>,
    /// Extra labels, namespaced under the custom-label prefix.
    pub user_labels: HashMap<String, String>,
}

impl ServiceConfig {
    /// A config with just an image; everything else empty.
    #[must_use]
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            private_ports: BTreeMap::new(),
            entrypoint: None,
            cmd: None,
            env_vars: BTreeMap::new(),
            user_labels: HashMap::new(),
        }
    }
}

/// A started user service.
#[derive(Debug, Clone)]
pub struct Service {
    pub registration: ServiceRegistration,
    /// Runtime container ID backing the service.
    pub container_id: String,
    pub status: ContainerState,
    /// Private ports recovered from the ports label.
    pub private_ports: BTreeMap<String, PortSpec>,
}

/// Filters for user-service operations. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilters {
    pub names: BTreeSet<ServiceName>,
    pub uuids: BTreeSet<ServiceUuid>,
    pub statuses: BTreeSet<ContainerState>,
}

impl ServiceFilters {
    #[must_use]
    pub fn by_uuid(uuid: ServiceUuid) -> Self {
        Self {
            names: BTreeSet::new(),
            uuids: BTreeSet::from([uuid]),
            statuses: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        (self.names.is_empty() || self.names.contains(&service.registration.name))
            && (self.uuids.is_empty() || self.uuids.contains(&service.registration.uuid))
            && (self.statuses.is_empty() || self.statuses.contains(&service.status))
    }
}
