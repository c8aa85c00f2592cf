//! Domain objects the lifecycle engine creates, discovers, and destroys.

pub mod api_container;
pub mod container;
pub mod enclave;
pub mod logs_aggregator;
pub mod logs_collector;
pub mod networking_sidecar;
pub mod reverse_proxy;
pub mod service;

pub use api_container::{ApiContainer, ApiContainerFilters};
pub use container::ContainerState;
pub use enclave::{Enclave, EnclaveFilters, EnclaveStatus, EnclaveUuid};
pub use logs_aggregator::LogsAggregator;
pub use logs_collector::LogsCollector;
pub use networking_sidecar::{NetworkingSidecar, NetworkingSidecarFilters};
pub use reverse_proxy::ReverseProxy;
pub use service::{
    Service, ServiceConfig, ServiceFilters, ServiceName, ServiceRegistration, ServiceUuid,
};
