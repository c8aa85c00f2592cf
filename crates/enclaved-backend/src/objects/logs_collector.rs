//! The per-enclave logs-collector container.

use std::net::Ipv4Addr;

use crate::objects::container::ContainerState;
use crate::objects::enclave::EnclaveUuid;
use crate::port_spec::PortSpec;

/// The logs collector attached to one enclave network, forwarding service
/// logs to the global aggregator.
#[derive(Debug, Clone)]
pub struct LogsCollector {
    pub enclave_uuid: EnclaveUuid,
    pub status: ContainerState,
    /// Address inside the enclave network; populated while running.
    pub maybe_enclave_ip: Option<Ipv4Addr>,
    /// Log-forwarding ingest port.
    pub tcp_port: PortSpec,
    /// Health/metrics port.
    pub http_port: PortSpec,
}
