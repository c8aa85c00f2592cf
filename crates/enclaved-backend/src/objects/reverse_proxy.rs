//! The global reverse-proxy container.

use crate::objects::container::ContainerState;

/// The single reverse proxy fronting enclave services. Connected to each
/// enclave network at enclave creation and disconnected at destruction.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    pub status: ContainerState,
    /// Port the proxy listens for HTTP traffic on.
    pub http_port: u16,
}
