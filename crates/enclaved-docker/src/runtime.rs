//! The `ContainerRuntime` trait: the engine's only view of the container runtime.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use ipnetwork::Ipv4Network;

use crate::args::CreateAndStartContainerArgs;
use crate::error::Result;
use crate::types::{Container, ExecResult, HostPortBinding, Network, Volume};

/// Result of a create-and-start call.
#[derive(Debug, Clone)]
pub struct StartedContainer {
    /// Runtime-assigned container ID.
    pub container_id: String,
    /// Host bindings for the ports that were published, keyed by `"<num>/<proto>"`.
    pub host_port_bindings: HashMap<String, HostPortBinding>,
}

/// Abstraction over a Docker-API-compatible container runtime.
///
/// This trait carries every runtime call the lifecycle engine makes,
/// allowing different implementations (a real Docker daemon via `bollard`,
/// an in-memory mock for testing). Label-based lookups treat the supplied
/// map as a conjunctive filter: an object matches when it carries every
/// given key with the given value.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a network with the given subnet, gateway, and labels,
    /// returning the runtime-assigned network ID.
    async fn create_network(
        &self,
        name: &str,
        subnet: Ipv4Network,
        gateway_ip: Ipv4Addr,
        labels: HashMap<String, String>,
    ) -> Result<String>;

    /// Lists every network known to the runtime, labeled or not.
    async fn list_networks(&self) -> Result<Vec<Network>>;

    /// Lists networks carrying all the given labels.
    async fn networks_by_labels(&self, labels: &HashMap<String, String>) -> Result<Vec<Network>>;

    /// Removes a network by ID.
    async fn remove_network(&self, network_id: &str) -> Result<()>;

    /// Connects a container to a network, optionally at a fixed address.
    async fn connect_container_to_network(
        &self,
        network_id: &str,
        container_id: &str,
        static_ip: Option<Ipv4Addr>,
    ) -> Result<()>;

    /// Disconnects a container from a network.
    async fn disconnect_container_from_network(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<()>;

    /// Creates a named volume with labels.
    async fn create_volume(&self, name: &str, labels: HashMap<String, String>) -> Result<()>;

    /// Lists volumes carrying all the given labels.
    async fn volumes_by_labels(&self, labels: &HashMap<String, String>) -> Result<Vec<Volume>>;

    /// Removes a volume by name.
    async fn remove_volume(&self, volume_name: &str) -> Result<()>;

    /// Creates a container and starts it, returning its ID and the host
    /// bindings of any published ports.
    async fn create_and_start_container(
        &self,
        args: &CreateAndStartContainerArgs,
    ) -> Result<StartedContainer>;

    /// Lists containers carrying all the given labels.
    async fn containers_by_labels(
        &self,
        labels: &HashMap<String, String>,
        include_stopped: bool,
    ) -> Result<Vec<Container>>;

    /// Lists containers attached to a network.
    async fn containers_by_network(
        &self,
        network_id: &str,
        include_stopped: bool,
    ) -> Result<Vec<Container>>;

    /// Returns the runtime's full inspect document for a container.
    async fn inspect_container(&self, container_id: &str) -> Result<serde_json::Value>;

    /// Kills a container (SIGKILL).
    async fn kill_container(&self, container_id: &str) -> Result<()>;

    /// Stops a container gracefully, force-killing after the timeout.
    async fn stop_container(&self, container_id: &str, timeout: Duration) -> Result<()>;

    /// Removes a (stopped or running) container.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Blocks until the container exits, returning its exit code.
    async fn wait_for_exit(&self, container_id: &str) -> Result<i64>;

    /// Runs a command inside a running container, capturing its output.
    async fn exec_command(&self, container_id: &str, command: &[String]) -> Result<ExecResult>;

    /// Returns the container's IPv4 address on the given network.
    async fn container_ip_on_network(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<Ipv4Addr>;

    /// Streams a container's logs. With `follow` the stream stays open
    /// until the container exits.
    async fn container_logs(
        &self,
        container_id: &str,
        follow: bool,
    ) -> Result<BoxStream<'static, Result<Bytes>>>;
}
