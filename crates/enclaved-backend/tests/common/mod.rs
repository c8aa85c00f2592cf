//! In-memory `ContainerRuntime` for exercising the lifecycle engine
//! without a daemon, plus failure-injection knobs for the tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use enclaved_backend::{BackendConfig, DockerBackend};
use enclaved_docker::args::PortPublishSpec;
use enclaved_docker::{
    Container, ContainerRuntime, ContainerStatus, CreateAndStartContainerArgs, ExecResult,
    HostPortBinding, Network, RuntimeError, StartedContainer, Volume,
};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use ipnetwork::Ipv4Network;

const OVERLAP_ERR_TEXT: &str = "Pool overlaps with other one on this address space";

#[derive(Clone)]
struct MockContainer {
    container: Container,
    env_vars: BTreeMap<String, String>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    next_host_port: u16,
    networks: BTreeMap<String, Network>,
    volumes: BTreeMap<String, Volume>,
    containers: BTreeMap<String, MockContainer>,
    // network id -> container id -> ip
    attachments: BTreeMap<String, BTreeMap<String, Ipv4Addr>>,
}

/// An in-memory Docker-ish runtime with label search, endpoint tracking,
/// and failure injection.
pub struct MockRuntime {
    state: Mutex<MockState>,
    /// Makes the next N create_network calls fail with the daemon's
    /// overlapping-pool text.
    pub overlap_failures_remaining: AtomicUsize,
    /// Injected fatal error message for create_network.
    pub network_create_error: Mutex<Option<String>>,
    /// Makes create_volume fail.
    pub fail_volume_creation: AtomicBool,
    /// Containers carrying this (key, value) label fail removal.
    pub fail_container_removal_label: Mutex<Option<(String, String)>>,
    /// Exit code returned by every exec (0 = ports report available).
    pub exec_exit_code: AtomicI64,
    /// Number of create_network calls observed.
    pub network_create_calls: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                next_host_port: 49000,
                ..Default::default()
            }),
            overlap_failures_remaining: AtomicUsize::new(0),
            network_create_error: Mutex::new(None),
            fail_volume_creation: AtomicBool::new(false),
            fail_container_removal_label: Mutex::new(None),
            exec_exit_code: AtomicI64::new(0),
            network_create_calls: AtomicUsize::new(0),
        })
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().unwrap().networks.len()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().unwrap().volumes.len()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn networks(&self) -> Vec<Network> {
        self.state.lock().unwrap().networks.values().cloned().collect()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.state.lock().unwrap().volumes.values().cloned().collect()
    }

    pub fn containers(&self) -> Vec<Container> {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .map(|mock| mock.container.clone())
            .collect()
    }

    pub fn container_status(&self, container_id: &str) -> Option<ContainerStatus> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(container_id)
            .map(|mock| mock.container.status)
    }

    pub fn set_container_status(&self, container_id: &str, status: ContainerStatus) {
        if let Some(mock) = self
            .state
            .lock()
            .unwrap()
            .containers
            .get_mut(container_id)
        {
            mock.container.status = status;
        }
    }

    pub fn is_attached(&self, network_id: &str, container_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(network_id)
            .is_some_and(|endpoints| endpoints.contains_key(container_id))
    }

    fn labels_match(labels: &HashMap<String, String>, filter: &HashMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    fn allocate_attachment_ip(state: &MockState, network_id: &str) -> Ipv4Addr {
        let used = state
            .attachments
            .get(network_id)
            .map(BTreeMap::len)
            .unwrap_or(0) as u32;
        match state.networks.get(network_id).and_then(|n| n.subnet) {
            Some(subnet) => Ipv4Addr::from(u32::from(subnet.network()) + 2 + used),
            // Bridge-style fallback for networks the mock never created.
            None => Ipv4Addr::from(u32::from(Ipv4Addr::new(172, 17, 0, 2)) + used),
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_network(
        &self,
        name: &str,
        subnet: Ipv4Network,
        gateway_ip: Ipv4Addr,
        labels: HashMap<String, String>,
    ) -> Result<String, RuntimeError> {
        self.network_create_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.network_create_error.lock().unwrap().clone() {
            return Err(RuntimeError::Api(message));
        }
        if self
            .overlap_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RuntimeError::Api(OVERLAP_ERR_TEXT.to_string()));
        }

        let mut state = self.state.lock().unwrap();
        let genuinely_overlaps = state.networks.values().any(|network| {
            network.subnet.is_some_and(|used| {
                used.contains(subnet.network()) || subnet.contains(used.network())
            })
        });
        if genuinely_overlaps {
            return Err(RuntimeError::Api(OVERLAP_ERR_TEXT.to_string()));
        }

        state.next_id += 1;
        let network_id = format!("net-{}", state.next_id);
        state.networks.insert(
            network_id.clone(),
            Network {
                id: network_id.clone(),
                name: name.to_string(),
                subnet: Some(subnet),
                gateway_ip: Some(gateway_ip),
                labels,
            },
        );
        Ok(network_id)
    }

    async fn list_networks(&self) -> Result<Vec<Network>, RuntimeError> {
        Ok(self.networks())
    }

    async fn networks_by_labels(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<Network>, RuntimeError> {
        Ok(self
            .networks()
            .into_iter()
            .filter(|network| Self::labels_match(&network.labels, labels))
            .collect())
    }

    async fn remove_network(&self, network_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state
            .attachments
            .get(network_id)
            .is_some_and(|endpoints| !endpoints.is_empty())
        {
            return Err(RuntimeError::Api(format!(
                "network {network_id} has active endpoints"
            )));
        }
        state
            .networks
            .remove(network_id)
            .ok_or_else(|| RuntimeError::not_found(format!("network '{network_id}'")))?;
        state.attachments.remove(network_id);
        Ok(())
    }

    async fn connect_container_to_network(
        &self,
        network_id: &str,
        container_id: &str,
        static_ip: Option<Ipv4Addr>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let ip = static_ip.unwrap_or_else(|| Self::allocate_attachment_ip(&state, network_id));
        state
            .attachments
            .entry(network_id.to_string())
            .or_default()
            .insert(container_id.to_string(), ip);
        Ok(())
    }

    async fn disconnect_container_from_network(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if let Some(endpoints) = state.attachments.get_mut(network_id) {
            endpoints.remove(container_id);
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<(), RuntimeError> {
        if self.fail_volume_creation.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api("volume creation failed (injected)".to_string()));
        }
        self.state.lock().unwrap().volumes.insert(
            name.to_string(),
            Volume {
                name: name.to_string(),
                labels,
            },
        );
        Ok(())
    }

    async fn volumes_by_labels(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<Volume>, RuntimeError> {
        Ok(self
            .volumes()
            .into_iter()
            .filter(|volume| Self::labels_match(&volume.labels, labels))
            .collect())
    }

    async fn remove_volume(&self, volume_name: &str) -> Result<(), RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .remove(volume_name)
            .ok_or_else(|| RuntimeError::not_found(format!("volume '{volume_name}'")))?;
        Ok(())
    }

    async fn create_and_start_container(
        &self,
        args: &CreateAndStartContainerArgs,
    ) -> Result<StartedContainer, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let container_id = format!("container-{}", state.next_id);

        let mut host_port_bindings = HashMap::new();
        for (port_key, publish_spec) in &args.used_ports {
            let host_port = match publish_spec {
                PortPublishSpec::NoPublish => continue,
                PortPublishSpec::Automatic => {
                    state.next_host_port += 1;
                    state.next_host_port
                }
                PortPublishSpec::Manual(port) => *port,
            };
            host_port_bindings.insert(
                port_key.clone(),
                HostPortBinding {
                    host_ip: Ipv4Addr::UNSPECIFIED,
                    host_port,
                },
            );
        }

        let ip = args
            .static_ip
            .unwrap_or_else(|| Self::allocate_attachment_ip(&state, &args.network_id));
        state
            .attachments
            .entry(args.network_id.clone())
            .or_default()
            .insert(container_id.clone(), ip);

        state.containers.insert(
            container_id.clone(),
            MockContainer {
                container: Container {
                    id: container_id.clone(),
                    name: args.name.clone(),
                    status: ContainerStatus::Running,
                    labels: args.labels.clone(),
                    host_port_bindings: host_port_bindings.clone(),
                },
                env_vars: args.env_vars.clone(),
            },
        );

        Ok(StartedContainer {
            container_id,
            host_port_bindings,
        })
    }

    async fn containers_by_labels(
        &self,
        labels: &HashMap<String, String>,
        include_stopped: bool,
    ) -> Result<Vec<Container>, RuntimeError> {
        Ok(self
            .containers()
            .into_iter()
            .filter(|container| Self::labels_match(&container.labels, labels))
            .filter(|container| {
                include_stopped || container.status == ContainerStatus::Running
            })
            .collect())
    }

    async fn containers_by_network(
        &self,
        network_id: &str,
        include_stopped: bool,
    ) -> Result<Vec<Container>, RuntimeError> {
        let state = self.state.lock().unwrap();
        let Some(endpoints) = state.attachments.get(network_id) else {
            return Ok(Vec::new());
        };
        Ok(endpoints
            .keys()
            .filter_map(|container_id| state.containers.get(container_id))
            .map(|mock| mock.container.clone())
            .filter(|container| {
                include_stopped || container.status == ContainerStatus::Running
            })
            .collect())
    }

    async fn inspect_container(
        &self,
        container_id: &str,
    ) -> Result<serde_json::Value, RuntimeError> {
        let state = self.state.lock().unwrap();
        let mock = state
            .containers
            .get(container_id)
            .ok_or_else(|| RuntimeError::not_found(format!("container '{container_id}'")))?;
        let env: Vec<String> = mock
            .env_vars
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        Ok(serde_json::json!({
            "Id": mock.container.id,
            "Name": format!("/{}", mock.container.name),
            "Config": {
                "Env": env,
                "Labels": mock.container.labels,
            },
            "State": { "Status": mock.container.status.to_string() },
        }))
    }

    async fn kill_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let mock = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| RuntimeError::not_found(format!("container '{container_id}'")))?;
        mock.container.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn stop_container(
        &self,
        container_id: &str,
        _timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.kill_container(container_id).await
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        let fail_label = self.fail_container_removal_label.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        if let Some((key, value)) = fail_label {
            let matches = state
                .containers
                .get(container_id)
                .is_some_and(|mock| mock.container.labels.get(&key) == Some(&value));
            if matches {
                return Err(RuntimeError::Api(format!(
                    "removal of container {container_id} failed (injected)"
                )));
            }
        }
        state
            .containers
            .remove(container_id)
            .ok_or_else(|| RuntimeError::not_found(format!("container '{container_id}'")))?;
        for endpoints in state.attachments.values_mut() {
            endpoints.remove(container_id);
        }
        Ok(())
    }

    async fn wait_for_exit(&self, _container_id: &str) -> Result<i64, RuntimeError> {
        Ok(0)
    }

    async fn exec_command(
        &self,
        container_id: &str,
        _command: &[String],
    ) -> Result<ExecResult, RuntimeError> {
        let state = self.state.lock().unwrap();
        if !state.containers.contains_key(container_id) {
            return Err(RuntimeError::not_found(format!(
                "container '{container_id}'"
            )));
        }
        Ok(ExecResult {
            exit_code: self.exec_exit_code.load(Ordering::SeqCst),
            output: String::new(),
        })
    }

    async fn container_ip_on_network(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<Ipv4Addr, RuntimeError> {
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(network_id)
            .and_then(|endpoints| endpoints.get(container_id))
            .copied()
            .ok_or_else(|| {
                RuntimeError::not_found(format!(
                    "container '{container_id}' on network '{network_id}'"
                ))
            })
    }

    async fn container_logs(
        &self,
        _container_id: &str,
        _follow: bool,
    ) -> Result<BoxStream<'static, Result<Bytes, RuntimeError>>, RuntimeError> {
        Ok(stream::iter(vec![Ok(Bytes::from_static(b"mock log line\n"))]).boxed())
    }
}

/// Retry tunables small enough for tests.
pub fn fast_config() -> BackendConfig {
    BackendConfig {
        network_allocation_max_retries: 3,
        network_allocation_retry_delay: Duration::from_millis(5),
        availability_wait_max_retries: 3,
        availability_wait_retry_delay: Duration::from_millis(5),
    }
}

/// An engine over the given mock with fast retries.
pub fn backend_over(runtime: &Arc<MockRuntime>) -> DockerBackend {
    DockerBackend::with_config(
        Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
        fast_config(),
    )
}
