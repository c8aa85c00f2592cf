//! `ContainerRuntime` implementation backed by a Docker Engine daemon.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, NetworkingConfig, RemoveContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    EndpointIpamConfig, EndpointSettings, HostConfig, Ipam, IpamConfig, PortBinding,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, ListNetworksOptions,
};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use ipnetwork::Ipv4Network;
use tracing::{debug, warn};

use crate::args::{CreateAndStartContainerArgs, PortPublishSpec, RestartPolicy};
use crate::error::{Result, RuntimeError};
use crate::runtime::{ContainerRuntime, StartedContainer};
use crate::types::{Container, ContainerStatus, ExecResult, HostPortBinding, Network, Volume};

const LABEL_FILTER_KEY: &str = "label";
const NETWORK_DRIVER: &str = "bridge";

/// Docker Engine client implementing [`ContainerRuntime`].
///
/// A thin translation layer: every method is one (occasionally two) daemon
/// calls plus conversion into the runtime-object types. No state is kept
/// here; the daemon's label store is the system of record.
pub struct DockerRuntimeClient {
    docker: Docker,
}

impl DockerRuntimeClient {
    /// Connects to the local daemon using the environment's defaults
    /// (`DOCKER_HOST` or the platform socket).
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Wraps an already-connected `bollard` handle.
    #[must_use]
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pulls the image when the daemon doesn't have it locally.
    ///
    /// Pull failures for an image that exists locally are downgraded to a
    /// warning so an unreachable registry doesn't block container creation.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        debug!(image, "image not present locally; pulling");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull_stream.next().await {
            progress?;
        }
        Ok(())
    }

    async fn host_port_bindings_of(
        &self,
        container_id: &str,
    ) -> Result<HashMap<String, HostPortBinding>> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        let mut result = HashMap::new();
        let Some(ports) = inspect.network_settings.and_then(|s| s.ports) else {
            return Ok(result);
        };
        for (port_key, maybe_bindings) in ports {
            let Some(bindings) = maybe_bindings else {
                continue;
            };
            // Prefer the IPv4 wildcard binding; daemons dual-report "::".
            for binding in bindings {
                let Some(binding) = parse_host_port_binding(&binding) else {
                    continue;
                };
                result.insert(port_key.clone(), binding);
                break;
            }
        }
        Ok(result)
    }
}

fn parse_host_port_binding(binding: &PortBinding) -> Option<HostPortBinding> {
    let host_ip = match binding.host_ip.as_deref() {
        None | Some("") => Ipv4Addr::UNSPECIFIED,
        Some(raw) => raw.parse().ok()?,
    };
    let host_port = binding.host_port.as_deref()?.parse().ok()?;
    Some(HostPortBinding { host_ip, host_port })
}

fn label_filters(labels: &HashMap<String, String>) -> HashMap<String, Vec<String>> {
    let pairs = labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    HashMap::from([(LABEL_FILTER_KEY.to_string(), pairs)])
}

fn network_from_model(model: bollard::models::Network) -> Result<Network> {
    let id = model
        .id
        .ok_or_else(|| RuntimeError::malformed("network without an ID"))?;
    let name = model.name.unwrap_or_default();
    let mut subnet = None;
    let mut gateway_ip = None;
    if let Some(configs) = model.ipam.and_then(|ipam| ipam.config) {
        for config in configs {
            if let Some(raw_subnet) = config.subnet {
                // Ignore IPv6 pools; only IPv4 subnets participate in allocation.
                if let Ok(parsed) = raw_subnet.parse::<Ipv4Network>() {
                    subnet = Some(parsed);
                    gateway_ip = config.gateway.and_then(|g| g.parse().ok());
                    break;
                }
            }
        }
    }
    Ok(Network {
        id,
        name,
        subnet,
        gateway_ip,
        labels: model.labels.unwrap_or_default(),
    })
}

fn container_from_summary(summary: bollard::models::ContainerSummary) -> Result<Container> {
    let id = summary
        .id
        .ok_or_else(|| RuntimeError::malformed("container without an ID"))?;
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let status = summary
        .state
        .ok_or_else(|| RuntimeError::malformed(format!("container '{id}' without a state")))?
        .parse::<ContainerStatus>()?;

    let mut host_port_bindings = HashMap::new();
    for port in summary.ports.unwrap_or_default() {
        let Some(public_port) = port.public_port else {
            continue;
        };
        let proto = match port.typ {
            Some(bollard::models::PortTypeEnum::UDP) => "udp",
            _ => "tcp",
        };
        let host_ip = port
            .ip
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        host_port_bindings.insert(
            format!("{}/{}", port.private_port, proto),
            HostPortBinding {
                host_ip,
                host_port: public_port as u16,
            },
        );
    }

    Ok(Container {
        id,
        name,
        status,
        labels: summary.labels.unwrap_or_default(),
        host_port_bindings,
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntimeClient {
    async fn create_network(
        &self,
        name: &str,
        subnet: Ipv4Network,
        gateway_ip: Ipv4Addr,
        labels: HashMap<String, String>,
    ) -> Result<String> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            driver: NETWORK_DRIVER.to_string(),
            ipam: Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(subnet.to_string()),
                    gateway: Some(gateway_ip.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            labels,
            ..Default::default()
        };
        let response = self.docker.create_network(options).await?;
        response
            .id
            .ok_or_else(|| RuntimeError::malformed("network create response without an ID"))
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        let models = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;
        models.into_iter().map(network_from_model).collect()
    }

    async fn networks_by_labels(&self, labels: &HashMap<String, String>) -> Result<Vec<Network>> {
        let options = ListNetworksOptions {
            filters: label_filters(labels),
        };
        let models = self.docker.list_networks(Some(options)).await?;
        models.into_iter().map(network_from_model).collect()
    }

    async fn remove_network(&self, network_id: &str) -> Result<()> {
        self.docker.remove_network(network_id).await?;
        Ok(())
    }

    async fn connect_container_to_network(
        &self,
        network_id: &str,
        container_id: &str,
        static_ip: Option<Ipv4Addr>,
    ) -> Result<()> {
        let endpoint_config = EndpointSettings {
            ipam_config: static_ip.map(|ip| EndpointIpamConfig {
                ipv4_address: Some(ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = ConnectNetworkOptions {
            container: container_id.to_string(),
            endpoint_config,
        };
        self.docker.connect_network(network_id, options).await?;
        Ok(())
    }

    async fn disconnect_container_from_network(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<()> {
        let options = DisconnectNetworkOptions {
            container: container_id.to_string(),
            force: false,
        };
        self.docker.disconnect_network(network_id, options).await?;
        Ok(())
    }

    async fn create_volume(&self, name: &str, labels: HashMap<String, String>) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels,
            ..Default::default()
        };
        self.docker.create_volume(options).await?;
        Ok(())
    }

    async fn volumes_by_labels(&self, labels: &HashMap<String, String>) -> Result<Vec<Volume>> {
        let options = ListVolumesOptions {
            filters: label_filters(labels),
        };
        let response = self.docker.list_volumes(Some(options)).await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| Volume {
                name: v.name,
                labels: v.labels,
            })
            .collect())
    }

    async fn remove_volume(&self, volume_name: &str) -> Result<()> {
        self.docker
            .remove_volume(volume_name, None::<RemoveVolumeOptions>)
            .await?;
        Ok(())
    }

    async fn create_and_start_container(
        &self,
        args: &CreateAndStartContainerArgs,
    ) -> Result<StartedContainer> {
        if let Err(err) = self.ensure_image(&args.image).await {
            warn!(image = %args.image, %err, "image pull failed; relying on a local copy");
        }

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut wants_published_ports = false;
        for (port_key, publish_spec) in &args.used_ports {
            exposed_ports.insert(port_key.clone(), HashMap::new());
            match publish_spec {
                PortPublishSpec::NoPublish => {}
                PortPublishSpec::Automatic => {
                    wants_published_ports = true;
                    port_bindings.insert(
                        port_key.clone(),
                        Some(vec![PortBinding {
                            host_ip: None,
                            host_port: None,
                        }]),
                    );
                }
                PortPublishSpec::Manual(host_port) => {
                    wants_published_ports = true;
                    port_bindings.insert(
                        port_key.clone(),
                        Some(vec![PortBinding {
                            host_ip: None,
                            host_port: Some(host_port.to_string()),
                        }]),
                    );
                }
            }
        }

        let mut binds: Vec<String> = args
            .bind_mounts
            .iter()
            .map(|(host_path, container_path)| format!("{host_path}:{container_path}"))
            .collect();
        binds.extend(
            args.volume_mounts
                .iter()
                .map(|(volume_name, container_path)| format!("{volume_name}:{container_path}")),
        );

        let restart_policy = match args.restart_policy {
            RestartPolicy::No => None,
            RestartPolicy::OnFailure => Some(DockerRestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: None,
            }),
        };

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            cap_add: if args.capabilities.is_empty() {
                None
            } else {
                Some(args.capabilities.clone())
            },
            security_opt: if args.security_opts.is_empty() {
                None
            } else {
                Some(args.security_opts.clone())
            },
            restart_policy,
            ..Default::default()
        };

        let endpoint_settings = EndpointSettings {
            ipam_config: args.static_ip.map(|ip| EndpointIpamConfig {
                ipv4_address: Some(ip.to_string()),
                ..Default::default()
            }),
            aliases: args.network_alias.clone().map(|alias| vec![alias]),
            ..Default::default()
        };

        let config = Config {
            image: Some(args.image.clone()),
            entrypoint: args.entrypoint.clone(),
            cmd: args.cmd.clone(),
            env: Some(
                args.env_vars
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect(),
            ),
            labels: Some(args.labels.clone()),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            networking_config: Some(NetworkingConfig {
                endpoints_config: HashMap::from([(
                    args.network_id.clone(),
                    endpoint_settings,
                )]),
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: args.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;
        let container_id = created.id;

        self.docker
            .start_container::<String>(&container_id, None)
            .await?;

        let host_port_bindings = if wants_published_ports {
            self.host_port_bindings_of(&container_id).await?
        } else {
            HashMap::new()
        };

        debug!(container_id, name = %args.name, "container created and started");
        Ok(StartedContainer {
            container_id,
            host_port_bindings,
        })
    }

    async fn containers_by_labels(
        &self,
        labels: &HashMap<String, String>,
        include_stopped: bool,
    ) -> Result<Vec<Container>> {
        let options = ListContainersOptions {
            all: include_stopped,
            filters: label_filters(labels),
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;
        summaries.into_iter().map(container_from_summary).collect()
    }

    async fn containers_by_network(
        &self,
        network_id: &str,
        include_stopped: bool,
    ) -> Result<Vec<Container>> {
        let filters = HashMap::from([(
            "network".to_string(),
            vec![network_id.to_string()],
        )]);
        let options = ListContainersOptions {
            all: include_stopped,
            filters,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;
        summaries.into_iter().map(container_from_summary).collect()
    }

    async fn inspect_container(&self, container_id: &str) -> Result<serde_json::Value> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        serde_json::to_value(inspect)
            .map_err(|err| RuntimeError::malformed(format!("inspect serialization: {err}")))
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .kill_container(container_id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await?;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(container_id, Some(options))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        Ok(())
    }

    async fn wait_for_exit(&self, container_id: &str) -> Result<i64> {
        let mut wait_stream = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>);
        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Nonzero exits surface as a dedicated error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(err.into()),
            None => Err(RuntimeError::malformed(format!(
                "wait stream for container '{container_id}' ended without a status"
            ))),
        }
    }

    async fn exec_command(&self, container_id: &str, command: &[String]) -> Result<ExecResult> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut collected = Vec::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = output.next().await {
                collected.extend_from_slice(&chunk?.into_bytes());
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.ok_or_else(|| {
            RuntimeError::malformed(format!(
                "exec in container '{container_id}' finished without an exit code"
            ))
        })?;

        Ok(ExecResult {
            exit_code,
            output: String::from_utf8_lossy(&collected).into_owned(),
        })
    }

    async fn container_ip_on_network(
        &self,
        container_id: &str,
        network_id: &str,
    ) -> Result<Ipv4Addr> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        let networks = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default();
        for (network_name, endpoint) in networks {
            let matches_id = endpoint.network_id.as_deref() == Some(network_id);
            if !matches_id && network_name != network_id {
                continue;
            }
            let raw_ip = endpoint.ip_address.unwrap_or_default();
            return raw_ip.parse().map_err(|_| {
                RuntimeError::malformed(format!(
                    "container '{container_id}' has unparseable IP '{raw_ip}' on network '{network_id}'"
                ))
            });
        }
        Err(RuntimeError::not_found(format!(
            "container '{container_id}' is not attached to network '{network_id}'"
        )))
    }

    async fn container_logs(
        &self,
        container_id: &str,
        follow: bool,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow,
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(container_id, Some(options))
            .map(|item| item.map(LogOutput::into_bytes).map_err(RuntimeError::from));
        Ok(stream.boxed())
    }
}
