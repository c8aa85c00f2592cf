//! API-container lifecycle: the per-enclave control-plane container.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;

use enclaved_docker::{
    Container, CreateAndStartContainerArgsBuilder, PortPublishSpec, RestartPolicy,
};
use tracing::debug;

use crate::attributes::port_spec_serializer::deserialize_port_specs;
use crate::attributes::{
    API_CONTAINER_TYPE_LABEL_VALUE, APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE,
    CONTAINER_TYPE_LABEL_KEY, ENCLAVE_UUID_LABEL_KEY, PORT_SPECS_LABEL_KEY, PRIVATE_IP_LABEL_KEY,
};
use crate::backend::compensation::CompensationStack;
use crate::backend::consts::{
    API_CONTAINER_GRPC_PORT_ID, PRODUCTION_MODE_ENV_VAR, RUNTIME_SOCKET_FILEPATH,
};
use crate::backend::shared::{
    container_state_of, public_port_binding_for, required_label, wait_for_port_availability,
};
use crate::backend::DockerBackend;
use crate::error::{BackendError, Result};
use crate::free_ip_tracker::FreeIpTracker;
use crate::objects::api_container::{ApiContainer, ApiContainerFilters};
use crate::objects::container::ContainerState;
use crate::objects::enclave::EnclaveUuid;
use crate::operation_parallelizer::{run_in_parallel_for_domain_objects, OperationResults};
use crate::port_spec::{PortSpec, PortWaitConfig, TransportProtocol};

fn api_container_search_labels() -> HashMap<String, String> {
    // NOTE: no enclave-uuid label here; the runtime can't do disjunctive
    // search, so enclave filtering happens after the fetch.
    HashMap::from([
        (
            APP_ID_LABEL_KEY.as_str().to_string(),
            APP_ID_LABEL_VALUE.as_str().to_string(),
        ),
        (
            CONTAINER_TYPE_LABEL_KEY.as_str().to_string(),
            API_CONTAINER_TYPE_LABEL_VALUE.as_str().to_string(),
        ),
    ])
}

impl DockerBackend {
    /// Creates the enclave's API container.
    ///
    /// Refuses a second instance per enclave. The container gets a static
    /// address inside the enclave subnet (skipping the network address, the
    /// gateway, and the collector's and proxy's addresses), the runtime
    /// socket bind-mounted, the enclave data volume, and a
    /// restart-on-failure policy. Creation only commits once the gRPC port
    /// answers; a container that never becomes reachable is killed.
    pub async fn create_api_container(
        &self,
        image: &str,
        enclave_uuid: &EnclaveUuid,
        grpc_port_num: u16,
        enclave_data_volume_dirpath: &str,
        own_ip_address_env_var: &str,
        custom_env_vars: &BTreeMap<String, String>,
        is_production: bool,
    ) -> Result<ApiContainer> {
        debug!(%enclave_uuid, "creating the API container");

        let preexisting = self
            .get_api_containers(&ApiContainerFilters::by_enclave(enclave_uuid.clone()))
            .await?;
        if !preexisting.is_empty() {
            return Err(BackendError::already_exists(format!(
                "API container in enclave '{enclave_uuid}'"
            )));
        }

        let enclave_network = self.enclave_network(enclave_uuid).await?;
        let subnet = enclave_network.subnet.ok_or_else(|| {
            BackendError::internal(format!(
                "enclave network '{}' has no subnet configured",
                enclave_network.id
            ))
        })?;

        let enclave_data_volume = self.enclave_data_volume(enclave_uuid).await?;

        // Addresses already spoken for inside the subnet.
        let mut taken_ips = BTreeSet::from([subnet.network()]);
        if let Some(gateway_ip) = enclave_network.gateway_ip {
            taken_ips.insert(gateway_ip);
        }
        if let Some(collector) = self.get_logs_collector_for_enclave(enclave_uuid).await? {
            if let Some(collector_ip) = collector.maybe_enclave_ip {
                taken_ips.insert(collector_ip);
            }
        }
        if self.get_reverse_proxy().await?.is_some() {
            if let Ok(proxy_ip) = self
                .reverse_proxy_ip_on_network(&enclave_network.id)
                .await
            {
                taken_ips.insert(proxy_ip);
            }
        }

        let mut ip_tracker = FreeIpTracker::new(subnet, taken_ips);
        let private_ip = ip_tracker.get_free_ip_addr()?;

        if custom_env_vars.contains_key(own_ip_address_env_var) {
            return Err(BackendError::validation(format!(
                "requested own-IP environment variable '{own_ip_address_env_var}' conflicts \
                 with a custom environment variable"
            )));
        }
        let mut env_vars = custom_env_vars.clone();
        env_vars.insert(own_ip_address_env_var.to_string(), private_ip.to_string());
        if is_production {
            env_vars.insert(PRODUCTION_MODE_ENV_VAR.to_string(), "true".to_string());
        }

        let private_grpc_port = PortSpec::new(grpc_port_num, TransportProtocol::Tcp)?
            .with_application_protocol("grpc")
            .with_wait(PortWaitConfig::default());

        let enclave_attrs_provider = self.attrs_provider().for_enclave(enclave_uuid)?;
        let attrs = enclave_attrs_provider.for_api_container(
            private_ip,
            API_CONTAINER_GRPC_PORT_ID,
            &private_grpc_port,
        )?;

        let bind_mounts = BTreeMap::from([(
            RUNTIME_SOCKET_FILEPATH.to_string(),
            RUNTIME_SOCKET_FILEPATH.to_string(),
        )]);
        let volume_mounts = BTreeMap::from([(
            enclave_data_volume,
            enclave_data_volume_dirpath.to_string(),
        )]);
        let used_ports = BTreeMap::from([(
            private_grpc_port.runtime_port_key(),
            PortPublishSpec::Automatic,
        )]);

        let args = CreateAndStartContainerArgsBuilder::new(
            image,
            attrs.name().as_str(),
            enclave_network.id.clone(),
        )
        .with_env_vars(env_vars)
        .with_bind_mounts(bind_mounts)
        .with_volume_mounts(volume_mounts)
        .with_used_ports(used_ports)
        .with_static_ip(private_ip)
        .with_labels(attrs.label_strings())
        .with_restart_policy(RestartPolicy::OnFailure)
        .build();

        let started = self.runtime().create_and_start_container(&args).await?;

        let mut compensation = CompensationStack::new();
        {
            let runtime = Arc::clone(self.runtime());
            let container_id = started.container_id.clone();
            compensation.push(
                format!("API container '{}'", started.container_id),
                async move {
                    runtime
                        .kill_container(&container_id)
                        .await
                        .map_err(BackendError::from)
                },
            );
        }

        let wait_result = wait_for_port_availability(
            self.runtime(),
            &started.container_id,
            &private_grpc_port,
            self.config().availability_wait_max_retries,
            self.config().availability_wait_retry_delay,
        )
        .await;
        if let Err(err) = wait_result {
            compensation.unwind().await;
            return Err(err);
        }
        compensation.commit();
        debug!(%enclave_uuid, container_id = %started.container_id, "API container is available");

        let (public_ip, public_grpc_port) =
            match public_port_binding_for(&private_grpc_port, &started.host_port_bindings) {
                Ok((ip, port)) => (Some(ip), Some(port)),
                Err(_) => (None, None),
            };

        Ok(ApiContainer {
            enclave_uuid: enclave_uuid.clone(),
            status: ContainerState::Running,
            private_ip,
            private_grpc_port,
            public_ip,
            public_grpc_port,
        })
    }

    /// Returns API containers matching the filters, keyed by enclave UUID.
    pub async fn get_api_containers(
        &self,
        filters: &ApiContainerFilters,
    ) -> Result<BTreeMap<EnclaveUuid, ApiContainer>> {
        let matching = self.matching_api_containers(filters).await?;
        Ok(matching
            .into_values()
            .map(|api_container| (api_container.enclave_uuid.clone(), api_container))
            .collect())
    }

    /// Kills API containers matching the filters.
    pub async fn stop_api_containers(
        &self,
        filters: &ApiContainerFilters,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let matching = self.matching_api_containers(filters).await?;
        let runtime = Arc::clone(self.runtime());
        run_in_parallel_for_domain_objects(
            &matching,
            |api_container| api_container.enclave_uuid.clone(),
            move |container_id| {
                let runtime = Arc::clone(&runtime);
                async move {
                    runtime
                        .kill_container(&container_id)
                        .await
                        .map_err(BackendError::from)
                }
            },
        )
        .await
    }

    /// Removes API containers matching the filters.
    pub async fn destroy_api_containers(
        &self,
        filters: &ApiContainerFilters,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let matching = self.matching_api_containers(filters).await?;
        let runtime = Arc::clone(self.runtime());
        run_in_parallel_for_domain_objects(
            &matching,
            |api_container| api_container.enclave_uuid.clone(),
            move |container_id| {
                let runtime = Arc::clone(&runtime);
                async move {
                    runtime
                        .remove_container(&container_id)
                        .await
                        .map_err(BackendError::from)
                }
            },
        )
        .await
    }

    // Returns matching API containers keyed by their runtime container ID.
    async fn matching_api_containers(
        &self,
        filters: &ApiContainerFilters,
    ) -> Result<BTreeMap<String, ApiContainer>> {
        let containers = self
            .runtime()
            .containers_by_labels(&api_container_search_labels(), true)
            .await?;

        let mut result = BTreeMap::new();
        for container in containers {
            let api_container = api_container_from_container(&container)?;
            if !filters.matches(&api_container) {
                continue;
            }
            result.insert(container.id.clone(), api_container);
        }
        Ok(result)
    }

    async fn enclave_data_volume(&self, enclave_uuid: &EnclaveUuid) -> Result<String> {
        use crate::attributes::{ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE, VOLUME_TYPE_LABEL_KEY};
        use crate::backend::enclave::enclave_resource_labels;

        let mut labels = enclave_resource_labels(enclave_uuid);
        labels.insert(
            VOLUME_TYPE_LABEL_KEY.as_str().to_string(),
            ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE.as_str().to_string(),
        );
        let mut volumes = self.runtime().volumes_by_labels(&labels).await?;
        match volumes.len() {
            0 => Err(BackendError::not_found(format!(
                "data volume for enclave '{enclave_uuid}'"
            ))),
            1 => Ok(volumes.remove(0).name),
            n => Err(BackendError::internal(format!(
                "found {n} data volumes for enclave '{enclave_uuid}'; there should be exactly one"
            ))),
        }
    }

    async fn reverse_proxy_ip_on_network(&self, network_id: &str) -> Result<Ipv4Addr> {
        let proxy = self
            .runtime()
            .containers_by_labels(
                &HashMap::from([
                    (
                        APP_ID_LABEL_KEY.as_str().to_string(),
                        APP_ID_LABEL_VALUE.as_str().to_string(),
                    ),
                    (
                        CONTAINER_TYPE_LABEL_KEY.as_str().to_string(),
                        crate::attributes::REVERSE_PROXY_TYPE_LABEL_VALUE
                            .as_str()
                            .to_string(),
                    ),
                ]),
                false,
            )
            .await?;
        let container = proxy
            .first()
            .ok_or_else(|| BackendError::not_found("running reverse proxy container"))?;
        Ok(self
            .runtime()
            .container_ip_on_network(&container.id, network_id)
            .await?)
    }
}

fn api_container_from_container(container: &Container) -> Result<ApiContainer> {
    let enclave_uuid = EnclaveUuid::new(required_label(
        container,
        ENCLAVE_UUID_LABEL_KEY.as_str(),
    )?);

    let private_ip: Ipv4Addr = required_label(container, PRIVATE_IP_LABEL_KEY.as_str())?
        .parse()
        .map_err(|_| {
            BackendError::internal(format!(
                "couldn't parse the private IP label of API container '{}'",
                container.id
            ))
        })?;

    let serialized_ports = required_label(container, PORT_SPECS_LABEL_KEY.as_str())?;
    let ports = deserialize_port_specs(serialized_ports)?;
    let private_grpc_port = ports
        .get(API_CONTAINER_GRPC_PORT_ID)
        .cloned()
        .ok_or_else(|| {
            BackendError::internal(format!(
                "no '{API_CONTAINER_GRPC_PORT_ID}' port found in the ports label of API \
                 container '{}'",
                container.id
            ))
        })?;

    let status = container_state_of(container.status);
    let (public_ip, public_grpc_port) = if status == ContainerState::Running {
        match public_port_binding_for(&private_grpc_port, &container.host_port_bindings) {
            Ok((ip, port)) => (Some(ip), Some(port)),
            Err(_) => (None, None),
        }
    } else {
        (None, None)
    };

    Ok(ApiContainer {
        enclave_uuid,
        status,
        private_ip,
        private_grpc_port,
        public_ip,
        public_grpc_port,
    })
}
