//! Logs-collector lifecycle: one collector per enclave, forwarding service
//! logs to the global aggregator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use enclaved_docker::{Container, CreateAndStartContainerArgsBuilder, Network};
use tracing::debug;

use crate::attributes::port_spec_serializer::deserialize_port_specs;
use crate::attributes::{
    CONTAINER_TYPE_LABEL_KEY, LOGS_COLLECTOR_TYPE_LABEL_VALUE,
    LOGS_COLLECTOR_VOLUME_TYPE_LABEL_VALUE, PORT_SPECS_LABEL_KEY, VOLUME_TYPE_LABEL_KEY,
};
use crate::backend::compensation::CompensationStack;
use crate::backend::consts::{
    LOGS_AGGREGATOR_HOST_ENV_VAR, LOGS_AGGREGATOR_PORT_ENV_VAR, LOGS_COLLECTOR_BUFFER_DIRPATH,
    LOGS_COLLECTOR_HTTP_PORT_ID, LOGS_COLLECTOR_HTTP_PORT_NUM, LOGS_COLLECTOR_NETWORK_ALIAS,
    LOGS_COLLECTOR_TCP_PORT_ID, LOGS_COLLECTOR_TCP_PORT_NUM,
};
use crate::backend::enclave::enclave_resource_labels;
use crate::backend::shared::{container_state_of, required_label, wait_for_port_availability};
use crate::backend::DockerBackend;
use crate::error::{BackendError, Result};
use crate::objects::container::ContainerState;
use crate::objects::enclave::EnclaveUuid;
use crate::objects::logs_collector::LogsCollector;
use crate::port_spec::{PortSpec, TransportProtocol};

fn logs_collector_search_labels(enclave_uuid: &EnclaveUuid) -> HashMap<String, String> {
    let mut labels = enclave_resource_labels(enclave_uuid);
    labels.insert(
        CONTAINER_TYPE_LABEL_KEY.as_str().to_string(),
        LOGS_COLLECTOR_TYPE_LABEL_VALUE.as_str().to_string(),
    );
    labels
}

impl DockerBackend {
    /// Creates the enclave's logs collector, or returns the existing one.
    ///
    /// Requires the global logs aggregator to be running: the collector is
    /// configured at startup with the aggregator's address.
    pub async fn create_logs_collector_for_enclave_idempotently(
        &self,
        enclave_uuid: &EnclaveUuid,
        image: &str,
    ) -> Result<LogsCollector> {
        if let Some(existing) = self.logs_collector_container(enclave_uuid).await? {
            debug!(%enclave_uuid, container_id = %existing.id, "logs collector already exists");
            return self.logs_collector_from_container(enclave_uuid, &existing).await;
        }

        let aggregator = self.get_logs_aggregator().await?.ok_or_else(|| {
            BackendError::not_found(
                "logs aggregator; it must be running before a collector can be created",
            )
        })?;
        let aggregator_ip = aggregator.maybe_private_ip.ok_or_else(|| {
            BackendError::not_found("logs aggregator address; the aggregator isn't running")
        })?;

        let enclave_network = self.enclave_network(enclave_uuid).await?;

        let enclave_attrs_provider = self.attrs_provider().for_enclave(enclave_uuid)?;

        let tcp_port = PortSpec::new(LOGS_COLLECTOR_TCP_PORT_NUM, TransportProtocol::Tcp)?;
        let http_port = PortSpec::new(LOGS_COLLECTOR_HTTP_PORT_NUM, TransportProtocol::Tcp)?
            .with_application_protocol("http");
        let container_attrs = enclave_attrs_provider.for_logs_collector(
            LOGS_COLLECTOR_TCP_PORT_ID,
            &tcp_port,
            LOGS_COLLECTOR_HTTP_PORT_ID,
            &http_port,
        )?;
        let volume_attrs = enclave_attrs_provider.for_logs_collector_volume()?;

        let mut compensation = CompensationStack::new();
        let result = self
            .provision_logs_collector(
                enclave_uuid,
                image,
                &enclave_network,
                &container_attrs,
                &volume_attrs,
                aggregator_ip.to_string(),
                aggregator.listening_port,
                &tcp_port,
                &http_port,
                &mut compensation,
            )
            .await;
        match result {
            Ok(collector) => {
                compensation.commit();
                Ok(collector)
            }
            Err(err) => {
                compensation.unwind().await;
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn provision_logs_collector(
        &self,
        enclave_uuid: &EnclaveUuid,
        image: &str,
        enclave_network: &Network,
        container_attrs: &crate::attributes::ObjectAttributes,
        volume_attrs: &crate::attributes::ObjectAttributes,
        aggregator_host: String,
        aggregator_port: u16,
        tcp_port: &PortSpec,
        http_port: &PortSpec,
        compensation: &mut CompensationStack,
    ) -> Result<LogsCollector> {
        let volume_name = volume_attrs.name().as_str().to_string();
        self.runtime()
            .create_volume(&volume_name, volume_attrs.label_strings())
            .await?;
        {
            let runtime = Arc::clone(self.runtime());
            let volume_name = volume_name.clone();
            compensation.push(format!("volume '{volume_name}'"), async move {
                runtime
                    .remove_volume(&volume_name)
                    .await
                    .map_err(BackendError::from)
            });
        }

        let env_vars = BTreeMap::from([
            (LOGS_AGGREGATOR_HOST_ENV_VAR.to_string(), aggregator_host),
            (
                LOGS_AGGREGATOR_PORT_ENV_VAR.to_string(),
                aggregator_port.to_string(),
            ),
        ]);
        let volume_mounts = BTreeMap::from([(
            volume_name,
            LOGS_COLLECTOR_BUFFER_DIRPATH.to_string(),
        )]);

        let args = CreateAndStartContainerArgsBuilder::new(
            image,
            container_attrs.name().as_str(),
            enclave_network.id.clone(),
        )
        .with_network_alias(LOGS_COLLECTOR_NETWORK_ALIAS)
        .with_env_vars(env_vars)
        .with_volume_mounts(volume_mounts)
        .with_labels(container_attrs.label_strings())
        .build();
        let started = self.runtime().create_and_start_container(&args).await?;
        {
            let runtime = Arc::clone(self.runtime());
            let container_id = started.container_id.clone();
            compensation.push(
                format!("logs collector container '{}'", started.container_id),
                async move {
                    runtime
                        .kill_container(&container_id)
                        .await
                        .map_err(BackendError::from)
                },
            );
        }

        wait_for_port_availability(
            self.runtime(),
            &started.container_id,
            http_port,
            self.config().availability_wait_max_retries,
            self.config().availability_wait_retry_delay,
        )
        .await?;

        let enclave_ip = self
            .runtime()
            .container_ip_on_network(&started.container_id, &enclave_network.id)
            .await?;

        Ok(LogsCollector {
            enclave_uuid: enclave_uuid.clone(),
            status: ContainerState::Running,
            maybe_enclave_ip: Some(enclave_ip),
            tcp_port: tcp_port.clone(),
            http_port: http_port.clone(),
        })
    }

    /// Returns the enclave's logs collector, or `None`.
    pub async fn get_logs_collector_for_enclave(
        &self,
        enclave_uuid: &EnclaveUuid,
    ) -> Result<Option<LogsCollector>> {
        match self.logs_collector_container(enclave_uuid).await? {
            Some(container) => Ok(Some(
                self.logs_collector_from_container(enclave_uuid, &container)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// Removes the enclave's logs collector container and its volume.
    pub async fn destroy_logs_collector_for_enclave(
        &self,
        enclave_uuid: &EnclaveUuid,
    ) -> Result<()> {
        if let Some(container) = self.logs_collector_container(enclave_uuid).await? {
            self.runtime().remove_container(&container.id).await?;
        }

        let mut volume_labels = enclave_resource_labels(enclave_uuid);
        volume_labels.insert(
            VOLUME_TYPE_LABEL_KEY.as_str().to_string(),
            LOGS_COLLECTOR_VOLUME_TYPE_LABEL_VALUE.as_str().to_string(),
        );
        for volume in self.runtime().volumes_by_labels(&volume_labels).await? {
            self.runtime().remove_volume(&volume.name).await?;
        }
        Ok(())
    }

    pub(crate) async fn enclave_network(&self, enclave_uuid: &EnclaveUuid) -> Result<Network> {
        let mut networks = self
            .runtime()
            .networks_by_labels(&enclave_resource_labels(enclave_uuid))
            .await?;
        match networks.len() {
            0 => Err(BackendError::not_found(format!(
                "network for enclave '{enclave_uuid}'"
            ))),
            1 => Ok(networks.remove(0)),
            n => Err(BackendError::internal(format!(
                "found {n} networks for enclave '{enclave_uuid}'; there should be exactly one"
            ))),
        }
    }

    async fn logs_collector_container(
        &self,
        enclave_uuid: &EnclaveUuid,
    ) -> Result<Option<Container>> {
        let mut matches = self
            .runtime()
            .containers_by_labels(&logs_collector_search_labels(enclave_uuid), true)
            .await?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            n => Err(BackendError::internal(format!(
                "found {n} logs collector containers for enclave '{enclave_uuid}'; there \
                 should only ever be one"
            ))),
        }
    }

    async fn logs_collector_from_container(
        &self,
        enclave_uuid: &EnclaveUuid,
        container: &Container,
    ) -> Result<LogsCollector> {
        let serialized_ports = required_label(container, PORT_SPECS_LABEL_KEY.as_str())?;
        let ports = deserialize_port_specs(serialized_ports)?;
        let tcp_port = ports.get(LOGS_COLLECTOR_TCP_PORT_ID).cloned().ok_or_else(|| {
            BackendError::internal(format!(
                "logs collector '{}' has no '{LOGS_COLLECTOR_TCP_PORT_ID}' port in its ports label",
                container.id
            ))
        })?;
        let http_port = ports.get(LOGS_COLLECTOR_HTTP_PORT_ID).cloned().ok_or_else(|| {
            BackendError::internal(format!(
                "logs collector '{}' has no '{LOGS_COLLECTOR_HTTP_PORT_ID}' port in its ports label",
                container.id
            ))
        })?;

        let status = container_state_of(container.status);
        let maybe_enclave_ip = match status {
            ContainerState::Running => {
                let network = self.enclave_network(enclave_uuid).await?;
                Some(
                    self.runtime()
                        .container_ip_on_network(&container.id, &network.id)
                        .await?,
                )
            }
            ContainerState::Stopped => None,
        };

        Ok(LogsCollector {
            enclave_uuid: enclave_uuid.clone(),
            status,
            maybe_enclave_ip,
            tcp_port,
            http_port,
        })
    }
}
