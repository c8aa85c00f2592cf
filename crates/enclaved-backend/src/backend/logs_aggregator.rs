//! Logs-aggregator lifecycle: the single sink all enclave logs flow to.

use std::collections::HashMap;
use std::sync::Arc;

use enclaved_docker::{Container, CreateAndStartContainerArgsBuilder};
use tracing::debug;

use crate::attributes::{
    APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE, CONTAINER_TYPE_LABEL_KEY,
    LOGS_AGGREGATOR_TYPE_LABEL_VALUE,
};
use crate::backend::compensation::CompensationStack;
use crate::backend::consts::{BRIDGE_NETWORK_NAME, LOGS_AGGREGATOR_LISTENING_PORT_NUM};
use crate::backend::shared::{container_state_of, wait_for_port_availability};
use crate::backend::DockerBackend;
use crate::error::{BackendError, Result};
use crate::objects::container::ContainerState;
use crate::objects::logs_aggregator::LogsAggregator;
use crate::port_spec::{PortSpec, TransportProtocol};

fn logs_aggregator_search_labels() -> HashMap<String, String> {
    HashMap::from([
        (
            APP_ID_LABEL_KEY.as_str().to_string(),
            APP_ID_LABEL_VALUE.as_str().to_string(),
        ),
        (
            CONTAINER_TYPE_LABEL_KEY.as_str().to_string(),
            LOGS_AGGREGATOR_TYPE_LABEL_VALUE.as_str().to_string(),
        ),
    ])
}

impl DockerBackend {
    /// Creates the logs aggregator, or returns the existing one.
    pub async fn create_logs_aggregator_idempotently(&self, image: &str) -> Result<LogsAggregator> {
        if let Some(existing) = self.logs_aggregator_container().await? {
            debug!(container_id = %existing.id, "logs aggregator already exists");
            return self.logs_aggregator_from_container(&existing).await;
        }

        let attrs = self.attrs_provider().for_logs_aggregator()?;
        let args = CreateAndStartContainerArgsBuilder::new(
            image,
            attrs.name().as_str(),
            BRIDGE_NETWORK_NAME,
        )
        .with_labels(attrs.label_strings())
        .build();
        let started = self.runtime().create_and_start_container(&args).await?;

        let mut compensation = CompensationStack::new();
        {
            let runtime = Arc::clone(self.runtime());
            let container_id = started.container_id.clone();
            compensation.push(
                format!("logs aggregator container '{}'", started.container_id),
                async move {
                    runtime
                        .kill_container(&container_id)
                        .await
                        .map_err(BackendError::from)
                },
            );
        }

        let listening_port =
            PortSpec::new(LOGS_AGGREGATOR_LISTENING_PORT_NUM, TransportProtocol::Tcp)?;
        let wait_result = wait_for_port_availability(
            self.runtime(),
            &started.container_id,
            &listening_port,
            self.config().availability_wait_max_retries,
            self.config().availability_wait_retry_delay,
        )
        .await;
        match wait_result {
            Ok(()) => {
                compensation.commit();
                let private_ip = self
                    .runtime()
                    .container_ip_on_network(&started.container_id, BRIDGE_NETWORK_NAME)
                    .await?;
                Ok(LogsAggregator {
                    status: ContainerState::Running,
                    maybe_private_ip: Some(private_ip),
                    listening_port: LOGS_AGGREGATOR_LISTENING_PORT_NUM,
                })
            }
            Err(err) => {
                compensation.unwind().await;
                Err(err)
            }
        }
    }

    /// Returns the logs aggregator, or `None` when it doesn't exist.
    pub async fn get_logs_aggregator(&self) -> Result<Option<LogsAggregator>> {
        match self.logs_aggregator_container().await? {
            Some(container) => Ok(Some(self.logs_aggregator_from_container(&container).await?)),
            None => Ok(None),
        }
    }

    /// Removes the logs aggregator container, if one exists.
    pub async fn destroy_logs_aggregator(&self) -> Result<()> {
        if let Some(container) = self.logs_aggregator_container().await? {
            self.runtime().remove_container(&container.id).await?;
        }
        Ok(())
    }

    async fn logs_aggregator_container(&self) -> Result<Option<Container>> {
        let mut matches = self
            .runtime()
            .containers_by_labels(&logs_aggregator_search_labels(), true)
            .await?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            n => Err(BackendError::internal(format!(
                "found {n} logs aggregator containers; there should only ever be one"
            ))),
        }
    }

    async fn logs_aggregator_from_container(
        &self,
        container: &Container,
    ) -> Result<LogsAggregator> {
        let status = container_state_of(container.status);
        let maybe_private_ip = match status {
            ContainerState::Running => Some(
                self.runtime()
                    .container_ip_on_network(&container.id, BRIDGE_NETWORK_NAME)
                    .await?,
            ),
            ContainerState::Stopped => None,
        };
        Ok(LogsAggregator {
            status,
            maybe_private_ip,
            listening_port: LOGS_AGGREGATOR_LISTENING_PORT_NUM,
        })
    }
}
