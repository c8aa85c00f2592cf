//! Reverse-proxy lifecycle: the global proxy fronting enclave services.

use std::collections::HashMap;
use std::sync::Arc;

use enclaved_docker::{Container, ContainerRuntime, CreateAndStartContainerArgsBuilder};
use tracing::debug;

use crate::attributes::{
    APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE, CONTAINER_TYPE_LABEL_KEY,
    REVERSE_PROXY_TYPE_LABEL_VALUE,
};
use crate::backend::compensation::CompensationStack;
use crate::backend::consts::{BRIDGE_NETWORK_NAME, REVERSE_PROXY_HTTP_PORT_NUM};
use crate::backend::shared::{container_state_of, wait_for_port_availability};
use crate::backend::DockerBackend;
use crate::error::{BackendError, Result};
use crate::objects::container::ContainerState;
use crate::objects::reverse_proxy::ReverseProxy;
use crate::port_spec::{PortSpec, TransportProtocol};

fn reverse_proxy_search_labels() -> HashMap<String, String> {
    HashMap::from([
        (
            APP_ID_LABEL_KEY.as_str().to_string(),
            APP_ID_LABEL_VALUE.as_str().to_string(),
        ),
        (
            CONTAINER_TYPE_LABEL_KEY.as_str().to_string(),
            REVERSE_PROXY_TYPE_LABEL_VALUE.as_str().to_string(),
        ),
    ])
}

impl DockerBackend {
    /// Creates the reverse proxy, or returns the existing one.
    ///
    /// The proxy runs on the runtime's default bridge network and is
    /// connected to each enclave network as enclaves are created.
    pub async fn create_reverse_proxy_idempotently(&self, image: &str) -> Result<ReverseProxy> {
        if let Some(existing) = self.reverse_proxy_container().await? {
            debug!(container_id = %existing.id, "reverse proxy already exists");
            return Ok(reverse_proxy_from_container(&existing));
        }

        let attrs = self.attrs_provider().for_reverse_proxy()?;
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
                format!("reverse proxy container '{}'", started.container_id),
                async move {
                    runtime
                        .kill_container(&container_id)
                        .await
                        .map_err(BackendError::from)
                },
            );
        }

        let http_port = PortSpec::new(REVERSE_PROXY_HTTP_PORT_NUM, TransportProtocol::Tcp)?;
        let wait_result = wait_for_port_availability(
            self.runtime(),
            &started.container_id,
            &http_port,
            self.config().availability_wait_max_retries,
            self.config().availability_wait_retry_delay,
        )
        .await;
        match wait_result {
            Ok(()) => {
                compensation.commit();
                Ok(ReverseProxy {
                    status: ContainerState::Running,
                    http_port: REVERSE_PROXY_HTTP_PORT_NUM,
                })
            }
            Err(err) => {
                compensation.unwind().await;
                Err(err)
            }
        }
    }

    /// Returns the reverse proxy, or `None` when it doesn't exist.
    pub async fn get_reverse_proxy(&self) -> Result<Option<ReverseProxy>> {
        Ok(self
            .reverse_proxy_container()
            .await?
            .map(|container| reverse_proxy_from_container(&container)))
    }

    /// Removes the reverse proxy container, if one exists.
    pub async fn destroy_reverse_proxy(&self) -> Result<()> {
        if let Some(container) = self.reverse_proxy_container().await? {
            self.runtime().remove_container(&container.id).await?;
        }
        Ok(())
    }

    /// Connects the proxy to a network. Returns false when no proxy is
    /// running, which is fine: the proxy is optional until HTTP routes are
    /// needed.
    pub(crate) async fn connect_reverse_proxy_to_network(&self, network_id: &str) -> Result<bool> {
        let Some(container) = self.reverse_proxy_container().await? else {
            debug!(network_id, "no reverse proxy running; skipping network attachment");
            return Ok(false);
        };
        self.runtime()
            .connect_container_to_network(network_id, &container.id, None)
            .await?;
        Ok(true)
    }

    /// Disconnects the proxy from a network, tolerating its absence.
    ///
    /// Static so compensation futures can run it without borrowing the
    /// engine.
    pub(crate) async fn disconnect_reverse_proxy_from_network_with(
        runtime: Arc<dyn ContainerRuntime>,
        network_id: String,
    ) -> Result<()> {
        let matches = runtime
            .containers_by_labels(&reverse_proxy_search_labels(), true)
            .await?;
        let Some(container) = matches.first() else {
            return Ok(());
        };
        runtime
            .disconnect_container_from_network(&container.id, &network_id)
            .await?;
        Ok(())
    }

    async fn reverse_proxy_container(&self) -> Result<Option<Container>> {
        let mut matches = self
            .runtime()
            .containers_by_labels(&reverse_proxy_search_labels(), true)
            .await?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            n => Err(BackendError::internal(format!(
                "found {n} reverse proxy containers; there should only ever be one"
            ))),
        }
    }
}

fn reverse_proxy_from_container(container: &Container) -> ReverseProxy {
    ReverseProxy {
        status: container_state_of(container.status),
        http_port: REVERSE_PROXY_HTTP_PORT_NUM,
    }
}
