//! Networking-sidecar lifecycle: one sidecar per user service.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use enclaved_docker::{Container, CreateAndStartContainerArgsBuilder};
use tracing::debug;

use crate::attributes::{
    APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE, CONTAINER_TYPE_LABEL_KEY, ENCLAVE_UUID_LABEL_KEY,
    NETWORKING_SIDECAR_TYPE_LABEL_VALUE, USER_SERVICE_GUID_LABEL_KEY,
};
use crate::backend::compensation::CompensationStack;
use crate::backend::shared::{container_state_of, required_label};
use crate::backend::DockerBackend;
use crate::error::{BackendError, Result};
use crate::objects::enclave::EnclaveUuid;
use crate::objects::networking_sidecar::{NetworkingSidecar, NetworkingSidecarFilters};
use crate::objects::service::ServiceUuid;
use crate::operation_parallelizer::{run_in_parallel_for_domain_objects, OperationResults};

// The sidecar just needs to exist on the network so traffic-qualification
// commands can be exec'd in its namespace; it idles otherwise.
const SIDECAR_CMD: [&str; 2] = ["sleep", "infinity"];
const NET_ADMIN_CAPABILITY: &str = "NET_ADMIN";

fn networking_sidecar_search_labels() -> HashMap<String, String> {
    HashMap::from([
        (
            APP_ID_LABEL_KEY.as_str().to_string(),
            APP_ID_LABEL_VALUE.as_str().to_string(),
        ),
        (
            CONTAINER_TYPE_LABEL_KEY.as_str().to_string(),
            NETWORKING_SIDECAR_TYPE_LABEL_VALUE.as_str().to_string(),
        ),
    ])
}

impl DockerBackend {
    /// Creates a networking sidecar for a user service, with an address
    /// from the enclave's registered IP tracker.
    pub async fn create_networking_sidecar(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
        image: &str,
    ) -> Result<NetworkingSidecar> {
        let preexisting = self
            .get_networking_sidecars(&NetworkingSidecarFilters::by_service(
                enclave_uuid.clone(),
                service_uuid.clone(),
            ))
            .await?;
        if !preexisting.is_empty() {
            return Err(BackendError::already_exists(format!(
                "networking sidecar for service '{service_uuid}'"
            )));
        }

        let enclave_network = self.enclave_network(enclave_uuid).await?;
        let ip_tracker = self.enclave_free_ip_tracker(enclave_uuid).await?;
        let sidecar_ip = ip_tracker.lock().await.get_free_ip_addr()?;

        let mut compensation = CompensationStack::new();
        {
            let ip_tracker = Arc::clone(&ip_tracker);
            compensation.push(format!("IP address '{sidecar_ip}'"), async move {
                ip_tracker.lock().await.release_ip_addr(sidecar_ip);
                Ok(())
            });
        }

        let enclave_attrs_provider = self.attrs_provider().for_enclave(enclave_uuid)?;
        let attrs = enclave_attrs_provider.for_networking_sidecar(service_uuid)?;

        let args = CreateAndStartContainerArgsBuilder::new(
            image,
            attrs.name().as_str(),
            enclave_network.id.clone(),
        )
        .with_cmd(SIDECAR_CMD.iter().map(ToString::to_string).collect())
        .with_static_ip(sidecar_ip)
        .with_labels(attrs.label_strings())
        .with_added_capabilities(vec![NET_ADMIN_CAPABILITY.to_string()])
        .build();

        let create_result = self.runtime().create_and_start_container(&args).await;
        match create_result {
            Ok(started) => {
                compensation.commit();
                debug!(
                    %enclave_uuid,
                    %service_uuid,
                    container_id = %started.container_id,
                    "networking sidecar created"
                );
                Ok(NetworkingSidecar {
                    service_uuid: service_uuid.clone(),
                    enclave_uuid: enclave_uuid.clone(),
                    status: crate::objects::container::ContainerState::Running,
                })
            }
            Err(err) => {
                compensation.unwind().await;
                Err(err.into())
            }
        }
    }

    /// Returns networking sidecars matching the filters, keyed by service
    /// UUID.
    pub async fn get_networking_sidecars(
        &self,
        filters: &NetworkingSidecarFilters,
    ) -> Result<BTreeMap<ServiceUuid, NetworkingSidecar>> {
        let matching = self.matching_networking_sidecars(filters).await?;
        Ok(matching
            .into_values()
            .map(|sidecar| (sidecar.service_uuid.clone(), sidecar))
            .collect())
    }

    /// Kills networking sidecars matching the filters.
    pub async fn stop_networking_sidecars(
        &self,
        filters: &NetworkingSidecarFilters,
    ) -> Result<OperationResults<ServiceUuid>> {
        let matching = self.matching_networking_sidecars(filters).await?;
        let runtime = Arc::clone(self.runtime());
        run_in_parallel_for_domain_objects(
            &matching,
            |sidecar| sidecar.service_uuid.clone(),
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

    /// Removes networking sidecars matching the filters.
    pub async fn destroy_networking_sidecars(
        &self,
        filters: &NetworkingSidecarFilters,
    ) -> Result<OperationResults<ServiceUuid>> {
        let matching = self.matching_networking_sidecars(filters).await?;
        let runtime = Arc::clone(self.runtime());
        run_in_parallel_for_domain_objects(
            &matching,
            |sidecar| sidecar.service_uuid.clone(),
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

    // Returns matching sidecars keyed by their runtime container ID.
    async fn matching_networking_sidecars(
        &self,
        filters: &NetworkingSidecarFilters,
    ) -> Result<BTreeMap<String, NetworkingSidecar>> {
        let containers = self
            .runtime()
            .containers_by_labels(&networking_sidecar_search_labels(), true)
            .await?;

        let mut result = BTreeMap::new();
        for container in containers {
            let sidecar = networking_sidecar_from_container(&container)?;
            if !filters.matches(&sidecar) {
                continue;
            }
            result.insert(container.id.clone(), sidecar);
        }
        Ok(result)
    }
}

fn networking_sidecar_from_container(container: &Container) -> Result<NetworkingSidecar> {
    let enclave_uuid = EnclaveUuid::new(required_label(
        container,
        ENCLAVE_UUID_LABEL_KEY.as_str(),
    )?);
    let service_uuid = ServiceUuid::new(required_label(
        container,
        USER_SERVICE_GUID_LABEL_KEY.as_str(),
    )?);
    Ok(NetworkingSidecar {
        service_uuid,
        enclave_uuid,
        status: container_state_of(container.status),
    })
}
