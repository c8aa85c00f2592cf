//! User-service lifecycle: register, start, get, stop, destroy, exec.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;

use enclaved_docker::{
    Container, CreateAndStartContainerArgsBuilder, ExecResult, PortPublishSpec,
};
use tracing::debug;

use crate::attributes::port_spec_serializer::deserialize_port_specs;
use crate::attributes::{
    APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE, CONTAINER_TYPE_LABEL_KEY, ENCLAVE_UUID_LABEL_KEY,
    GUID_LABEL_KEY, ID_LABEL_KEY, PORT_SPECS_LABEL_KEY, PRIVATE_IP_LABEL_KEY,
    USER_SERVICE_TYPE_LABEL_VALUE,
};
use crate::backend::compensation::CompensationStack;
use crate::backend::shared::{container_state_of, required_label, wait_for_port_availability};
use crate::backend::DockerBackend;
use crate::error::{BackendError, Result};
use crate::objects::enclave::EnclaveUuid;
use crate::objects::service::{
    Service, ServiceConfig, ServiceFilters, ServiceName, ServiceRegistration, ServiceUuid,
};
use crate::operation_parallelizer::{run_in_parallel_for_domain_objects, OperationResults};

fn user_service_search_labels(enclave_uuid: &EnclaveUuid) -> HashMap<String, String> {
    let mut labels = crate::backend::enclave::enclave_resource_labels(enclave_uuid);
    labels.insert(
        CONTAINER_TYPE_LABEL_KEY.as_str().to_string(),
        USER_SERVICE_TYPE_LABEL_VALUE.as_str().to_string(),
    );
    labels
}

impl DockerBackend {
    /// Reserves an identity and an enclave-network address for a service
    /// before its container exists.
    ///
    /// Requires the enclave's free-IP tracker to be registered with this
    /// engine instance; calling from anywhere else is a context mismatch.
    pub async fn register_user_service(
        &self,
        enclave_uuid: &EnclaveUuid,
        name: ServiceName,
    ) -> Result<ServiceRegistration> {
        let ip_tracker = self.enclave_free_ip_tracker(enclave_uuid).await?;
        let ip_addr = ip_tracker.lock().await.get_free_ip_addr()?;

        let registration = ServiceRegistration {
            name,
            uuid: ServiceUuid::random(),
            enclave_uuid: enclave_uuid.clone(),
            ip_addr,
        };
        if let Err(err) = self.service_registrations().insert(registration.clone()).await {
            ip_tracker.lock().await.release_ip_addr(ip_addr);
            return Err(err);
        }
        debug!(
            %enclave_uuid,
            service_uuid = %registration.uuid,
            ip = %ip_addr,
            "user service registered"
        );
        Ok(registration)
    }

    /// Drops a registration and releases its reserved address.
    pub async fn unregister_user_service(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
    ) -> Result<()> {
        let removed = self
            .service_registrations()
            .remove(enclave_uuid, service_uuid)
            .await
            .ok_or_else(|| {
                BackendError::not_found(format!(
                    "registration for service '{service_uuid}' in enclave '{enclave_uuid}'"
                ))
            })?;
        let ip_tracker = self.enclave_free_ip_tracker(enclave_uuid).await?;
        ip_tracker.lock().await.release_ip_addr(removed.ip_addr);
        Ok(())
    }

    /// Starts the container for a registered service.
    ///
    /// Ports carrying a wait policy are polled until reachable; a service
    /// that never answers is killed and the call fails.
    pub async fn start_user_service(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
        config: &ServiceConfig,
    ) -> Result<Service> {
        let registration = self
            .service_registrations()
            .get(enclave_uuid, service_uuid)
            .await
            .ok_or_else(|| {
                BackendError::not_found(format!(
                    "registration for service '{service_uuid}' in enclave '{enclave_uuid}'"
                ))
            })?;

        let enclave_network = self.enclave_network(enclave_uuid).await?;

        let enclave_attrs_provider = self.attrs_provider().for_enclave(enclave_uuid)?;
        let attrs = enclave_attrs_provider.for_user_service_container(
            &registration.name,
            &registration.uuid,
            registration.ip_addr,
            &config.private_ports,
            &config.user_labels,
        )?;

        let used_ports: BTreeMap<String, PortPublishSpec> = config
            .private_ports
            .values()
            .map(|port| (port.runtime_port_key(), PortPublishSpec::Automatic))
            .collect();

        let mut args_builder = CreateAndStartContainerArgsBuilder::new(
            config.image.as_str(),
            attrs.name().as_str(),
            enclave_network.id.clone(),
        )
        .with_env_vars(config.env_vars.clone())
        .with_used_ports(used_ports)
        .with_static_ip(registration.ip_addr)
        .with_labels(attrs.label_strings());
        if let Some(entrypoint) = &config.entrypoint {
            args_builder = args_builder.with_entrypoint(entrypoint.clone());
        }
        if let Some(cmd) = &config.cmd {
            args_builder = args_builder.with_cmd(cmd.clone());
        }
        let args = args_builder.build();

        let started = self.runtime().create_and_start_container(&args).await?;

        let mut compensation = CompensationStack::new();
        {
            let runtime = Arc::clone(self.runtime());
            let container_id = started.container_id.clone();
            compensation.push(
                format!("user service container '{}'", started.container_id),
                async move {
                    runtime
                        .kill_container(&container_id)
                        .await
                        .map_err(BackendError::from)
                },
            );
        }

        for port in config.private_ports.values() {
            let Some(wait) = port.maybe_wait() else {
                continue;
            };
            // The port's own wait timeout bounds the polling, expressed in
            // units of the engine's inter-retry delay.
            let retry_delay = self.config().availability_wait_retry_delay;
            let max_retries =
                (wait.timeout.as_millis() / retry_delay.as_millis().max(1)).clamp(1, 10_000) as u32;
            let wait_result = wait_for_port_availability(
                self.runtime(),
                &started.container_id,
                port,
                max_retries,
                retry_delay,
            )
            .await;
            if let Err(err) = wait_result {
                compensation.unwind().await;
                return Err(err);
            }
        }
        compensation.commit();

        Ok(Service {
            registration,
            container_id: started.container_id,
            status: crate::objects::container::ContainerState::Running,
            private_ports: config.private_ports.clone(),
        })
    }

    /// Returns services in an enclave matching the filters, keyed by
    /// service UUID.
    pub async fn get_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> Result<BTreeMap<ServiceUuid, Service>> {
        let matching = self.matching_user_services(enclave_uuid, filters).await?;
        Ok(matching
            .into_values()
            .map(|service| (service.registration.uuid.clone(), service))
            .collect())
    }

    /// Kills service containers matching the filters.
    pub async fn stop_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> Result<OperationResults<ServiceUuid>> {
        let matching = self.matching_user_services(enclave_uuid, filters).await?;
        let runtime = Arc::clone(self.runtime());
        run_in_parallel_for_domain_objects(
            &matching,
            |service| service.registration.uuid.clone(),
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

    /// Removes service containers matching the filters, dropping the
    /// registration (and releasing the address) of each removed service.
    pub async fn destroy_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> Result<OperationResults<ServiceUuid>> {
        let matching = self.matching_user_services(enclave_uuid, filters).await?;
        let runtime = Arc::clone(self.runtime());
        let results = run_in_parallel_for_domain_objects(
            &matching,
            |service| service.registration.uuid.clone(),
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
        .await?;

        for service_uuid in &results.successes {
            if self
                .service_registrations()
                .get(enclave_uuid, service_uuid)
                .await
                .is_some()
            {
                self.unregister_user_service(enclave_uuid, service_uuid)
                    .await?;
            }
        }
        Ok(results)
    }

    /// Runs a command inside a running service's container, capturing its
    /// output.
    pub async fn run_user_service_exec_command(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
        command: &[String],
    ) -> Result<ExecResult> {
        let services = self
            .get_user_services(enclave_uuid, &ServiceFilters::by_uuid(service_uuid.clone()))
            .await?;
        let service = services.get(service_uuid).ok_or_else(|| {
            BackendError::not_found(format!(
                "service '{service_uuid}' in enclave '{enclave_uuid}'"
            ))
        })?;
        Ok(self
            .runtime()
            .exec_command(&service.container_id, command)
            .await?)
    }

    // Returns matching services keyed by their runtime container ID.
    async fn matching_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> Result<BTreeMap<String, Service>> {
        let containers = self
            .runtime()
            .containers_by_labels(&user_service_search_labels(enclave_uuid), true)
            .await?;

        let mut result = BTreeMap::new();
        for container in containers {
            let service = user_service_from_container(enclave_uuid, &container)?;
            if !filters.matches(&service) {
                continue;
            }
            result.insert(container.id.clone(), service);
        }
        Ok(result)
    }
}

fn user_service_from_container(
    enclave_uuid: &EnclaveUuid,
    container: &Container,
) -> Result<Service> {
    let name = ServiceName::new(required_label(container, ID_LABEL_KEY.as_str())?);
    let uuid = ServiceUuid::new(required_label(container, GUID_LABEL_KEY.as_str())?);
    let labeled_enclave = required_label(container, ENCLAVE_UUID_LABEL_KEY.as_str())?;
    if labeled_enclave != enclave_uuid.as_str() {
        return Err(BackendError::internal(format!(
            "container '{}' surfaced for enclave '{enclave_uuid}' but is labeled for enclave \
             '{labeled_enclave}'",
            container.id
        )));
    }

    let ip_addr: Ipv4Addr = required_label(container, PRIVATE_IP_LABEL_KEY.as_str())?
        .parse()
        .map_err(|_| {
            BackendError::internal(format!(
                "couldn't parse the private IP label of service container '{}'",
                container.id
            ))
        })?;

    let serialized_ports = required_label(container, PORT_SPECS_LABEL_KEY.as_str())?;
    let private_ports = deserialize_port_specs(serialized_ports)?;

    Ok(Service {
        registration: ServiceRegistration {
            name,
            uuid,
            enclave_uuid: enclave_uuid.clone(),
            ip_addr,
        },
        container_id: container.id.clone(),
        status: container_state_of(container.status),
        private_ports,
    })
}
