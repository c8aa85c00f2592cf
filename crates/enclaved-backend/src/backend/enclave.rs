//! Enclave lifecycle: create, get, stop, destroy, dump.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use enclaved_docker::{Container, ContainerRuntime, Network};
use enclaved_error::CommonError;
use futures::StreamExt;
use tracing::debug;

use crate::attributes::{
    ObjectAttributes, APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE, CONTAINER_TYPE_LABEL_KEY,
    ENCLAVE_CREATION_TIME_LABEL_KEY, ENCLAVE_NAME_LABEL_KEY, ENCLAVE_UUID_LABEL_KEY,
    ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE, API_CONTAINER_TYPE_LABEL_VALUE, VOLUME_TYPE_LABEL_KEY,
};
use crate::backend::compensation::CompensationStack;
use crate::backend::consts::PRODUCTION_MODE_ENV_VAR;
use crate::backend::shared::is_container_running;
use crate::backend::DockerBackend;
use crate::error::{BackendError, Result};
use crate::objects::enclave::{Enclave, EnclaveFilters, EnclaveStatus, EnclaveUuid};
use crate::operation_parallelizer::{run_in_parallel, OperationResults};

const CONTAINER_INSPECT_DUMP_FILENAME: &str = "spec.json";
const CONTAINER_LOGS_DUMP_FILENAME: &str = "output.log";

/// Everything known about one matching enclave after discovery.
struct MatchingNetworkInformation {
    enclave_status: EnclaveStatus,
    network: Network,
    containers: Vec<Container>,
}

impl DockerBackend {
    /// Creates an enclave: its network, its data volume, and the reverse
    /// proxy's attachment, as one ordered transaction with compensation.
    ///
    /// A crash between steps can leave orphaned resources; they remain
    /// label-discoverable for cleanup.
    pub async fn create_enclave(
        &self,
        enclave_uuid: EnclaveUuid,
        enclave_name: &str,
    ) -> Result<Enclave> {
        let _creation_guard = self.enclave_creation_lock().lock().await;

        // Idempotency guards: neither the network nor the data volume may
        // already exist for this UUID.
        let network_search_labels = enclave_resource_labels(&enclave_uuid);
        let preexisting_networks = self
            .runtime()
            .networks_by_labels(&network_search_labels)
            .await?;
        if !preexisting_networks.is_empty() {
            return Err(BackendError::already_exists(format!(
                "enclave '{enclave_uuid}'"
            )));
        }

        let mut volume_search_labels = network_search_labels;
        volume_search_labels.insert(
            VOLUME_TYPE_LABEL_KEY.as_str().to_string(),
            ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE.as_str().to_string(),
        );
        let preexisting_volumes = self
            .runtime()
            .volumes_by_labels(&volume_search_labels)
            .await?;
        if !preexisting_volumes.is_empty() {
            return Err(BackendError::already_exists(format!(
                "data volume for enclave '{enclave_uuid}'"
            )));
        }

        let enclave_attrs_provider = self.attrs_provider().for_enclave(&enclave_uuid)?;
        let creation_time = Utc::now();
        let network_attrs = enclave_attrs_provider.for_enclave_network(enclave_name, creation_time)?;
        let volume_attrs = enclave_attrs_provider.for_enclave_data_volume()?;

        debug!(%enclave_uuid, "creating enclave network");
        let allocated = self
            .network_allocator()
            .create_new_network(network_attrs.name().as_str(), network_attrs.label_strings())
            .await?;
        debug!(
            %enclave_uuid,
            network_id = %allocated.network_id,
            subnet = %allocated.subnet,
            "enclave network created"
        );

        let mut compensation = CompensationStack::new();
        {
            let runtime = Arc::clone(self.runtime());
            let network_id = allocated.network_id.clone();
            compensation.push(format!("network '{}'", allocated.network_id), async move {
                runtime
                    .remove_network(&network_id)
                    .await
                    .map_err(BackendError::from)
            });
        }

        let provisioned = self
            .provision_remaining_enclave_resources(
                &allocated.network_id,
                &volume_attrs,
                &mut compensation,
            )
            .await;
        match provisioned {
            Ok(()) => {
                compensation.commit();
                Ok(Enclave {
                    uuid: enclave_uuid,
                    name: enclave_name.to_string(),
                    status: EnclaveStatus::Empty,
                    creation_time: Some(creation_time),
                    is_production: false,
                })
            }
            Err(err) => {
                compensation.unwind().await;
                Err(err)
            }
        }
    }

    async fn provision_remaining_enclave_resources(
        &self,
        network_id: &str,
        volume_attrs: &ObjectAttributes,
        compensation: &mut CompensationStack,
    ) -> Result<()> {
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

        // Attach the reverse proxy so proxied routes reach the enclave. A
        // runtime with no proxy yet is fine; the proxy connects to existing
        // enclave networks when it is created.
        if self.connect_reverse_proxy_to_network(network_id).await? {
            let runtime = Arc::clone(self.runtime());
            let network_id = network_id.to_string();
            compensation.push(
                format!("reverse proxy attachment to network '{network_id}'"),
                async move {
                    DockerBackend::disconnect_reverse_proxy_from_network_with(runtime, network_id)
                        .await
                },
            );
        }

        Ok(())
    }

    /// Returns enclaves matching the filters, keyed by UUID.
    pub async fn get_enclaves(
        &self,
        filters: &EnclaveFilters,
    ) -> Result<BTreeMap<EnclaveUuid, Enclave>> {
        let matching = self.matching_enclave_network_info(filters).await?;

        let mut result = BTreeMap::new();
        for (enclave_uuid, info) in matching {
            let name = enclave_name_from_network(&info.network);
            let creation_time = enclave_creation_time_from_network(&info.network)?;
            let is_production = self.production_mode_of(&info.containers).await?;
            result.insert(
                enclave_uuid.clone(),
                Enclave {
                    uuid: enclave_uuid,
                    name,
                    status: info.enclave_status,
                    creation_time,
                    is_production,
                },
            );
        }
        Ok(result)
    }

    /// Kills every container of every matching enclave, partitioning the
    /// outcome per enclave.
    pub async fn stop_enclaves(
        &self,
        filters: &EnclaveFilters,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let matching = self.matching_enclave_network_info(filters).await?;

        let mut owner_by_container_id = BTreeMap::new();
        for (enclave_uuid, info) in &matching {
            for container in &info.containers {
                owner_by_container_id.insert(container.id.clone(), enclave_uuid.clone());
            }
        }

        let container_ids: BTreeSet<String> = owner_by_container_id.keys().cloned().collect();
        let runtime = Arc::clone(self.runtime());
        let kill_results = run_in_parallel(&container_ids, move |container_id| {
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .kill_container(&container_id)
                    .await
                    .map_err(BackendError::from)
            }
        })
        .await;

        partition_per_enclave(
            matching.keys().cloned(),
            &owner_by_container_id,
            kill_results,
            "killing containers",
        )
    }

    /// Destroys matching enclaves in strictly ordered stages: containers,
    /// then volumes, then external-container disconnection, then the
    /// network. An enclave only advances to the next stage when the
    /// previous one fully succeeded for it; unaffected enclaves continue
    /// independently.
    pub async fn destroy_enclaves(
        &self,
        filters: &EnclaveFilters,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let matching = self.matching_enclave_network_info(filters).await?;

        // An enclave with a live IP tracker means this engine instance owns
        // its address space; destroying it from here is a caller bug.
        for enclave_uuid in matching.keys() {
            if self.has_enclave_free_ip_tracker(enclave_uuid).await {
                return Err(BackendError::config(format!(
                    "received a request to destroy enclave '{enclave_uuid}' for which a free IP \
                     address tracker is registered; destroy is likely being invoked from the \
                     wrong process context"
                )));
            }
        }

        let mut failures: BTreeMap<EnclaveUuid, BackendError> = BTreeMap::new();

        let container_stage = self.destroy_containers_in_enclaves(&matching).await?;
        failures.extend(container_stage.failures);

        let volume_stage = self
            .destroy_volumes_in_enclaves(&container_stage.successes)
            .await?;
        failures.extend(volume_stage.failures);

        let disconnect_stage = self
            .disconnect_external_containers_from_enclave_networks(
                &matching,
                &volume_stage.successes,
            )
            .await?;
        failures.extend(disconnect_stage.failures);

        let network_stage = self
            .destroy_enclave_networks(&matching, &disconnect_stage.successes)
            .await?;
        failures.extend(network_stage.failures);

        Ok(OperationResults {
            successes: network_stage.successes,
            failures,
        })
    }

    /// Writes each enclave container's inspect output and logs under
    /// `<output_dirpath>/<container-name>/`, fanned out concurrently.
    pub async fn dump_enclave(
        &self,
        enclave_uuid: &EnclaveUuid,
        output_dirpath: &Path,
    ) -> Result<()> {
        let containers = self
            .runtime()
            .containers_by_labels(&enclave_resource_labels(enclave_uuid), true)
            .await?;

        if tokio::fs::metadata(output_dirpath).await.is_ok() {
            return Err(BackendError::already_exists(format!(
                "dump output directory '{}'",
                output_dirpath.display()
            )));
        }
        tokio::fs::create_dir_all(output_dirpath)
            .await
            .map_err(CommonError::from)?;

        let mut name_by_container_id = BTreeMap::new();
        for container in &containers {
            let dirname = if container.name.is_empty() {
                container.id.clone()
            } else {
                container.name.clone()
            };
            name_by_container_id.insert(container.id.clone(), dirname);
        }
        let name_by_container_id = Arc::new(name_by_container_id);
        let container_ids: BTreeSet<String> = name_by_container_id.keys().cloned().collect();

        let runtime = Arc::clone(self.runtime());
        let output_dirpath = output_dirpath.to_path_buf();
        let dump_results = run_in_parallel(&container_ids, move |container_id| {
            let runtime = Arc::clone(&runtime);
            let names = Arc::clone(&name_by_container_id);
            let output_dirpath = output_dirpath.clone();
            async move {
                let container_name = names
                    .get(&container_id)
                    .cloned()
                    .unwrap_or_else(|| container_id.clone());
                dump_one_container(runtime, output_dirpath, container_id, container_name).await
            }
        })
        .await;

        if dump_results.is_all_success() {
            return Ok(());
        }
        let messages = dump_results
            .failures
            .into_iter()
            .map(|(container_id, err)| format!("container '{container_id}': {err}"))
            .collect();
        Err(BackendError::aggregate(messages))
    }

    // ================================================================
    // Private helpers
    // ================================================================

    async fn matching_enclave_network_info(
        &self,
        filters: &EnclaveFilters,
    ) -> Result<BTreeMap<EnclaveUuid, MatchingNetworkInformation>> {
        // NOTE: we search by app ID only and post-filter on UUID, because
        // the runtime has no disjunctive label search.
        let app_labels = HashMap::from([(
            APP_ID_LABEL_KEY.as_str().to_string(),
            APP_ID_LABEL_VALUE.as_str().to_string(),
        )]);
        let networks = self.runtime().networks_by_labels(&app_labels).await?;

        let mut result = BTreeMap::new();
        for network in networks {
            let enclave_uuid = enclave_uuid_from_network(&network)?;
            if !filters.matches_uuid(&enclave_uuid) {
                continue;
            }
            let (enclave_status, containers) =
                self.enclave_status_and_containers(&enclave_uuid).await?;
            if !filters.matches_status(enclave_status) {
                continue;
            }
            result.insert(
                enclave_uuid,
                MatchingNetworkInformation {
                    enclave_status,
                    network,
                    containers,
                },
            );
        }
        Ok(result)
    }

    async fn enclave_status_and_containers(
        &self,
        enclave_uuid: &EnclaveUuid,
    ) -> Result<(EnclaveStatus, Vec<Container>)> {
        let containers = self
            .runtime()
            .containers_by_labels(&enclave_resource_labels(enclave_uuid), true)
            .await?;
        if containers.is_empty() {
            return Ok((EnclaveStatus::Empty, containers));
        }
        // The enclave counts as running when at least one container is.
        let mut enclave_status = EnclaveStatus::Stopped;
        for container in &containers {
            if is_container_running(container.status) {
                enclave_status = EnclaveStatus::Running;
                break;
            }
        }
        Ok((enclave_status, containers))
    }

    async fn production_mode_of(&self, containers: &[Container]) -> Result<bool> {
        // Only the API container (at most one per enclave) carries the flag.
        for container in containers {
            let container_type = container
                .labels
                .get(CONTAINER_TYPE_LABEL_KEY.as_str())
                .map(String::as_str);
            if container_type != Some(API_CONTAINER_TYPE_LABEL_VALUE.as_str()) {
                continue;
            }
            let inspect = self.runtime().inspect_container(&container.id).await?;
            let wanted = format!("{PRODUCTION_MODE_ENV_VAR}=true");
            let is_production = inspect
                .pointer("/Config/Env")
                .and_then(|env| env.as_array())
                .map(|env| {
                    env.iter()
                        .filter_map(|entry| entry.as_str())
                        .any(|entry| entry == wanted)
                })
                .unwrap_or(false);
            return Ok(is_production);
        }
        Ok(false)
    }

    async fn destroy_containers_in_enclaves(
        &self,
        matching: &BTreeMap<EnclaveUuid, MatchingNetworkInformation>,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let mut owner_by_container_id = BTreeMap::new();
        for (enclave_uuid, info) in matching {
            for container in &info.containers {
                owner_by_container_id.insert(container.id.clone(), enclave_uuid.clone());
            }
        }

        let container_ids: BTreeSet<String> = owner_by_container_id.keys().cloned().collect();
        let runtime = Arc::clone(self.runtime());
        let removal_results = run_in_parallel(&container_ids, move |container_id| {
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .remove_container(&container_id)
                    .await
                    .map_err(BackendError::from)
            }
        })
        .await;

        partition_per_enclave(
            matching.keys().cloned(),
            &owner_by_container_id,
            removal_results,
            "removing containers",
        )
    }

    async fn destroy_volumes_in_enclaves(
        &self,
        enclave_uuids: &BTreeSet<EnclaveUuid>,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let mut owner_by_volume_name = BTreeMap::new();
        for enclave_uuid in enclave_uuids {
            let volumes = self
                .runtime()
                .volumes_by_labels(&enclave_resource_labels(enclave_uuid))
                .await?;
            for volume in volumes {
                owner_by_volume_name.insert(volume.name, enclave_uuid.clone());
            }
        }

        let volume_names: BTreeSet<String> = owner_by_volume_name.keys().cloned().collect();
        let runtime = Arc::clone(self.runtime());
        let removal_results = run_in_parallel(&volume_names, move |volume_name| {
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .remove_volume(&volume_name)
                    .await
                    .map_err(BackendError::from)
            }
        })
        .await;

        partition_per_enclave(
            enclave_uuids.iter().cloned(),
            &owner_by_volume_name,
            removal_results,
            "removing volumes",
        )
    }

    async fn disconnect_external_containers_from_enclave_networks(
        &self,
        matching: &BTreeMap<EnclaveUuid, MatchingNetworkInformation>,
        enclave_uuids: &BTreeSet<EnclaveUuid>,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let mut owner_by_network_id = BTreeMap::new();
        for enclave_uuid in enclave_uuids {
            let info = matching.get(enclave_uuid).ok_or_else(|| {
                BackendError::internal(format!(
                    "attempted to disconnect containers of enclave '{enclave_uuid}' which \
                     didn't match the destroy filters"
                ))
            })?;
            owner_by_network_id.insert(info.network.id.clone(), enclave_uuid.clone());
        }

        let network_ids: BTreeSet<String> = owner_by_network_id.keys().cloned().collect();
        let runtime = Arc::clone(self.runtime());
        let disconnect_results = run_in_parallel(&network_ids, move |network_id| {
            let runtime = Arc::clone(&runtime);
            async move {
                // Enclave containers are gone by this stage; whatever is
                // still attached (e.g. the reverse proxy) blocks network
                // removal and must be detached.
                let attached = runtime.containers_by_network(&network_id, false).await?;
                for container in attached {
                    runtime
                        .disconnect_container_from_network(&container.id, &network_id)
                        .await?;
                }
                Ok(())
            }
        })
        .await;

        partition_per_enclave(
            enclave_uuids.iter().cloned(),
            &owner_by_network_id,
            disconnect_results,
            "disconnecting external containers",
        )
    }

    async fn destroy_enclave_networks(
        &self,
        matching: &BTreeMap<EnclaveUuid, MatchingNetworkInformation>,
        enclave_uuids: &BTreeSet<EnclaveUuid>,
    ) -> Result<OperationResults<EnclaveUuid>> {
        let mut owner_by_network_id = BTreeMap::new();
        for enclave_uuid in enclave_uuids {
            let info = matching.get(enclave_uuid).ok_or_else(|| {
                BackendError::internal(format!(
                    "attempted to destroy the network of enclave '{enclave_uuid}' which didn't \
                     match the destroy filters"
                ))
            })?;
            owner_by_network_id.insert(info.network.id.clone(), enclave_uuid.clone());
        }

        let network_ids: BTreeSet<String> = owner_by_network_id.keys().cloned().collect();
        let runtime = Arc::clone(self.runtime());
        let removal_results = run_in_parallel(&network_ids, move |network_id| {
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .remove_network(&network_id)
                    .await
                    .map_err(BackendError::from)
            }
        })
        .await;

        partition_per_enclave(
            enclave_uuids.iter().cloned(),
            &owner_by_network_id,
            removal_results,
            "removing networks",
        )
    }
}

/// The conjunctive label filter matching every resource of one enclave.
pub(crate) fn enclave_resource_labels(enclave_uuid: &EnclaveUuid) -> HashMap<String, String> {
    HashMap::from([
        (
            APP_ID_LABEL_KEY.as_str().to_string(),
            APP_ID_LABEL_VALUE.as_str().to_string(),
        ),
        (
            ENCLAVE_UUID_LABEL_KEY.as_str().to_string(),
            enclave_uuid.as_str().to_string(),
        ),
    ])
}

fn enclave_uuid_from_network(network: &Network) -> Result<EnclaveUuid> {
    let uuid = network
        .labels
        .get(ENCLAVE_UUID_LABEL_KEY.as_str())
        .ok_or_else(|| {
            BackendError::internal(format!(
                "network '{}' carries the app label but no '{}' label",
                network.id,
                ENCLAVE_UUID_LABEL_KEY.as_str()
            ))
        })?;
    Ok(EnclaveUuid::new(uuid.clone()))
}

fn enclave_name_from_network(network: &Network) -> String {
    // Absent for enclaves created before names were tracked.
    network
        .labels
        .get(ENCLAVE_NAME_LABEL_KEY.as_str())
        .cloned()
        .unwrap_or_default()
}

fn enclave_creation_time_from_network(network: &Network) -> Result<Option<DateTime<Utc>>> {
    // Absent for enclaves created before creation time was tracked.
    let Some(raw) = network.labels.get(ENCLAVE_CREATION_TIME_LABEL_KEY.as_str()) else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|err| {
        BackendError::internal(format!(
            "parsing creation time '{raw}' from network '{}': {err}",
            network.id
        ))
    })?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

/// Re-expresses per-object results as per-enclave results.
///
/// Enclaves with no failed objects succeed; an object surfacing that maps
/// to no requested enclave is an internal consistency error.
fn partition_per_enclave(
    enclave_uuids: impl IntoIterator<Item = EnclaveUuid>,
    owner_by_object_id: &BTreeMap<String, EnclaveUuid>,
    object_results: OperationResults<String>,
    operation_description: &str,
) -> Result<OperationResults<EnclaveUuid>> {
    for object_id in &object_results.successes {
        if !owner_by_object_id.contains_key(object_id) {
            return Err(BackendError::internal(format!(
                "{operation_description} succeeded for object '{object_id}' which belongs to \
                 no requested enclave"
            )));
        }
    }

    let mut failure_messages: BTreeMap<EnclaveUuid, Vec<String>> = BTreeMap::new();
    for (object_id, err) in object_results.failures {
        let owner = owner_by_object_id.get(&object_id).ok_or_else(|| {
            BackendError::internal(format!(
                "{operation_description} failed for object '{object_id}' which belongs to no \
                 requested enclave"
            ))
        })?;
        failure_messages
            .entry(owner.clone())
            .or_default()
            .push(err.to_string());
    }

    let mut results = OperationResults::default();
    for enclave_uuid in enclave_uuids {
        match failure_messages.remove(&enclave_uuid) {
            None => {
                results.successes.insert(enclave_uuid);
            }
            Some(messages) => {
                results
                    .failures
                    .insert(enclave_uuid, BackendError::aggregate(messages));
            }
        }
    }
    Ok(results)
}

async fn dump_one_container(
    runtime: Arc<dyn ContainerRuntime>,
    output_dirpath: PathBuf,
    container_id: String,
    container_name: String,
) -> Result<()> {
    let container_dirpath = output_dirpath.join(&container_name);
    tokio::fs::create_dir_all(&container_dirpath)
        .await
        .map_err(CommonError::from)?;

    let inspect = runtime.inspect_container(&container_id).await?;
    let serialized = serde_json::to_string_pretty(&inspect).map_err(|err| {
        BackendError::internal(format!(
            "serializing inspect output of container '{container_id}': {err}"
        ))
    })?;
    tokio::fs::write(
        container_dirpath.join(CONTAINER_INSPECT_DUMP_FILENAME),
        serialized,
    )
    .await
    .map_err(CommonError::from)?;

    let mut logs_stream = runtime.container_logs(&container_id, false).await?;
    let mut collected_logs = Vec::new();
    while let Some(chunk) = logs_stream.next().await {
        collected_logs.extend_from_slice(&chunk?);
    }
    tokio::fs::write(
        container_dirpath.join(CONTAINER_LOGS_DUMP_FILENAME),
        collected_logs,
    )
    .await
    .map_err(CommonError::from)?;

    Ok(())
}
