//! Enclave create/get/stop/destroy behavior against the in-memory runtime.

mod common;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{backend_over, MockRuntime};
use enclaved_backend::objects::{EnclaveFilters, EnclaveStatus, EnclaveUuid};
use enclaved_docker::args::CreateAndStartContainerArgsBuilder;
use enclaved_docker::{ContainerRuntime, ContainerStatus};

const APP_ID_LABEL: (&str, &str) = ("enclaved.app-id", "enclaved");
const ENCLAVE_UUID_LABEL_KEY: &str = "enclaved.enclave-id";
const CONTAINER_TYPE_LABEL_KEY: &str = "enclaved.container-type";

fn enclave_container_labels(enclave_uuid: &EnclaveUuid) -> HashMap<String, String> {
    HashMap::from([
        (APP_ID_LABEL.0.to_string(), APP_ID_LABEL.1.to_string()),
        (
            ENCLAVE_UUID_LABEL_KEY.to_string(),
            enclave_uuid.as_str().to_string(),
        ),
    ])
}

/// Starts a plain labeled container inside the enclave's network, bypassing
/// the engine, to simulate enclave workloads.
async fn start_enclave_container(
    runtime: &Arc<MockRuntime>,
    enclave_uuid: &EnclaveUuid,
    name: &str,
) -> String {
    let network_id = runtime
        .networks()
        .into_iter()
        .find(|network| {
            network.labels.get(ENCLAVE_UUID_LABEL_KEY).map(String::as_str)
                == Some(enclave_uuid.as_str())
        })
        .expect("enclave network not found")
        .id;
    let args = CreateAndStartContainerArgsBuilder::new("alpine:3.19", name, network_id)
        .with_labels(enclave_container_labels(enclave_uuid))
        .build();
    (Arc::clone(runtime) as Arc<dyn ContainerRuntime>)
        .create_and_start_container(&args)
        .await
        .unwrap()
        .container_id
}

#[tokio::test]
async fn create_enclave_provisions_one_network_and_one_volume() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuid = EnclaveUuid::random();

    let enclave = backend.create_enclave(uuid.clone(), "test").await.unwrap();
    assert_eq!(enclave.status, EnclaveStatus::Empty);
    assert_eq!(enclave.name, "test");
    assert!(enclave.creation_time.is_some());

    assert_eq!(runtime.network_count(), 1);
    assert_eq!(runtime.volume_count(), 1);
    let network = &runtime.networks()[0];
    assert_eq!(
        network.labels.get(ENCLAVE_UUID_LABEL_KEY).map(String::as_str),
        Some(uuid.as_str())
    );
    assert_eq!(network.name, "encl-test");
}

#[tokio::test]
async fn creating_the_same_enclave_twice_fails_and_leaves_one_of_each_resource() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuid = EnclaveUuid::random();

    backend.create_enclave(uuid.clone(), "test").await.unwrap();
    let err = backend.create_enclave(uuid.clone(), "test").await.unwrap_err();
    assert!(err.is_already_exists());

    assert_eq!(runtime.network_count(), 1);
    assert_eq!(runtime.volume_count(), 1);
}

#[tokio::test]
async fn a_failed_volume_creation_rolls_the_network_back() {
    let runtime = MockRuntime::new();
    runtime.fail_volume_creation.store(true, Ordering::SeqCst);
    let backend = backend_over(&runtime);

    let err = backend
        .create_enclave(EnclaveUuid::random(), "doomed")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("injected"));

    assert_eq!(runtime.network_count(), 0);
    assert_eq!(runtime.volume_count(), 0);
}

#[tokio::test]
async fn enclave_status_follows_its_containers() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuid = EnclaveUuid::random();
    backend.create_enclave(uuid.clone(), "test").await.unwrap();

    let filters = EnclaveFilters::by_uuid(uuid.clone());
    let enclaves = backend.get_enclaves(&filters).await.unwrap();
    assert_eq!(enclaves[&uuid].status, EnclaveStatus::Empty);

    let container_id = start_enclave_container(&runtime, &uuid, "workload").await;
    let enclaves = backend.get_enclaves(&filters).await.unwrap();
    assert_eq!(enclaves[&uuid].status, EnclaveStatus::Running);

    runtime.set_container_status(&container_id, ContainerStatus::Exited);
    let enclaves = backend.get_enclaves(&filters).await.unwrap();
    assert_eq!(enclaves[&uuid].status, EnclaveStatus::Stopped);
}

#[tokio::test]
async fn status_filters_narrow_discovery() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let empty_uuid = EnclaveUuid::random();
    let running_uuid = EnclaveUuid::random();
    backend.create_enclave(empty_uuid.clone(), "idle").await.unwrap();
    backend.create_enclave(running_uuid.clone(), "busy").await.unwrap();
    start_enclave_container(&runtime, &running_uuid, "workload").await;

    let running_only = EnclaveFilters {
        uuids: BTreeSet::new(),
        statuses: BTreeSet::from([EnclaveStatus::Running]),
    };
    let enclaves = backend.get_enclaves(&running_only).await.unwrap();
    assert_eq!(enclaves.len(), 1);
    assert!(enclaves.contains_key(&running_uuid));
}

#[tokio::test]
async fn stop_enclaves_kills_every_container() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuid = EnclaveUuid::random();
    backend.create_enclave(uuid.clone(), "test").await.unwrap();
    let first = start_enclave_container(&runtime, &uuid, "one").await;
    let second = start_enclave_container(&runtime, &uuid, "two").await;

    let results = backend
        .stop_enclaves(&EnclaveFilters::by_uuid(uuid.clone()))
        .await
        .unwrap();
    assert!(results.successes.contains(&uuid));
    assert!(results.failures.is_empty());
    assert_eq!(runtime.container_status(&first), Some(ContainerStatus::Exited));
    assert_eq!(runtime.container_status(&second), Some(ContainerStatus::Exited));
}

#[tokio::test]
async fn destroy_enclaves_removes_containers_volumes_and_the_network() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuid = EnclaveUuid::random();
    backend.create_enclave(uuid.clone(), "test").await.unwrap();
    start_enclave_container(&runtime, &uuid, "workload").await;

    let results = backend
        .destroy_enclaves(&EnclaveFilters::by_uuid(uuid.clone()))
        .await
        .unwrap();
    assert!(results.successes.contains(&uuid));
    assert!(results.failures.is_empty());

    assert_eq!(runtime.container_count(), 0);
    assert_eq!(runtime.volume_count(), 0);
    assert_eq!(runtime.network_count(), 0);
}

#[tokio::test]
async fn a_failing_enclave_does_not_block_the_others() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuids: Vec<EnclaveUuid> = (0..3).map(|_| EnclaveUuid::random()).collect();
    for (i, uuid) in uuids.iter().enumerate() {
        backend
            .create_enclave(uuid.clone(), &format!("encl{i}"))
            .await
            .unwrap();
        start_enclave_container(&runtime, uuid, &format!("workload{i}")).await;
    }

    // Container removal fails for the middle enclave only.
    *runtime.fail_container_removal_label.lock().unwrap() = Some((
        ENCLAVE_UUID_LABEL_KEY.to_string(),
        uuids[1].as_str().to_string(),
    ));

    let results = backend.destroy_enclaves(&EnclaveFilters::all()).await.unwrap();
    assert!(results.successes.contains(&uuids[0]));
    assert!(results.successes.contains(&uuids[2]));
    assert_eq!(results.failures.len(), 1);
    assert!(results.failures.contains_key(&uuids[1]));

    // The failed enclave never advanced past the container stage: its
    // volume and network are untouched.
    assert_eq!(runtime.network_count(), 1);
    assert_eq!(runtime.volume_count(), 1);
    assert_eq!(
        runtime.networks()[0]
            .labels
            .get(ENCLAVE_UUID_LABEL_KEY)
            .map(String::as_str),
        Some(uuids[1].as_str())
    );
}

#[tokio::test]
async fn destroy_refuses_an_enclave_with_a_registered_ip_tracker() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuid = EnclaveUuid::random();
    backend.create_enclave(uuid.clone(), "test").await.unwrap();

    let subnet = runtime.networks()[0].subnet.unwrap();
    backend
        .register_enclave_free_ip_tracker(uuid.clone(), subnet, BTreeSet::new())
        .await
        .unwrap();

    let err = backend
        .destroy_enclaves(&EnclaveFilters::by_uuid(uuid.clone()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("free IP address tracker"));
    assert_eq!(runtime.network_count(), 1);

    backend.unregister_enclave_free_ip_tracker(&uuid).await;
    backend
        .destroy_enclaves(&EnclaveFilters::by_uuid(uuid))
        .await
        .unwrap();
    assert_eq!(runtime.network_count(), 0);
}

#[tokio::test]
async fn the_reverse_proxy_is_attached_on_create_and_detached_on_destroy() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    backend
        .create_reverse_proxy_idempotently("traefik:2.10")
        .await
        .unwrap();
    let proxy_id = runtime
        .containers()
        .into_iter()
        .find(|container| {
            container.labels.get(CONTAINER_TYPE_LABEL_KEY).map(String::as_str)
                == Some("reverse-proxy")
        })
        .unwrap()
        .id;

    let uuid = EnclaveUuid::random();
    backend.create_enclave(uuid.clone(), "test").await.unwrap();
    let network_id = runtime
        .networks()
        .into_iter()
        .find(|network| network.labels.contains_key(ENCLAVE_UUID_LABEL_KEY))
        .unwrap()
        .id;
    assert!(runtime.is_attached(&network_id, &proxy_id));

    let results = backend
        .destroy_enclaves(&EnclaveFilters::by_uuid(uuid))
        .await
        .unwrap();
    assert!(results.failures.is_empty());
    // The proxy survives enclave destruction; only its attachment goes.
    assert_eq!(runtime.container_count(), 1);
    assert_eq!(runtime.network_count(), 0);
}

#[tokio::test]
async fn dump_enclave_writes_inspect_and_logs_per_container() {
    let runtime = MockRuntime::new();
    let backend = backend_over(&runtime);
    let uuid = EnclaveUuid::random();
    backend.create_enclave(uuid.clone(), "test").await.unwrap();
    start_enclave_container(&runtime, &uuid, "workload").await;

    let output_dir =
        std::env::temp_dir().join(format!("enclaved-dump-test-{}", uuid.as_str()));
    backend.dump_enclave(&uuid, &output_dir).await.unwrap();

    let spec = output_dir.join("workload").join("spec.json");
    let logs = output_dir.join("workload").join("output.log");
    assert!(spec.exists());
    assert!(logs.exists());
    let spec_contents = std::fs::read_to_string(spec).unwrap();
    assert!(spec_contents.contains("Config"));

    // A second dump into the same directory is refused.
    assert!(backend.dump_enclave(&uuid, &output_dir).await.is_err());

    let _ = std::fs::remove_dir_all(output_dir);
}
