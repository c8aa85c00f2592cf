//! Subnet-allocator behavior against the in-memory runtime.

mod common;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::MockRuntime;
use enclaved_backend::NetworkAllocator;
use enclaved_docker::ContainerRuntime;

fn allocator_over(runtime: &Arc<MockRuntime>) -> NetworkAllocator {
    NetworkAllocator::with_retry_policy(
        Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
        3,
        Duration::from_millis(5),
    )
}

#[tokio::test]
async fn first_allocation_takes_the_first_slice_and_its_first_address() {
    let runtime = MockRuntime::new();
    let allocator = allocator_over(&runtime);

    let allocated = allocator
        .create_new_network("encl-first", HashMap::new())
        .await
        .unwrap();

    assert_eq!(allocated.subnet.network(), Ipv4Addr::new(172, 23, 0, 0));
    assert_eq!(allocated.subnet.prefix(), 22);
    assert_eq!(allocated.gateway_ip, Ipv4Addr::new(172, 23, 0, 1));
}

#[tokio::test]
async fn sixty_four_allocations_are_distinct_then_the_block_is_exhausted() {
    let runtime = MockRuntime::new();
    let allocator = allocator_over(&runtime);

    let mut subnets = Vec::new();
    for i in 0..64 {
        let allocated = allocator
            .create_new_network(&format!("encl-{i}"), HashMap::new())
            .await
            .unwrap_or_else(|err| panic!("allocation {i} failed: {err}"));
        subnets.push(allocated.subnet);
    }

    for (i, first) in subnets.iter().enumerate() {
        for second in &subnets[i + 1..] {
            assert!(
                !first.contains(second.network()) && !second.contains(first.network()),
                "slices {first} and {second} overlap"
            );
        }
    }

    let exhausted = allocator
        .create_new_network("one-too-many", HashMap::new())
        .await;
    assert!(exhausted.is_err());
}

#[tokio::test]
async fn overlapping_pool_rejection_is_retried() {
    let runtime = MockRuntime::new();
    runtime.overlap_failures_remaining.store(1, Ordering::SeqCst);
    let allocator = allocator_over(&runtime);

    allocator
        .create_new_network("encl-racy", HashMap::new())
        .await
        .unwrap();
    assert_eq!(runtime.network_create_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_overlap_rejections_exhaust_the_retries() {
    let runtime = MockRuntime::new();
    runtime
        .overlap_failures_remaining
        .store(10, Ordering::SeqCst);
    let allocator = allocator_over(&runtime);

    let err = allocator
        .create_new_network("encl-never", HashMap::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("even after 3 attempts"));
    assert_eq!(runtime.network_create_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_recoverable_errors_abort_without_retrying() {
    let runtime = MockRuntime::new();
    *runtime.network_create_error.lock().unwrap() = Some("daemon exploded".to_string());
    let allocator = allocator_over(&runtime);

    let err = allocator
        .create_new_network("encl-doomed", HashMap::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("non-recoverable"));
    assert_eq!(runtime.network_create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn foreign_networks_inside_the_block_are_avoided() {
    let runtime = MockRuntime::new();
    // Something else already squats on the first slice.
    (Arc::clone(&runtime) as Arc<dyn ContainerRuntime>)
        .create_network(
            "preexisting",
            "172.23.0.0/22".parse().unwrap(),
            Ipv4Addr::new(172, 23, 0, 1),
            HashMap::new(),
        )
        .await
        .unwrap();

    let allocator = allocator_over(&runtime);
    let allocated = allocator
        .create_new_network("encl-second", HashMap::new())
        .await
        .unwrap();
    assert_eq!(allocated.subnet.network(), Ipv4Addr::new(172, 23, 4, 0));
}
