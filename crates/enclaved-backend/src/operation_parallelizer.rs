//! Concurrent fan-out over runtime objects with success/failure partitioning.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use tokio::task::JoinSet;

use crate::error::BackendError;

/// The two disjoint partitions of a fanned-out operation.
///
/// Covers exactly the input object set: every input identifier appears in
/// either `successes` or `failures`, never both, never neither.
#[derive(Debug)]
pub struct OperationResults<K: Ord> {
    pub successes: BTreeSet<K>,
    pub failures: BTreeMap<K, BackendError>,
}

impl<K: Ord> Default for OperationResults<K> {
    fn default() -> Self {
        Self {
            successes: BTreeSet::new(),
            failures: BTreeMap::new(),
        }
    }
}

impl<K: Ord> OperationResults<K> {
    /// True when no operation failed.
    #[must_use]
    pub fn is_all_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs `operation` concurrently across every object ID, waiting for all of
/// them before returning.
///
/// Each call spins up its own task set; many concurrent top-level calls can
/// oversubscribe the runtime's API, which is accepted rather than solved
/// with a shared pool.
pub async fn run_in_parallel<F, Fut>(
    object_ids: &BTreeSet<String>,
    operation: F,
) -> OperationResults<String>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), BackendError>> + Send + 'static,
{
    let mut join_set = JoinSet::new();
    for object_id in object_ids {
        let object_id = object_id.clone();
        let work = operation(object_id.clone());
        join_set.spawn(async move { (object_id, work.await) });
    }

    let mut results = OperationResults::default();
    let mut pending: BTreeSet<String> = object_ids.clone();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((object_id, Ok(()))) => {
                pending.remove(&object_id);
                results.successes.insert(object_id);
            }
            Ok((object_id, Err(err))) => {
                pending.remove(&object_id);
                results.failures.insert(object_id, err);
            }
            // A panicked task loses its ID; the leftover-ID sweep below
            // keeps the exactly-one-partition invariant intact.
            Err(_join_err) => {}
        }
    }
    for object_id in pending {
        results.failures.insert(
            object_id,
            BackendError::internal("operation task terminated without reporting a result"),
        );
    }
    results
}

/// Runs `operation` across runtime objects and re-keys both partitions by a
/// domain identifier extracted from each object.
///
/// An identifier surfacing in the results that was not part of the request
/// is an engine-internal consistency error, not a retryable condition.
pub async fn run_in_parallel_for_domain_objects<T, K, X, F, Fut>(
    objects_by_runtime_id: &BTreeMap<String, T>,
    key_extractor: X,
    operation: F,
) -> Result<OperationResults<K>, BackendError>
where
    K: Ord,
    X: Fn(&T) -> K,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), BackendError>> + Send + 'static,
{
    let runtime_ids: BTreeSet<String> = objects_by_runtime_id.keys().cloned().collect();
    let raw_results = run_in_parallel(&runtime_ids, operation).await;

    let mut results = OperationResults::default();
    for runtime_id in raw_results.successes {
        let object = objects_by_runtime_id.get(&runtime_id).ok_or_else(|| {
            BackendError::internal(format!(
                "runtime object '{runtime_id}' succeeded but was never requested"
            ))
        })?;
        results.successes.insert(key_extractor(object));
    }
    for (runtime_id, err) in raw_results.failures {
        let object = objects_by_runtime_id.get(&runtime_id).ok_or_else(|| {
            BackendError::internal(format!(
                "runtime object '{runtime_id}' failed but was never requested"
            ))
        })?;
        results.failures.insert(key_extractor(object), err);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn partitions_cover_exactly_the_input_set() {
        let ids: BTreeSet<String> = (0..20).map(|i| format!("obj-{i}")).collect();
        let results = run_in_parallel(&ids, |id| async move {
            // Fail the even-numbered objects.
            let n: usize = id.trim_start_matches("obj-").parse().unwrap();
            if n % 2 == 0 {
                Err(BackendError::validation(format!("injected failure for {id}")))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(results.successes.len(), 10);
        assert_eq!(results.failures.len(), 10);
        let mut covered: BTreeSet<String> = results.successes.clone();
        covered.extend(results.failures.keys().cloned());
        assert_eq!(covered, ids);
    }

    #[tokio::test]
    async fn every_operation_runs_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ids: BTreeSet<String> = (0..8).map(|i| format!("obj-{i}")).collect();
        let results = run_in_parallel(&ids, {
            let counter = Arc::clone(&counter);
            move |_id| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
        .await;
        assert!(results.is_all_success());
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn domain_adapter_rekeys_both_partitions() {
        #[derive(Clone)]
        struct Service {
            uuid: String,
        }
        let objects = BTreeMap::from([
            (
                "container-a".to_string(),
                Service {
                    uuid: "svc-1".to_string(),
                },
            ),
            (
                "container-b".to_string(),
                Service {
                    uuid: "svc-2".to_string(),
                },
            ),
        ]);

        let results = run_in_parallel_for_domain_objects(
            &objects,
            |service| service.uuid.clone(),
            |runtime_id| async move {
                if runtime_id == "container-b" {
                    Err(BackendError::validation("injected"))
                } else {
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

        assert!(results.successes.contains("svc-1"));
        assert!(results.failures.contains_key("svc-2"));
    }
}
