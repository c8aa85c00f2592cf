//! In-memory repository of service registrations.
//!
//! Registrations are the one piece of engine state the runtime's label
//! store can't hold: a service's address is reserved before any container
//! exists to label. The repository lives on the engine instance and is
//! kept behind a `find`/`insert`/`remove` surface so a persistent store
//! could replace it without touching the lifecycle call sites.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::{BackendError, Result};
use crate::objects::enclave::EnclaveUuid;
use crate::objects::service::{ServiceName, ServiceRegistration, ServiceUuid};

pub(crate) struct ServiceRegistrationRepository {
    // enclave -> service uuid -> registration
    inner: Mutex<HashMap<EnclaveUuid, HashMap<ServiceUuid, ServiceRegistration>>>,
}

impl ServiceRegistrationRepository {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Records a registration; a duplicate UUID or a duplicate name within
    /// the enclave is an already-exists error.
    pub(crate) async fn insert(&self, registration: ServiceRegistration) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let enclave_registrations = inner
            .entry(registration.enclave_uuid.clone())
            .or_default();
        if enclave_registrations.contains_key(&registration.uuid) {
            return Err(BackendError::already_exists(format!(
                "service registration '{}'",
                registration.uuid
            )));
        }
        if enclave_registrations
            .values()
            .any(|existing| existing.name == registration.name)
        {
            return Err(BackendError::already_exists(format!(
                "service named '{}' in enclave '{}'",
                registration.name, registration.enclave_uuid
            )));
        }
        enclave_registrations.insert(registration.uuid.clone(), registration);
        Ok(())
    }

    pub(crate) async fn get(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
    ) -> Option<ServiceRegistration> {
        self.inner
            .lock()
            .await
            .get(enclave_uuid)
            .and_then(|registrations| registrations.get(service_uuid))
            .cloned()
    }

    pub(crate) async fn find_by_name(
        &self,
        enclave_uuid: &EnclaveUuid,
        name: &ServiceName,
    ) -> Option<ServiceRegistration> {
        self.inner
            .lock()
            .await
            .get(enclave_uuid)
            .and_then(|registrations| {
                registrations
                    .values()
                    .find(|registration| &registration.name == name)
            })
            .cloned()
    }

    /// Removes and returns a registration.
    pub(crate) async fn remove(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
    ) -> Option<ServiceRegistration> {
        self.inner
            .lock()
            .await
            .get_mut(enclave_uuid)
            .and_then(|registrations| registrations.remove(service_uuid))
    }
}
