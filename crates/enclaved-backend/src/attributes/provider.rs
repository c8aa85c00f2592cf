//! Computation of (name, label-set) pairs for every resource kind.
//!
//! Attributes are pure functions of their domain identifiers -- no hidden
//! state, no I/O -- so recomputing them for the same logical resource
//! always yields the same name and labels. The only exception is the
//! files-artifact expansion volume, which needs a fresh synthetic GUID per
//! expansion.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::attributes::label_key::{
    LabelKey, APP_ID_LABEL_KEY, CONTAINER_TYPE_LABEL_KEY, ENCLAVE_CREATION_TIME_LABEL_KEY,
    ENCLAVE_NAME_LABEL_KEY, ENCLAVE_UUID_LABEL_KEY, GUID_LABEL_KEY, ID_LABEL_KEY,
    PORT_SPECS_LABEL_KEY, PRIVATE_IP_LABEL_KEY, USER_SERVICE_GUID_LABEL_KEY,
    VOLUME_TYPE_LABEL_KEY,
};
use crate::attributes::label_value::{
    LabelValue, API_CONTAINER_TYPE_LABEL_VALUE, APP_ID_LABEL_VALUE,
    ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE, FILES_ARTIFACT_EXPANSION_VOLUME_TYPE_LABEL_VALUE,
    LOGS_AGGREGATOR_TYPE_LABEL_VALUE, LOGS_COLLECTOR_TYPE_LABEL_VALUE,
    LOGS_COLLECTOR_VOLUME_TYPE_LABEL_VALUE, NETWORKING_SIDECAR_TYPE_LABEL_VALUE,
    REVERSE_PROXY_TYPE_LABEL_VALUE, USER_SERVICE_TYPE_LABEL_VALUE,
};
use crate::attributes::object_name::ObjectName;
use crate::attributes::port_spec_serializer::serialize_port_specs;
use crate::error::BackendError;
use crate::objects::enclave::EnclaveUuid;
use crate::objects::service::{ServiceName, ServiceUuid};
use crate::port_spec::PortSpec;

const ENCLAVE_NETWORK_NAME_PREFIX: &str = "encl-";
const API_CONTAINER_NAME_FRAGMENT: &str = "enclaved-api";
const ENCLAVE_DATA_VOLUME_NAME_FRAGMENT: &str = "enclaved-data";
const NETWORKING_SIDECAR_NAME_FRAGMENT: &str = "enclaved-networking-sidecar";
const LOGS_COLLECTOR_NAME_FRAGMENT: &str = "enclaved-logs-collector";
const LOGS_COLLECTOR_VOLUME_NAME_FRAGMENT: &str = "enclaved-logs-collector-vol";
const FILES_ARTIFACT_EXPANSION_VOLUME_NAME_FRAGMENT: &str = "enclaved-files-artifact-expansion";
const LOGS_AGGREGATOR_NAME: &str = "enclaved-logs-aggregator";
const REVERSE_PROXY_NAME: &str = "enclaved-reverse-proxy";

/// The deterministic (name, label-set) pair computed for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttributes {
    name: ObjectName,
    labels: HashMap<LabelKey, LabelValue>,
}

impl ObjectAttributes {
    /// Merges the global labels (app identity) with object-specific labels.
    /// A custom label key colliding with a global key is an error.
    fn new(
        name: ObjectName,
        object_labels: HashMap<LabelKey, LabelValue>,
    ) -> Result<Self, BackendError> {
        let mut labels = HashMap::from([(APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE)]);
        for (key, value) in object_labels {
            if labels.contains_key(&key) {
                return Err(BackendError::validation(format!(
                    "label key '{key}' collides with a global label key"
                )));
            }
            labels.insert(key, value);
        }
        Ok(Self { name, labels })
    }

    #[must_use]
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    #[must_use]
    pub fn labels(&self) -> &HashMap<LabelKey, LabelValue> {
        &self.labels
    }

    /// The labels as plain strings, ready for a runtime call.
    #[must_use]
    pub fn label_strings(&self) -> HashMap<String, String> {
        self.labels
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value.as_str().to_string()))
            .collect()
    }
}

/// Provider of attributes for resources that exist outside any enclave.
#[derive(Debug, Clone, Default)]
pub struct ObjectAttributesProvider;

impl ObjectAttributesProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the per-enclave provider for the given enclave UUID.
    pub fn for_enclave(
        &self,
        enclave_uuid: &EnclaveUuid,
    ) -> Result<EnclaveObjectAttributesProvider, BackendError> {
        let enclave_uuid_value = LabelValue::new(enclave_uuid.as_str())?;
        Ok(EnclaveObjectAttributesProvider {
            enclave_uuid: enclave_uuid.clone(),
            enclave_uuid_value,
        })
    }

    /// Attributes for the global logs-aggregator container.
    pub fn for_logs_aggregator(&self) -> Result<ObjectAttributes, BackendError> {
        let name = ObjectName::new(LOGS_AGGREGATOR_NAME)?;
        let labels = HashMap::from([(
            CONTAINER_TYPE_LABEL_KEY,
            LOGS_AGGREGATOR_TYPE_LABEL_VALUE,
        )]);
        ObjectAttributes::new(name, labels)
    }

    /// Attributes for the global reverse-proxy container.
    pub fn for_reverse_proxy(&self) -> Result<ObjectAttributes, BackendError> {
        let name = ObjectName::new(REVERSE_PROXY_NAME)?;
        let labels =
            HashMap::from([(CONTAINER_TYPE_LABEL_KEY, REVERSE_PROXY_TYPE_LABEL_VALUE)]);
        ObjectAttributes::new(name, labels)
    }
}

/// Provider of attributes for resources belonging to one enclave.
#[derive(Debug, Clone)]
pub struct EnclaveObjectAttributesProvider {
    enclave_uuid: EnclaveUuid,
    enclave_uuid_value: LabelValue,
}

impl EnclaveObjectAttributesProvider {
    /// Attributes for the enclave's network.
    pub fn for_enclave_network(
        &self,
        enclave_name: &str,
        creation_time: DateTime<Utc>,
    ) -> Result<ObjectAttributes, BackendError> {
        let name = ObjectName::new(format!("{ENCLAVE_NETWORK_NAME_PREFIX}{enclave_name}"))?;

        // Enclave ID and GUID are the same for an enclave network.
        let mut labels = self.labels_with_id_and_guid(
            self.enclave_uuid.as_str(),
            self.enclave_uuid.as_str(),
        )?;
        labels.insert(
            ENCLAVE_CREATION_TIME_LABEL_KEY,
            LabelValue::new(creation_time.to_rfc3339())?,
        );
        labels.insert(ENCLAVE_NAME_LABEL_KEY, LabelValue::new(enclave_name)?);

        ObjectAttributes::new(name, labels)
    }

    /// Attributes for the enclave's data volume.
    pub fn for_enclave_data_volume(&self) -> Result<ObjectAttributes, BackendError> {
        let name = self.enclave_object_name(&[ENCLAVE_DATA_VOLUME_NAME_FRAGMENT])?;
        let mut labels = self.enclave_labels();
        labels.insert(VOLUME_TYPE_LABEL_KEY, ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE);
        ObjectAttributes::new(name, labels)
    }

    /// Attributes for the enclave's API container.
    pub fn for_api_container(
        &self,
        private_ip: Ipv4Addr,
        private_grpc_port_id: &str,
        private_grpc_port_spec: &PortSpec,
    ) -> Result<ObjectAttributes, BackendError> {
        let name = self.enclave_object_name(&[API_CONTAINER_NAME_FRAGMENT])?;

        let used_ports = BTreeMap::from([(
            private_grpc_port_id.to_string(),
            private_grpc_port_spec.clone(),
        )]);
        let serialized_ports = serialize_port_specs(&used_ports)?;

        let mut labels = self.enclave_labels();
        labels.insert(CONTAINER_TYPE_LABEL_KEY, API_CONTAINER_TYPE_LABEL_VALUE);
        labels.insert(PRIVATE_IP_LABEL_KEY, LabelValue::new(private_ip.to_string())?);
        labels.insert(PORT_SPECS_LABEL_KEY, serialized_ports);

        ObjectAttributes::new(name, labels)
    }

    /// Attributes for a user-service container.
    pub fn for_user_service_container(
        &self,
        service_name: &ServiceName,
        service_uuid: &ServiceUuid,
        private_ip: Ipv4Addr,
        private_ports: &BTreeMap<String, PortSpec>,
        user_labels: &HashMap<String, String>,
    ) -> Result<ObjectAttributes, BackendError> {
        let name =
            ObjectName::from_elements(&[service_name.as_str(), service_uuid.as_str()])?;

        let serialized_ports = serialize_port_specs(private_ports)?;

        let mut labels =
            self.labels_with_id_and_guid(service_name.as_str(), service_uuid.as_str())?;
        labels.insert(CONTAINER_TYPE_LABEL_KEY, USER_SERVICE_TYPE_LABEL_VALUE);
        labels.insert(PORT_SPECS_LABEL_KEY, serialized_ports);
        labels.insert(PRIVATE_IP_LABEL_KEY, LabelValue::new(private_ip.to_string())?);

        for (user_key, user_value) in user_labels {
            let key = LabelKey::user_custom(user_key)?;
            let value = LabelValue::new(user_value.clone())?;
            labels.insert(key, value);
        }

        ObjectAttributes::new(name, labels)
    }

    /// Attributes for a user service's networking-sidecar container.
    pub fn for_networking_sidecar(
        &self,
        service_uuid: &ServiceUuid,
    ) -> Result<ObjectAttributes, BackendError> {
        let name = self
            .enclave_object_name(&[NETWORKING_SIDECAR_NAME_FRAGMENT, service_uuid.as_str()])?;

        let mut labels = self.enclave_labels();
        labels.insert(
            CONTAINER_TYPE_LABEL_KEY,
            NETWORKING_SIDECAR_TYPE_LABEL_VALUE,
        );
        labels.insert(GUID_LABEL_KEY, LabelValue::new(service_uuid.as_str())?);
        labels.insert(
            USER_SERVICE_GUID_LABEL_KEY,
            LabelValue::new(service_uuid.as_str())?,
        );

        ObjectAttributes::new(name, labels)
    }

    /// Attributes for the enclave's logs-collector container.
    pub fn for_logs_collector(
        &self,
        tcp_port_id: &str,
        tcp_port_spec: &PortSpec,
        http_port_id: &str,
        http_port_spec: &PortSpec,
    ) -> Result<ObjectAttributes, BackendError> {
        let name = self.enclave_object_name(&[LOGS_COLLECTOR_NAME_FRAGMENT])?;

        let used_ports = BTreeMap::from([
            (tcp_port_id.to_string(), tcp_port_spec.clone()),
            (http_port_id.to_string(), http_port_spec.clone()),
        ]);
        let serialized_ports = serialize_port_specs(&used_ports)?;

        let mut labels = self.enclave_labels();
        labels.insert(CONTAINER_TYPE_LABEL_KEY, LOGS_COLLECTOR_TYPE_LABEL_VALUE);
        labels.insert(PORT_SPECS_LABEL_KEY, serialized_ports);

        ObjectAttributes::new(name, labels)
    }

    /// Attributes for the logs collector's buffer volume.
    pub fn for_logs_collector_volume(&self) -> Result<ObjectAttributes, BackendError> {
        let name = self.enclave_object_name(&[LOGS_COLLECTOR_VOLUME_NAME_FRAGMENT])?;
        let mut labels = self.enclave_labels();
        labels.insert(
            VOLUME_TYPE_LABEL_KEY,
            LOGS_COLLECTOR_VOLUME_TYPE_LABEL_VALUE,
        );
        ObjectAttributes::new(name, labels)
    }

    /// Attributes for one files-artifact expansion volume.
    ///
    /// Each expansion gets its own volume, so a fresh GUID is generated
    /// here rather than derived from the inputs.
    pub fn for_files_artifact_expansion_volume(
        &self,
        service_uuid: &ServiceUuid,
    ) -> Result<ObjectAttributes, BackendError> {
        let volume_guid = Uuid::new_v4().simple().to_string();
        let name = self.enclave_object_name(&[
            FILES_ARTIFACT_EXPANSION_VOLUME_NAME_FRAGMENT,
            &volume_guid,
        ])?;

        let mut labels = self.enclave_labels();
        labels.insert(GUID_LABEL_KEY, LabelValue::new(volume_guid)?);
        labels.insert(
            USER_SERVICE_GUID_LABEL_KEY,
            LabelValue::new(service_uuid.as_str())?,
        );
        labels.insert(
            VOLUME_TYPE_LABEL_KEY,
            FILES_ARTIFACT_EXPANSION_VOLUME_TYPE_LABEL_VALUE,
        );

        ObjectAttributes::new(name, labels)
    }

    // Composes an enclave-object name: the given elements with the enclave
    // UUID appended last.
    fn enclave_object_name(&self, elements: &[&str]) -> Result<ObjectName, BackendError> {
        let mut all_elements = elements.to_vec();
        all_elements.push(self.enclave_uuid.as_str());
        ObjectName::from_elements(&all_elements)
    }

    fn enclave_labels(&self) -> HashMap<LabelKey, LabelValue> {
        HashMap::from([(ENCLAVE_UUID_LABEL_KEY, self.enclave_uuid_value.clone())])
    }

    fn labels_with_id_and_guid(
        &self,
        id: &str,
        guid: &str,
    ) -> Result<HashMap<LabelKey, LabelValue>, BackendError> {
        let mut labels = self.enclave_labels();
        labels.insert(ID_LABEL_KEY, LabelValue::new(id)?);
        labels.insert(GUID_LABEL_KEY, LabelValue::new(guid)?);
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_spec::TransportProtocol;

    fn enclave_provider() -> EnclaveObjectAttributesProvider {
        ObjectAttributesProvider::new()
            .for_enclave(&EnclaveUuid::new("65d2fb6d6732aaaa65d2fb6d6732aaaa"))
            .unwrap()
    }

    #[test]
    fn same_inputs_always_yield_the_same_attributes() {
        let provider = enclave_provider();
        let ip = Ipv4Addr::new(172, 23, 0, 3);
        let grpc = PortSpec::new(7443, TransportProtocol::Tcp).unwrap();
        let first = provider.for_api_container(ip, "grpc", &grpc).unwrap();
        let second = provider.for_api_container(ip, "grpc", &grpc).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn every_enclave_object_carries_app_id_and_enclave_labels() {
        let provider = enclave_provider();
        let attrs = provider.for_enclave_data_volume().unwrap();
        let labels = attrs.label_strings();
        assert_eq!(labels["enclaved.app-id"], "enclaved");
        assert_eq!(
            labels["enclaved.enclave-id"],
            "65d2fb6d6732aaaa65d2fb6d6732aaaa"
        );
        assert_eq!(labels["enclaved.volume-type"], "enclave-data");
    }

    #[test]
    fn enclave_network_labels_carry_name_and_creation_time() {
        let provider = enclave_provider();
        let creation_time = Utc::now();
        let attrs = provider.for_enclave_network("test", creation_time).unwrap();
        assert_eq!(attrs.name().as_str(), "encl-test");
        let labels = attrs.label_strings();
        assert_eq!(labels["enclaved.enclave-name"], "test");
        assert_eq!(
            labels["enclaved.enclave-creation-time"],
            creation_time.to_rfc3339()
        );
    }

    #[test]
    fn object_labels_colliding_with_global_keys_are_rejected() {
        let name = ObjectName::new("whatever").unwrap();
        let colliding = HashMap::from([(APP_ID_LABEL_KEY, APP_ID_LABEL_VALUE)]);
        assert!(ObjectAttributes::new(name, colliding).is_err());
    }

    #[test]
    fn user_service_names_compose_name_and_uuid() {
        let provider = enclave_provider();
        let attrs = provider
            .for_user_service_container(
                &ServiceName::new("postgres"),
                &ServiceUuid::new("11112222333344445555666677778888"),
                Ipv4Addr::new(172, 23, 0, 5),
                &BTreeMap::new(),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(
            attrs.name().as_str(),
            "postgres--11112222333344445555666677778888"
        );
    }

    #[test]
    fn expansion_volumes_get_distinct_guids() {
        let provider = enclave_provider();
        let service_uuid = ServiceUuid::new("11112222333344445555666677778888");
        let first = provider
            .for_files_artifact_expansion_volume(&service_uuid)
            .unwrap();
        let second = provider
            .for_files_artifact_expansion_volume(&service_uuid)
            .unwrap();
        assert_ne!(first.name(), second.name());
    }
}
