//! The label/name taxonomy that makes the container runtime the
//! system-of-record for resource discovery.
//!
//! Every resource the engine creates is tagged with labels from a reserved
//! vocabulary under the `enclaved.` namespace prefix. The key strings and
//! type-value strings are frozen: changing any of them orphans resources
//! created by previous versions, so backward-compat tests pin them
//! byte-for-byte.
//!
//! Attribute computation is deterministic: the same domain identifiers
//! always yield the same name and label set, which is what makes
//! re-discovery idempotent. The one exception is resources that need a
//! fresh synthetic identifier (a files-artifact expansion volume), which
//! generate a UUID at computation time.

mod label_key;
mod label_value;
mod object_name;
pub mod port_spec_serializer;
mod provider;

pub use label_key::{
    LabelKey, APP_ID_LABEL_KEY, CONTAINER_TYPE_LABEL_KEY, ENCLAVE_CREATION_TIME_LABEL_KEY,
    LABEL_KEY_NAMESPACE_PREFIX,
    ENCLAVE_NAME_LABEL_KEY, ENCLAVE_UUID_LABEL_KEY, GUID_LABEL_KEY, ID_LABEL_KEY,
    PORT_SPECS_LABEL_KEY, PRIVATE_IP_LABEL_KEY, USER_SERVICE_GUID_LABEL_KEY,
    VOLUME_TYPE_LABEL_KEY,
};
pub use label_value::{
    LabelValue, API_CONTAINER_TYPE_LABEL_VALUE, APP_ID_LABEL_VALUE,
    ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE, FILES_ARTIFACT_EXPANSION_VOLUME_TYPE_LABEL_VALUE,
    LOGS_AGGREGATOR_TYPE_LABEL_VALUE, LOGS_COLLECTOR_TYPE_LABEL_VALUE,
    LOGS_COLLECTOR_VOLUME_TYPE_LABEL_VALUE, MAX_LABEL_VALUE_BYTES,
    NETWORKING_SIDECAR_TYPE_LABEL_VALUE, REVERSE_PROXY_TYPE_LABEL_VALUE,
    USER_SERVICE_TYPE_LABEL_VALUE,
};
pub use object_name::{ObjectName, OBJECT_NAME_ELEMENT_SEPARATOR};
pub use provider::{EnclaveObjectAttributesProvider, ObjectAttributes, ObjectAttributesProvider};

#[cfg(test)]
mod backward_compat_tests {
    use super::*;

    // The label wire format must remain byte-stable across versions: a
    // changed key or type value silently orphans every resource created by
    // an older release. Each reserved string is pinned here.

    #[test]
    fn reserved_label_keys_are_frozen() {
        assert_eq!(APP_ID_LABEL_KEY.as_str(), "enclaved.app-id");
        assert_eq!(CONTAINER_TYPE_LABEL_KEY.as_str(), "enclaved.container-type");
        assert_eq!(VOLUME_TYPE_LABEL_KEY.as_str(), "enclaved.volume-type");
        assert_eq!(ID_LABEL_KEY.as_str(), "enclaved.id");
        assert_eq!(GUID_LABEL_KEY.as_str(), "enclaved.guid");
        assert_eq!(ENCLAVE_UUID_LABEL_KEY.as_str(), "enclaved.enclave-id");
        assert_eq!(ENCLAVE_NAME_LABEL_KEY.as_str(), "enclaved.enclave-name");
        assert_eq!(
            ENCLAVE_CREATION_TIME_LABEL_KEY.as_str(),
            "enclaved.enclave-creation-time"
        );
        assert_eq!(PORT_SPECS_LABEL_KEY.as_str(), "enclaved.ports");
        assert_eq!(PRIVATE_IP_LABEL_KEY.as_str(), "enclaved.private-ip");
        assert_eq!(
            USER_SERVICE_GUID_LABEL_KEY.as_str(),
            "enclaved.user-service-guid"
        );
    }

    #[test]
    fn app_id_label_value_is_frozen() {
        assert_eq!(APP_ID_LABEL_VALUE.as_str(), "enclaved");
    }

    #[test]
    fn container_type_label_values_are_frozen() {
        assert_eq!(API_CONTAINER_TYPE_LABEL_VALUE.as_str(), "api-container");
        assert_eq!(USER_SERVICE_TYPE_LABEL_VALUE.as_str(), "user-service");
        assert_eq!(
            NETWORKING_SIDECAR_TYPE_LABEL_VALUE.as_str(),
            "networking-sidecar"
        );
        assert_eq!(LOGS_COLLECTOR_TYPE_LABEL_VALUE.as_str(), "logs-collector");
        assert_eq!(LOGS_AGGREGATOR_TYPE_LABEL_VALUE.as_str(), "logs-aggregator");
        assert_eq!(REVERSE_PROXY_TYPE_LABEL_VALUE.as_str(), "reverse-proxy");
    }

    #[test]
    fn volume_type_label_values_are_frozen() {
        assert_eq!(ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE.as_str(), "enclave-data");
        assert_eq!(
            LOGS_COLLECTOR_VOLUME_TYPE_LABEL_VALUE.as_str(),
            "logs-collector-data"
        );
        assert_eq!(
            FILES_ARTIFACT_EXPANSION_VOLUME_TYPE_LABEL_VALUE.as_str(),
            "files-artifact-expansion"
        );
    }
}
