//! Validated label values.

use std::borrow::Cow;

use crate::error::BackendError;

/// The runtime's documented maximum label-value size.
pub const MAX_LABEL_VALUE_BYTES: usize = 65_518;

/// A validated label value.
///
/// Values must be printable (no control characters) and fit the runtime's
/// label-value size limit. Beyond that the charset is intentionally
/// permissive: values carry timestamps, CIDRs, and serialized port specs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelValue(Cow<'static, str>);

impl LabelValue {
    /// Constructs a reserved value from a vetted literal. Only used for the
    /// frozen taxonomy constants below.
    const fn reserved(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    /// Creates a validated label value.
    pub fn new(value: impl Into<String>) -> Result<Self, BackendError> {
        let value = value.into();
        if value.len() > MAX_LABEL_VALUE_BYTES {
            return Err(BackendError::validation(format!(
                "label value is {} bytes long but the max is {MAX_LABEL_VALUE_BYTES}",
                value.len()
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(BackendError::validation(
                "label value contains control characters",
            ));
        }
        Ok(Self(Cow::Owned(value)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LabelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value of the app-id label on every resource we create.
pub const APP_ID_LABEL_VALUE: LabelValue = LabelValue::reserved("enclaved");

// Container types.
pub const API_CONTAINER_TYPE_LABEL_VALUE: LabelValue = LabelValue::reserved("api-container");
pub const USER_SERVICE_TYPE_LABEL_VALUE: LabelValue = LabelValue::reserved("user-service");
pub const NETWORKING_SIDECAR_TYPE_LABEL_VALUE: LabelValue =
    LabelValue::reserved("networking-sidecar");
pub const LOGS_COLLECTOR_TYPE_LABEL_VALUE: LabelValue = LabelValue::reserved("logs-collector");
pub const LOGS_AGGREGATOR_TYPE_LABEL_VALUE: LabelValue = LabelValue::reserved("logs-aggregator");
pub const REVERSE_PROXY_TYPE_LABEL_VALUE: LabelValue = LabelValue::reserved("reverse-proxy");

// Volume types.
pub const ENCLAVE_DATA_VOLUME_TYPE_LABEL_VALUE: LabelValue = LabelValue::reserved("enclave-data");
pub const LOGS_COLLECTOR_VOLUME_TYPE_LABEL_VALUE: LabelValue =
    LabelValue::reserved("logs-collector-data");
pub const FILES_ARTIFACT_EXPANSION_VOLUME_TYPE_LABEL_VALUE: LabelValue =
    LabelValue::reserved("files-artifact-expansion");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_and_cidrs_are_valid_values() {
        LabelValue::new("2024-05-01T12:30:00+00:00").unwrap();
        LabelValue::new("172.23.0.0/22").unwrap();
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(LabelValue::new("line\nbreak").is_err());
    }

    #[test]
    fn oversized_values_are_rejected() {
        assert!(LabelValue::new("x".repeat(MAX_LABEL_VALUE_BYTES + 1)).is_err());
        LabelValue::new("x".repeat(MAX_LABEL_VALUE_BYTES)).unwrap();
    }
}
