//! Validated label keys.

use std::borrow::Cow;

use crate::error::BackendError;

/// Namespace prefix every reserved key lives under.
pub const LABEL_KEY_NAMESPACE_PREFIX: &str = "enclaved.";

/// Prefix for user-supplied custom labels, so they can never collide with a
/// reserved key.
const USER_CUSTOM_LABEL_PREFIX: &str = "enclaved.custom.";

const MAX_LABEL_KEY_BYTES: usize = 128;

/// A validated label key.
///
/// Keys are restricted to lowercase alphanumerics plus `.`, `-`, `_`, and a
/// bounded length, so they satisfy the runtime's label constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelKey(Cow<'static, str>);

impl LabelKey {
    /// Constructs a reserved key from a vetted literal. Only used for the
    /// frozen taxonomy constants below.
    const fn reserved(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    /// Creates a validated label key.
    pub fn new(key: impl Into<String>) -> Result<Self, BackendError> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self(Cow::Owned(key)))
    }

    /// Creates a key for a user-supplied custom label, namespaced so it
    /// cannot collide with any reserved key.
    pub fn user_custom(suffix: &str) -> Result<Self, BackendError> {
        Self::new(format!("{USER_CUSTOM_LABEL_PREFIX}{suffix}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LabelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_key(key: &str) -> Result<(), BackendError> {
    if key.is_empty() {
        return Err(BackendError::validation("label key must not be empty"));
    }
    if key.len() > MAX_LABEL_KEY_BYTES {
        return Err(BackendError::validation(format!(
            "label key '{key}' is {} bytes long but the max is {MAX_LABEL_KEY_BYTES}",
            key.len()
        )));
    }
    if let Some(bad) = key
        .bytes()
        .find(|b| !(b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_')))
    {
        return Err(BackendError::validation(format!(
            "label key '{key}' contains disallowed character '{}'",
            bad as char
        )));
    }
    Ok(())
}

/// Identifies resources created by this application.
pub const APP_ID_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.app-id");
/// Which kind of container a container is.
pub const CONTAINER_TYPE_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.container-type");
/// Which kind of volume a volume is.
pub const VOLUME_TYPE_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.volume-type");
/// Human-oriented identifier of the resource (e.g. service name).
pub const ID_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.id");
/// Globally unique identifier of the resource.
pub const GUID_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.guid");
/// UUID of the enclave a resource belongs to.
pub const ENCLAVE_UUID_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.enclave-id");
/// Human name of the enclave, stored only here.
pub const ENCLAVE_NAME_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.enclave-name");
/// RFC 3339 creation timestamp of the enclave.
pub const ENCLAVE_CREATION_TIME_LABEL_KEY: LabelKey =
    LabelKey::reserved("enclaved.enclave-creation-time");
/// Serialized port specs of a container.
pub const PORT_SPECS_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.ports");
/// Static private IP of a container inside its enclave network.
pub const PRIVATE_IP_LABEL_KEY: LabelKey = LabelKey::reserved("enclaved.private-ip");
/// UUID of the user service an auxiliary resource belongs to.
pub const USER_SERVICE_GUID_LABEL_KEY: LabelKey =
    LabelKey::reserved("enclaved.user-service-guid");
