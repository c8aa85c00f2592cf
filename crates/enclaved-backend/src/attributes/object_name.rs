//! Validated runtime-object names.

use crate::error::BackendError;

/// Separator between the elements of a composed object name.
pub const OBJECT_NAME_ELEMENT_SEPARATOR: &str = "--";

const MAX_OBJECT_NAME_BYTES: usize = 128;

/// A validated name for a runtime object (container, network, volume).
///
/// Names must satisfy the runtime's naming constraints: lowercase
/// alphanumerics plus `.`, `-`, `_`, starting with an alphanumeric, and a
/// bounded length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName(String);

impl ObjectName {
    /// Creates a validated object name.
    pub fn new(name: impl Into<String>) -> Result<Self, BackendError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self(name))
    }

    /// Composes a name from elements joined with
    /// [`OBJECT_NAME_ELEMENT_SEPARATOR`].
    pub fn from_elements(elements: &[&str]) -> Result<Self, BackendError> {
        Self::new(elements.join(OBJECT_NAME_ELEMENT_SEPARATOR))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_name(name: &str) -> Result<(), BackendError> {
    if name.is_empty() {
        return Err(BackendError::validation("object name must not be empty"));
    }
    if name.len() > MAX_OBJECT_NAME_BYTES {
        return Err(BackendError::validation(format!(
            "object name '{name}' is {} bytes long but the max is {MAX_OBJECT_NAME_BYTES}",
            name.len()
        )));
    }
    let first = name.as_bytes()[0];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(BackendError::validation(format!(
            "object name '{name}' must start with a lowercase alphanumeric character"
        )));
    }
    if let Some(bad) = name
        .bytes()
        .find(|b| !(b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_')))
    {
        return Err(BackendError::validation(format!(
            "object name '{name}' contains disallowed character '{}'",
            bad as char
        )));
    }
    Ok(())
}
