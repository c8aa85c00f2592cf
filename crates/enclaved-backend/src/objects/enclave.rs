//! Enclaves: logically isolated execution environments.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable identity of an enclave.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnclaveUuid(String);

impl EnclaveUuid {
    /// Wraps an existing UUID string.
    #[must_use]
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    /// Generates a fresh random UUID (hex, no hyphens, name-safe).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EnclaveUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an enclave, derived from its attached containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnclaveStatus {
    /// Backing network and volume exist but no containers do.
    Empty,
    /// At least one attached container is running.
    Running,
    /// Containers exist but none are running.
    Stopped,
}

impl std::fmt::Display for EnclaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// An enclave as recovered from the runtime's label store.
#[derive(Debug, Clone)]
pub struct Enclave {
    /// Immutable identity.
    pub uuid: EnclaveUuid,
    /// Human name; stored only as a network label, not authoritative.
    pub name: String,
    /// Current status.
    pub status: EnclaveStatus,
    /// Creation time; absent for enclaves created before it was tracked.
    pub creation_time: Option<DateTime<Utc>>,
    /// Whether the enclave runs in production mode.
    pub is_production: bool,
}

/// Disjunctive filters for enclave operations. Empty sets match everything.
#[derive(Debug, Clone, Default)]
pub struct EnclaveFilters {
    pub uuids: BTreeSet<EnclaveUuid>,
    pub statuses: BTreeSet<EnclaveStatus>,
}

impl EnclaveFilters {
    /// Matches every enclave.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches a single enclave by UUID.
    #[must_use]
    pub fn by_uuid(uuid: EnclaveUuid) -> Self {
        Self {
            uuids: BTreeSet::from([uuid]),
            statuses: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn matches_uuid(&self, uuid: &EnclaveUuid) -> bool {
        self.uuids.is_empty() || self.uuids.contains(uuid)
    }

    #[must_use]
    pub fn matches_status(&self, status: EnclaveStatus) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status)
    }
}
