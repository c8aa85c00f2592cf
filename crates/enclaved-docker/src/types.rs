//! Runtime-object types returned by [`ContainerRuntime`](crate::ContainerRuntime) queries.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Status of a container as reported by the runtime.
///
/// Mirrors the Docker Engine's container state vocabulary one-to-one. The
/// wire strings are frozen; changing them would break discovery of
/// previously created containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container created but not started.
    Created,
    /// Container is running.
    Running,
    /// Container is paused.
    Paused,
    /// Container is restarting.
    Restarting,
    /// Container is being removed.
    Removing,
    /// Container has exited.
    Exited,
    /// Container is dead (error state).
    Dead,
}

impl ContainerStatus {
    /// Every declared status value, in declaration order.
    ///
    /// Exists so completeness tests can iterate the full enum.
    pub const ALL: [ContainerStatus; 7] = [
        ContainerStatus::Created,
        ContainerStatus::Running,
        ContainerStatus::Paused,
        ContainerStatus::Restarting,
        ContainerStatus::Removing,
        ContainerStatus::Exited,
        ContainerStatus::Dead,
    ];
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ContainerStatus {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "restarting" => Ok(Self::Restarting),
            "removing" => Ok(Self::Removing),
            "exited" => Ok(Self::Exited),
            "dead" => Ok(Self::Dead),
            other => Err(RuntimeError::malformed(format!(
                "unrecognized container state '{other}'"
            ))),
        }
    }
}

/// A port published on the host machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPortBinding {
    /// Host interface IP the port is bound on.
    pub host_ip: Ipv4Addr,
    /// Host port number.
    pub host_port: u16,
}

/// A container as seen through the runtime's list/inspect APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned container ID.
    pub id: String,
    /// Container name, without the runtime's leading slash.
    pub name: String,
    /// Current status.
    pub status: ContainerStatus,
    /// Labels attached at creation.
    pub labels: HashMap<String, String>,
    /// Host bindings for published ports, keyed by `"<num>/<proto>"`.
    pub host_port_bindings: HashMap<String, HostPortBinding>,
}

/// A network as seen through the runtime's list API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Runtime-assigned network ID.
    pub id: String,
    /// Network name.
    pub name: String,
    /// The network's IPv4 subnet, when one is configured.
    pub subnet: Option<Ipv4Network>,
    /// The network's gateway address, when one is configured.
    pub gateway_ip: Option<Ipv4Addr>,
    /// Labels attached at creation.
    pub labels: HashMap<String, String>,
}

/// A named volume as seen through the runtime's list API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name (volumes are addressed by name, not ID).
    pub name: String,
    /// Labels attached at creation.
    pub labels: HashMap<String, String>,
}

/// Captured result of an exec inside a container.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Process exit code.
    pub exit_code: i64,
    /// Combined stdout/stderr, lossily decoded.
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in ContainerStatus::ALL {
            let parsed: ContainerStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!("zombie".parse::<ContainerStatus>().is_err());
    }
}
