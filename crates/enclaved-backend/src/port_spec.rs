//! Port specifications: one listening port of a container, as identity.

use std::str::FromStr;
use std::time::Duration;

use crate::error::BackendError;

/// Default timeout for a port's availability wait.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Transport protocol of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for TransportProtocol {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(BackendError::port_spec(format!(
                "unrecognized transport protocol '{other}'"
            ))),
        }
    }
}

/// Availability-wait policy for a port.
///
/// This is runtime behavior rather than identity, so it is never serialized
/// into the ports label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWaitConfig {
    /// How long to keep polling before giving up.
    pub timeout: Duration,
}

impl Default for PortWaitConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// A single listening port: number, transport protocol, optional
/// application protocol, optional availability-wait policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    number: u16,
    transport_protocol: TransportProtocol,
    maybe_application_protocol: Option<String>,
    maybe_wait: Option<PortWaitConfig>,
}

impl PortSpec {
    /// Creates a port spec, rejecting port number zero.
    pub fn new(number: u16, transport_protocol: TransportProtocol) -> Result<Self, BackendError> {
        if number == 0 {
            return Err(BackendError::port_spec("port number must be in 1..=65535"));
        }
        Ok(Self {
            number,
            transport_protocol,
            maybe_application_protocol: None,
            maybe_wait: None,
        })
    }

    #[must_use]
    pub fn with_application_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.maybe_application_protocol = Some(protocol.into());
        self
    }

    #[must_use]
    pub fn with_wait(mut self, wait: PortWaitConfig) -> Self {
        self.maybe_wait = Some(wait);
        self
    }

    #[must_use]
    pub fn number(&self) -> u16 {
        self.number
    }

    #[must_use]
    pub fn transport_protocol(&self) -> TransportProtocol {
        self.transport_protocol
    }

    #[must_use]
    pub fn maybe_application_protocol(&self) -> Option<&str> {
        self.maybe_application_protocol.as_deref()
    }

    #[must_use]
    pub fn maybe_wait(&self) -> Option<PortWaitConfig> {
        self.maybe_wait
    }

    /// The runtime's port-map key for this port, e.g. `"8080/tcp"`.
    #[must_use]
    pub fn runtime_port_key(&self) -> String {
        format!("{}/{}", self.number, self.transport_protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_port_number_is_rejected() {
        assert!(PortSpec::new(0, TransportProtocol::Tcp).is_err());
    }

    #[test]
    fn runtime_port_key_format() {
        let spec = PortSpec::new(8080, TransportProtocol::Udp).unwrap();
        assert_eq!(spec.runtime_port_key(), "8080/udp");
    }

    #[test]
    fn transport_protocol_round_trips() {
        for proto in [TransportProtocol::Tcp, TransportProtocol::Udp] {
            assert_eq!(proto.to_string().parse::<TransportProtocol>().unwrap(), proto);
        }
        assert!("sctp".parse::<TransportProtocol>().is_err());
    }
}
