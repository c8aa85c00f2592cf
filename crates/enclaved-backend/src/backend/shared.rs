//! Helpers shared by every lifecycle function.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use enclaved_docker::{Container, ContainerRuntime, ContainerStatus, HostPortBinding};
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::objects::container::ContainerState;
use crate::port_spec::{PortSpec, TransportProtocol};

/// The is-running determiner: maps every runtime container status to
/// whether the container counts as running.
///
/// The match is exhaustive on purpose; adding a runtime status without
/// classifying it here is a compile error, and a unit test pins the
/// classification of every current value.
#[must_use]
pub fn is_container_running(status: ContainerStatus) -> bool {
    match status {
        ContainerStatus::Running | ContainerStatus::Restarting => true,
        ContainerStatus::Created
        | ContainerStatus::Paused
        | ContainerStatus::Removing
        | ContainerStatus::Exited
        | ContainerStatus::Dead => false,
    }
}

/// Collapses a runtime status into the domain container state.
pub(crate) fn container_state_of(status: ContainerStatus) -> ContainerState {
    if is_container_running(status) {
        ContainerState::Running
    } else {
        ContainerState::Stopped
    }
}

/// Polls a newly started container until its port is reachable.
///
/// Runs `netstat` inside the container through the runtime's exec API with
/// bounded retries and a fixed inter-retry delay. A container whose port
/// never shows up is considered failed; the caller kills it.
pub(crate) async fn wait_for_port_availability(
    runtime: &Arc<dyn ContainerRuntime>,
    container_id: &str,
    port_spec: &PortSpec,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<()> {
    let port_num = port_spec.number();
    let check_cmd = match port_spec.transport_protocol() {
        TransportProtocol::Tcp => {
            format!("netstat -anp tcp | grep LISTEN | grep -q {port_num}")
        }
        TransportProtocol::Udp => format!("netstat -anp udp | grep -q {port_num}"),
    };
    let command = vec!["sh".to_string(), "-c".to_string(), check_cmd];

    for attempt in 0..max_retries {
        match runtime.exec_command(container_id, &command).await {
            Ok(exec_result) if exec_result.exit_code == 0 => return Ok(()),
            Ok(exec_result) => {
                debug!(
                    container_id,
                    port_num,
                    attempt,
                    exit_code = exec_result.exit_code,
                    "port not yet available"
                );
            }
            Err(err) => {
                debug!(container_id, port_num, attempt, %err, "availability check errored");
            }
        }
        if attempt + 1 < max_retries {
            tokio::time::sleep(retry_delay).await;
        }
    }

    Err(BackendError::timeout(format!(
        "port {port_num}/{} of container '{container_id}' never became available after \
         {max_retries} checks spaced {retry_delay:?} apart",
        port_spec.transport_protocol(),
    )))
}

/// Recovers the host-side (IP, port spec) for a private port from a
/// container's published-port bindings.
pub(crate) fn public_port_binding_for(
    private_port: &PortSpec,
    host_port_bindings: &std::collections::HashMap<String, HostPortBinding>,
) -> Result<(Ipv4Addr, PortSpec)> {
    let key = private_port.runtime_port_key();
    let binding = host_port_bindings.get(&key).ok_or_else(|| {
        BackendError::not_found(format!("host binding for container port '{key}'"))
    })?;
    let mut public_spec = PortSpec::new(binding.host_port, private_port.transport_protocol())?;
    if let Some(application_protocol) = private_port.maybe_application_protocol() {
        public_spec = public_spec.with_application_protocol(application_protocol);
    }
    Ok((binding.host_ip, public_spec))
}

/// Reads a required label off a runtime container.
pub(crate) fn required_label<'a>(container: &'a Container, label_key: &str) -> Result<&'a str> {
    container
        .labels
        .get(label_key)
        .map(String::as_str)
        .ok_or_else(|| {
            BackendError::internal(format!(
                "expected container '{}' to carry label '{label_key}' but it doesn't",
                container.id
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determiner_covers_every_status_exactly_once() {
        // Pin the classification of every declared runtime status; the
        // match in is_container_running keeps the table complete.
        let expectations = [
            (ContainerStatus::Created, false),
            (ContainerStatus::Running, true),
            (ContainerStatus::Paused, false),
            (ContainerStatus::Restarting, true),
            (ContainerStatus::Removing, false),
            (ContainerStatus::Exited, false),
            (ContainerStatus::Dead, false),
        ];
        assert_eq!(expectations.len(), ContainerStatus::ALL.len());
        for (status, expected) in expectations {
            assert_eq!(
                is_container_running(status),
                expected,
                "status {status} misclassified"
            );
        }
    }

    #[test]
    fn public_binding_lookup_carries_the_application_protocol() {
        let private = PortSpec::new(8080, TransportProtocol::Tcp)
            .unwrap()
            .with_application_protocol("http");
        let bindings = std::collections::HashMap::from([(
            "8080/tcp".to_string(),
            HostPortBinding {
                host_ip: Ipv4Addr::UNSPECIFIED,
                host_port: 49153,
            },
        )]);
        let (_, public) = public_port_binding_for(&private, &bindings).unwrap();
        assert_eq!(public.number(), 49153);
        assert_eq!(public.maybe_application_protocol(), Some("http"));
    }

    #[test]
    fn missing_binding_is_a_not_found_error() {
        let private = PortSpec::new(8080, TransportProtocol::Tcp).unwrap();
        let err =
            public_port_binding_for(&private, &std::collections::HashMap::new()).unwrap_err();
        assert!(err.is_not_found());
    }
}
