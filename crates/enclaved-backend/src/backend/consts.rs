//! Engine-wide constants: well-known names, ports, and images.

/// Host path of the runtime socket, bind-mounted into the API container so
/// it can drive the runtime itself.
pub(crate) const RUNTIME_SOCKET_FILEPATH: &str = "/var/run/docker.sock";

/// The runtime's default bridge network, where the global support
/// containers (logs aggregator, reverse proxy) live.
pub(crate) const BRIDGE_NETWORK_NAME: &str = "bridge";

/// Port ID of the API container's gRPC port in its ports label.
pub(crate) const API_CONTAINER_GRPC_PORT_ID: &str = "grpc";

/// Env var carrying the enclave's production-mode flag on the API container.
pub(crate) const PRODUCTION_MODE_ENV_VAR: &str = "PRODUCTION_MODE";

/// Port IDs of the logs collector's ports in its ports label.
pub(crate) const LOGS_COLLECTOR_TCP_PORT_ID: &str = "tcp";
pub(crate) const LOGS_COLLECTOR_HTTP_PORT_ID: &str = "http";

/// Forward-protocol ingest port of the logs collector.
pub(crate) const LOGS_COLLECTOR_TCP_PORT_NUM: u16 = 24224;
/// Health endpoint port of the logs collector.
pub(crate) const LOGS_COLLECTOR_HTTP_PORT_NUM: u16 = 9712;

/// Network alias the collector is reachable under inside its enclave.
pub(crate) const LOGS_COLLECTOR_NETWORK_ALIAS: &str = "logs-collector";

/// Env vars pointing the collector at the aggregator.
pub(crate) const LOGS_AGGREGATOR_HOST_ENV_VAR: &str = "AGGREGATOR_HOST";
pub(crate) const LOGS_AGGREGATOR_PORT_ENV_VAR: &str = "AGGREGATOR_PORT";

/// Container path the collector buffers under; backed by its volume so
/// buffered entries survive collector restarts.
pub(crate) const LOGS_COLLECTOR_BUFFER_DIRPATH: &str = "/var/log/enclaved-buffer";

/// Port the aggregator listens for forwarded log entries on.
pub(crate) const LOGS_AGGREGATOR_LISTENING_PORT_NUM: u16 = 9714;

/// HTTP port of the reverse proxy.
pub(crate) const REVERSE_PROXY_HTTP_PORT_NUM: u16 = 80;
