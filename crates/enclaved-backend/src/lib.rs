//! Resource-lifecycle reconciliation engine for enclaves.
//!
//! This crate turns a Docker-API-compatible container runtime into a
//! resource-tracked orchestration substrate for ephemeral, isolated
//! execution environments ("enclaves"). There is no external database:
//! every created network, volume, and container is tagged through the
//! label taxonomy in [`attributes`], and all state is recovered by
//! querying the runtime for labeled objects.
//!
//! The pieces, leaf to root:
//!
//! - [`attributes`] -- the label/name taxonomy plus the port-spec codec
//!   that make the runtime itself the system of record.
//! - [`network_allocator`] -- deterministic, collision-safe subnet
//!   allocation for enclave networks.
//! - [`free_ip_tracker`] -- per-subnet claim/release address tracking.
//! - [`operation_parallelizer`] -- concurrent fan-out over runtime objects
//!   with success/failure partitioning keyed by domain identifiers.
//! - [`backend`] -- the create/get/stop/destroy state machine for enclaves,
//!   their support containers (API container, logs collector/aggregator,
//!   reverse proxy, networking sidecars), and user services, with ordered
//!   rollback-safe multi-step provisioning.

pub mod attributes;
pub mod backend;
pub mod error;
pub mod free_ip_tracker;
pub mod network_allocator;
pub mod objects;
pub mod operation_parallelizer;
pub mod port_spec;

pub use backend::{BackendConfig, DockerBackend};
pub use error::{BackendError, Result};
pub use free_ip_tracker::FreeIpTracker;
pub use network_allocator::{AllocatedNetwork, NetworkAllocator};
pub use operation_parallelizer::OperationResults;
pub use port_spec::{PortSpec, PortWaitConfig, TransportProtocol};
