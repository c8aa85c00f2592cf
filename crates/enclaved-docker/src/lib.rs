//! Container-runtime access layer for `enclaved`.
//!
//! This crate abstracts a Docker-API-compatible container engine behind the
//! [`ContainerRuntime`] trait so that the resource-lifecycle engine never
//! talks to a concrete client library directly. The production implementation
//! is [`DockerRuntimeClient`], backed by `bollard`; tests substitute an
//! in-memory implementation of the same trait.
//!
//! The trait surface is deliberately the union of what the lifecycle engine
//! needs and nothing more: network/volume/container CRUD with labels, exec
//! with captured output, and log streaming. Everything here is stateless --
//! the runtime's own label store is the system of record, and callers re-read
//! it rather than caching.

pub mod args;
pub mod client;
pub mod error;
pub mod runtime;
pub mod types;

pub use args::{CreateAndStartContainerArgs, CreateAndStartContainerArgsBuilder, PortPublishSpec, RestartPolicy};
pub use client::DockerRuntimeClient;
pub use error::{Result, RuntimeError};
pub use runtime::{ContainerRuntime, StartedContainer};
pub use types::{Container, ContainerStatus, ExecResult, HostPortBinding, Network, Volume};
