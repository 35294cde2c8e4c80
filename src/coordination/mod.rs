//! Client interface to the external coordination store.
//!
//! The store provides the four primitives this service builds on: agent
//! service registration (with an attached health check), TTL sessions,
//! session-guarded key acquisition, and catalog queries.
//!
//! - **Capability trait (`client.rs`)**: the narrow interface the rest of
//!   the service programs against, plus the wire-level data types.
//! - **HTTP adapter (`consul.rs`)**: the real implementation speaking the
//!   Consul agent HTTP API.
//! - **Test double (`mock.rs`)**: scripted per-operation results for tests.

pub mod client;
pub mod consul;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{
    ClientError, CoordinationClient, HealthCheckSpec, PeerRecord, ServiceIdentity,
    ServiceRegistration, Session,
};
pub use consul::ConsulClient;
