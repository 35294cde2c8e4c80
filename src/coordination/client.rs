//! Capability trait and data types for the coordination store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Identity a service instance advertises to the store. Immutable after
/// construction; created once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Globally unique id of this instance.
    pub id: String,
    /// Base address (`http://host:port`) reachable for health checks.
    pub address: String,
}

/// HTTP health check the store runs against a registered instance.
#[derive(Debug, Clone)]
pub struct HealthCheckSpec {
    pub name: String,
    /// Full URL the store probes.
    pub http: String,
    pub method: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Registration record for the agent catalog.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    pub identity: ServiceIdentity,
    /// Logical service name shared by all peers.
    pub name: String,
    pub tags: Vec<String>,
    pub check: HealthCheckSpec,
}

/// A TTL session held with the store. The store deletes the session (and
/// releases any keys it guards) when the TTL expires without a renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub ttl: Duration,
}

/// Catalog entry for a sibling instance, produced transiently by discovery
/// queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub service_id: String,
    /// Aggregated health across all of the instance's checks.
    pub healthy: bool,
}

/// Failure talking to the coordination store.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        endpoint: &'static str,
        reason: String,
    },
    /// Store-reported failure with no further structure. Also what the
    /// scripted test double produces.
    #[error("{0}")]
    Store(String),
}

/// The store operations the service depends on. One method per store call;
/// every call is independently atomic per the store's contract.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Registers (or re-registers) this instance and its health check.
    /// Idempotent upsert keyed by the registration id.
    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), ClientError>;

    /// Removes the registration. Safe to call even if never registered.
    async fn deregister_service(&self, service_id: &str) -> Result<(), ClientError>;

    /// Creates a new TTL session, returning its id. `delete_on_expire`
    /// requests that the store delete guarded keys when the session dies.
    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
        delete_on_expire: bool,
    ) -> Result<String, ClientError>;

    /// Renews a session. `Ok(None)` means the session no longer exists
    /// (expired or deleted) — a valid outcome, not an error: the caller must
    /// treat the session as unusable but is not expected to abort.
    async fn renew_session(&self, session_id: &str) -> Result<Option<Session>, ClientError>;

    /// Attempts to acquire `key` under `session_id` with `value` as the
    /// holder payload. Returns true iff this call caused or confirmed this
    /// session to hold the key.
    async fn acquire_lock(
        &self,
        key: &str,
        value: &[u8],
        session_id: &str,
    ) -> Result<bool, ClientError>;

    /// Lists all registered service names with their tags.
    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>, ClientError>;

    /// Lists the instances of one service with their aggregated health.
    async fn list_service_instances(&self, name: &str) -> Result<Vec<PeerRecord>, ClientError>;
}
