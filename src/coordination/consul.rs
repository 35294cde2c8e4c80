//! HTTP adapter speaking the Consul agent API.
//!
//! Endpoints used, one per [`CoordinationClient`] method:
//! `PUT /v1/agent/service/register`, `PUT /v1/agent/service/deregister/<id>`,
//! `PUT /v1/session/create`, `PUT /v1/session/renew/<id>`,
//! `PUT /v1/kv/<key>?acquire=<session>`, `GET /v1/catalog/services`,
//! `GET /v1/health/service/<name>`.

use super::client::{
    ClientError, CoordinationClient, PeerRecord, ServiceRegistration, Session,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Client-level timeout for every store call. The coordinator imposes no
/// additional per-call timeout beyond this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregated health is passing only when every check reports this status.
const STATUS_PASSING: &str = "passing";

pub struct ConsulClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConsulClient {
    /// Creates a client for the agent at `base_url`
    /// (e.g. `http://consul-agent:8500`).
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(ClientError::Store(
                "coordination agent address must not be empty".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

// Wire types use the store's exact field names.

#[derive(Serialize)]
struct RegisterPayload<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Tags")]
    tags: &'a [String],
    #[serde(rename = "Address")]
    address: &'a str,
    #[serde(rename = "Check")]
    check: CheckPayload<'a>,
}

#[derive(Serialize)]
struct CheckPayload<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "HTTP")]
    http: &'a str,
    #[serde(rename = "Method")]
    method: &'a str,
    #[serde(rename = "Interval")]
    interval: String,
    #[serde(rename = "Timeout")]
    timeout: String,
}

#[derive(Serialize)]
struct SessionCreatePayload<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
}

#[derive(Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct SessionEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "TTL", default)]
    ttl: String,
}

#[derive(Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: HealthService,
    #[serde(rename = "Checks", default)]
    checks: Vec<HealthCheck>,
}

#[derive(Deserialize)]
struct HealthService {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct HealthCheck {
    #[serde(rename = "Status")]
    status: String,
}

fn register_payload(registration: &ServiceRegistration) -> RegisterPayload<'_> {
    RegisterPayload {
        id: &registration.identity.id,
        name: &registration.name,
        tags: &registration.tags,
        address: &registration.identity.address,
        check: CheckPayload {
            name: &registration.check.name,
            http: &registration.check.http,
            method: &registration.check.method,
            interval: go_duration(registration.check.interval),
            timeout: go_duration(registration.check.timeout),
        },
    }
}

/// Renders a duration the way the store's API expects it, e.g. `"30s"`.
fn go_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

fn parse_go_seconds(value: &str) -> Option<Duration> {
    value
        .strip_suffix('s')
        .and_then(|secs| secs.parse().ok())
        .map(Duration::from_secs)
}

fn peer_from_entry(entry: HealthEntry) -> PeerRecord {
    PeerRecord {
        service_id: entry.service.id,
        healthy: entry
            .checks
            .iter()
            .all(|check| check.status == STATUS_PASSING),
    }
}

/// The renew endpoint answers with an array of session entries; a live
/// session is the first entry, an empty array means the session is gone.
fn session_from_entries(entries: Vec<SessionEntry>) -> Option<Session> {
    entries.into_iter().next().map(|entry| Session {
        id: entry.id,
        ttl: parse_go_seconds(&entry.ttl).unwrap_or_default(),
    })
}

fn parse_bool_body(endpoint: &'static str, body: &str) -> Result<bool, ClientError> {
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ClientError::MalformedResponse {
            endpoint,
            reason: format!("expected boolean body, got {:?}", other),
        }),
    }
}

/// Maps non-success statuses to [`ClientError::UnexpectedStatus`].
async fn checked(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::UnexpectedStatus {
        endpoint,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CoordinationClient for ConsulClient {
    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.url("/v1/agent/service/register"))
            .json(&register_payload(registration))
            .send()
            .await?;
        checked("agent/service/register", response).await?;
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.url(&format!("/v1/agent/service/deregister/{}", service_id)))
            .send()
            .await?;
        checked("agent/service/deregister", response).await?;
        Ok(())
    }

    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
        delete_on_expire: bool,
    ) -> Result<String, ClientError> {
        let payload = SessionCreatePayload {
            name,
            behavior: if delete_on_expire { "delete" } else { "release" },
            ttl: go_duration(ttl),
        };
        let response = self
            .http
            .put(self.url("/v1/session/create"))
            .json(&payload)
            .send()
            .await?;
        let created: SessionCreateResponse =
            checked("session/create", response).await?.json().await?;
        Ok(created.id)
    }

    async fn renew_session(&self, session_id: &str) -> Result<Option<Session>, ClientError> {
        let response = self
            .http
            .put(self.url(&format!("/v1/session/renew/{}", session_id)))
            .send()
            .await?;
        // The store answers 404 for a session it no longer knows about.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entries: Vec<SessionEntry> =
            checked("session/renew", response).await?.json().await?;
        Ok(session_from_entries(entries))
    }

    async fn acquire_lock(
        &self,
        key: &str,
        value: &[u8],
        session_id: &str,
    ) -> Result<bool, ClientError> {
        let response = self
            .http
            .put(self.url(&format!("/v1/kv/{}", key)))
            .query(&[("acquire", session_id)])
            .body(value.to_vec())
            .send()
            .await?;
        let body = checked("kv/acquire", response).await?.text().await?;
        parse_bool_body("kv/acquire", &body)
    }

    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        let response = self
            .http
            .get(self.url("/v1/catalog/services"))
            .send()
            .await?;
        let services = checked("catalog/services", response).await?.json().await?;
        Ok(services)
    }

    async fn list_service_instances(&self, name: &str) -> Result<Vec<PeerRecord>, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/v1/health/service/{}", name)))
            .send()
            .await?;
        let entries: Vec<HealthEntry> =
            checked("health/service", response).await?.json().await?;
        Ok(entries.into_iter().map(peer_from_entry).collect())
    }
}
