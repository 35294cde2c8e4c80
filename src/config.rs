//! Runtime configuration for a single beacon instance.

use anyhow::{bail, Result};
use std::time::Duration;

/// Owned configuration assembled from the command line, passed by reference
/// into every component constructor.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Unique per-instance identifier; combined with `service_name` to form
    /// the registered service id.
    pub instance_id: String,
    /// TCP port the health endpoint listens on.
    pub port: u16,
    /// Logical service name shared by every peer instance.
    pub service_name: String,
    /// Base address of the coordination agent, e.g. `http://consul-agent:8500`.
    pub consul_addr: String,
    /// Hostname peers and the coordination store reach this instance on.
    pub advertise_host: String,
    /// Cadence of the renew/acquire loop and the discovery poller.
    pub tick_interval: Duration,
    /// Session TTL requested from the store.
    pub session_ttl: Duration,
    /// Catalog tags attached to the registration.
    pub tags: Vec<String>,
    /// Forces the health endpoint to report failure.
    pub unhealthy: bool,
}

impl ServiceConfig {
    /// Globally unique service id registered with the store.
    pub fn service_id(&self) -> String {
        format!("{}-{}", self.service_name, self.instance_id)
    }

    /// Base address the store's health checker reaches this instance on.
    pub fn address(&self) -> String {
        format!("http://{}:{}", self.advertise_host, self.port)
    }

    /// Well-known key contended by all peers for the leader role. Also used
    /// as the session name so sessions are attributable in the store's UI.
    pub fn lock_key(&self) -> String {
        format!("service/{}/leader", self.service_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_id.is_empty() {
            bail!("instance id must not be empty");
        }
        if self.service_name.is_empty() {
            bail!("service name must not be empty");
        }
        if self.consul_addr.is_empty() {
            bail!("coordination agent address must not be empty");
        }
        if self.tick_interval.is_zero() {
            bail!("tick interval must be greater than zero");
        }
        // The session must survive at least two missed renewal opportunities,
        // otherwise a single slow tick loses leadership.
        if self.session_ttl < self.tick_interval * 2 {
            bail!(
                "session TTL ({:?}) must be at least twice the tick interval ({:?})",
                self.session_ttl,
                self.tick_interval
            );
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServiceConfig {
    ServiceConfig {
        instance_id: "test".to_string(),
        port: 0,
        service_name: "beacon".to_string(),
        consul_addr: "http://127.0.0.1:8500".to_string(),
        advertise_host: "beacon-test".to_string(),
        tick_interval: Duration::from_millis(1),
        session_ttl: Duration::from_secs(60),
        tags: vec!["api".to_string()],
        unhealthy: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_identity_fields() {
        let config = test_config();
        assert_eq!(config.service_id(), "beacon-test");
        assert_eq!(config.address(), "http://beacon-test:0");
        assert_eq!(config.lock_key(), "service/beacon/leader");
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_ttl() {
        let mut config = test_config();
        config.tick_interval = Duration::from_secs(30);
        config.session_ttl = Duration::from_secs(45);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_id() {
        let mut config = test_config();
        config.instance_id = String::new();
        assert!(config.validate().is_err());
    }
}
