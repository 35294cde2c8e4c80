//! Periodic discovery of healthy sibling instances.
//!
//! Runs independently of the leader coordinator on the same cadence;
//! discovery results never influence leadership. A store error terminates
//! the poller through the shared error channel, mirroring the coordinator's
//! fail-fast policy.

use crate::config::ServiceConfig;
use crate::coordination::{CoordinationClient, PeerRecord};
use crate::service::{report_fatal, FatalError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

pub struct DiscoveryPoller<C> {
    client: Arc<C>,
    service_name: String,
    service_id: String,
}

impl<C: CoordinationClient + 'static> DiscoveryPoller<C> {
    pub fn new(client: Arc<C>, config: &ServiceConfig) -> Self {
        Self {
            client,
            service_name: config.service_name.clone(),
            service_id: config.service_id(),
        }
    }

    /// Spawns the poll loop. The task ends on cancellation or after
    /// reporting a fatal error.
    pub fn spawn(
        self,
        tick_interval: Duration,
        errors: mpsc::Sender<FatalError>,
        shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(tick_interval, errors, shutdown))
    }

    async fn run(
        self,
        tick_interval: Duration,
        errors: mpsc::Sender<FatalError>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::debug!("discovery poller stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            match self.poll().await {
                Ok(peers) => {
                    for peer in peers {
                        tracing::info!(peer = %peer.service_id, "discovered new service");
                    }
                }
                Err(fatal) => {
                    report_fatal(&errors, fatal);
                    return;
                }
            }
        }
    }

    /// Lists the catalog and returns the healthy siblings of this instance.
    async fn poll(&self) -> Result<Vec<PeerRecord>, FatalError> {
        let services = self
            .client
            .list_services()
            .await
            .map_err(FatalError::Discovery)?;

        let mut discovered = Vec::new();
        for name in services.keys().filter(|name| **name == self.service_name) {
            let instances = self
                .client
                .list_service_instances(name)
                .await
                .map_err(FatalError::Discovery)?;
            discovered.extend(select_peers(&self.service_id, instances));
        }
        Ok(discovered)
    }
}

/// Filters catalog records down to healthy instances other than ourselves.
fn select_peers(self_id: &str, records: Vec<PeerRecord>) -> Vec<PeerRecord> {
    records
        .into_iter()
        .filter(|record| record.service_id != self_id && record.healthy)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::coordination::mock::MockClient;
    use crate::coordination::ClientError;
    use std::collections::HashMap;
    use std::error::Error as _;
    use std::sync::atomic::Ordering;

    fn record(id: &str, healthy: bool) -> PeerRecord {
        PeerRecord {
            service_id: id.to_string(),
            healthy,
        }
    }

    fn catalog_with_self() -> HashMap<String, Vec<String>> {
        let mut services = HashMap::new();
        services.insert("beacon".to_string(), vec!["api".to_string()]);
        services.insert("other-service".to_string(), Vec::new());
        services
    }

    #[test]
    fn select_peers_excludes_self_and_unhealthy_instances() {
        let records = vec![
            record("beacon-test", true),
            record("beacon-2", true),
            record("beacon-3", false),
        ];

        let peers = select_peers("beacon-test", records);

        assert_eq!(peers, vec![record("beacon-2", true)]);
    }

    #[tokio::test]
    async fn poll_only_queries_instances_of_our_service_name() {
        let mock = MockClient {
            list_services_fn: Some(Box::new(|| Ok(catalog_with_self()))),
            list_instances_fn: Some(Box::new(|| {
                Ok(vec![record("beacon-test", true), record("beacon-2", true)])
            })),
            ..Default::default()
        };
        let client = Arc::new(mock);
        let poller = DiscoveryPoller::new(client.clone(), &test_config());

        let peers = poller.poll().await.unwrap();

        assert_eq!(peers, vec![record("beacon-2", true)]);
        assert_eq!(client.calls.list_instances.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn catalog_error_is_fatal_and_stops_the_poller() {
        let mock = MockClient {
            list_services_fn: Some(Box::new(|| {
                Err(ClientError::Store("catalog services error".to_string()))
            })),
            ..Default::default()
        };
        let client = Arc::new(mock);
        let poller = DiscoveryPoller::new(client.clone(), &test_config());
        let (errors_tx, mut errors_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = poller.spawn(
            Duration::from_millis(1),
            errors_tx,
            shutdown_tx.subscribe(),
        );
        handle.await.unwrap();

        let fatal = errors_rx.recv().await.unwrap();
        assert!(matches!(fatal, FatalError::Discovery(_)));
        assert_eq!(
            fatal.source().unwrap().to_string(),
            "catalog services error"
        );
        assert!(errors_rx.try_recv().is_err());
        assert_eq!(client.calls.list_instances.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn instance_listing_error_is_fatal() {
        let mock = MockClient {
            list_services_fn: Some(Box::new(|| Ok(catalog_with_self()))),
            list_instances_fn: Some(Box::new(|| {
                Err(ClientError::Store("catalog service error".to_string()))
            })),
            ..Default::default()
        };
        let poller = DiscoveryPoller::new(Arc::new(mock), &test_config());
        let (errors_tx, mut errors_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = poller.spawn(
            Duration::from_millis(1),
            errors_tx,
            shutdown_tx.subscribe(),
        );
        handle.await.unwrap();

        let fatal = errors_rx.recv().await.unwrap();
        assert!(matches!(fatal, FatalError::Discovery(_)));
    }

    #[tokio::test]
    async fn healthy_polls_run_until_cancelled_without_errors() {
        let mock = MockClient {
            list_services_fn: Some(Box::new(|| Ok(catalog_with_self()))),
            list_instances_fn: Some(Box::new(|| Ok(vec![record("beacon-2", true)]))),
            ..Default::default()
        };
        let client = Arc::new(mock);
        let poller = DiscoveryPoller::new(client.clone(), &test_config());
        let (errors_tx, mut errors_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = poller.spawn(
            Duration::from_millis(1),
            errors_tx,
            shutdown_tx.subscribe(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(client.calls.list_services.load(Ordering::SeqCst) >= 2);
        assert!(errors_rx.try_recv().is_err());
    }
}
