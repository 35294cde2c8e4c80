//! Service lifecycle: composition, startup ordering, the fatal-error
//! funnel, and graceful shutdown.
//!
//! `Service` owns the two channels every background task shares: a
//! broadcast cancellation channel and a buffered error channel. Tasks
//! communicate through nothing else — there is no shared mutable state.

use crate::config::ServiceConfig;
use crate::coordination::{
    ClientError, CoordinationClient, HealthCheckSpec, ServiceIdentity, ServiceRegistration,
};
use crate::discovery::DiscoveryPoller;
use crate::health::{HealthServer, HEALTH_CHECK_PATH};
use crate::leader::{LeaderCoordinator, LeadershipState};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

/// Grace period for draining the health endpoint during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Buffered so a fatal error reported before anyone listens is never lost.
/// Each task reports at most once, so the bound is never reached.
const ERROR_CHANNEL_CAPACITY: usize = 8;

/// Cadence of the store-side health probe registered for this instance.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Per-probe timeout of the store-side health check.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Fatal failure of a background task. Delivered at-most-once per failure
/// on the error channel; the task that reports it terminates.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("session renewal failed")]
    Renewal(#[source] ClientError),
    #[error("lock acquisition failed")]
    Acquire(#[source] ClientError),
    #[error("service discovery failed")]
    Discovery(#[source] ClientError),
}

/// Failure during graceful shutdown; reported, never retried.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("failed to deregister service")]
    Deregister(#[source] ClientError),
    #[error("failed to stop health endpoint: {0}")]
    HealthEndpoint(String),
}

/// Logs a task failure and hands it to the lifecycle manager. Reporting
/// never blocks the dying task.
pub(crate) fn report_fatal(errors: &mpsc::Sender<FatalError>, error: FatalError) {
    tracing::error!(error = ?error, "background task failed");
    if errors.try_send(error).is_err() {
        tracing::error!("error channel full, dropping fatal error");
    }
}

pub struct Service<C> {
    config: ServiceConfig,
    client: Arc<C>,
    shutdown_tx: broadcast::Sender<()>,
    error_tx: mpsc::Sender<FatalError>,
    error_rx: mpsc::Receiver<FatalError>,
    health: Option<HealthServer>,
    leadership: Option<watch::Receiver<LeadershipState>>,
}

impl<C: CoordinationClient + 'static> Service<C> {
    pub fn new(config: ServiceConfig, client: Arc<C>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            config,
            client,
            shutdown_tx,
            error_tx,
            error_rx,
            health: None,
            leadership: None,
        }
    }

    /// Registration record advertised to the store: identity, tags, and the
    /// health check the store probes this instance with.
    fn registration(&self) -> ServiceRegistration {
        let identity = ServiceIdentity {
            id: self.config.service_id(),
            address: self.config.address(),
        };
        ServiceRegistration {
            name: self.config.service_name.clone(),
            tags: self.config.tags.clone(),
            check: HealthCheckSpec {
                name: HEALTH_CHECK_PATH.to_string(),
                http: format!("{}{}", identity.address, HEALTH_CHECK_PATH),
                method: "GET".to_string(),
                interval: HEALTH_CHECK_INTERVAL,
                timeout: HEALTH_CHECK_TIMEOUT,
            },
            identity,
        }
    }

    /// Starts the health endpoint, registers with the store, and launches
    /// the leader coordinator and the discovery poller.
    ///
    /// Any error here is a startup failure: it is returned synchronously and
    /// the process is expected to abort rather than limp along unregistered.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let health = HealthServer::start(self.config.port, self.config.unhealthy)
            .await
            .context("failed to start health endpoint")?;
        self.health = Some(health);

        self.client
            .register_service(&self.registration())
            .await
            .context("failed to register service with the coordination store")?;
        tracing::info!(
            service_id = %self.config.service_id(),
            "registered with the coordination store"
        );

        let (coordinator, leadership) =
            LeaderCoordinator::new(self.client.clone(), &self.config)
                .await
                .context("failed to create leader session")?;
        self.leadership = Some(leadership);
        coordinator.spawn(
            self.config.tick_interval,
            self.error_tx.clone(),
            self.shutdown_tx.subscribe(),
        );

        DiscoveryPoller::new(self.client.clone(), &self.config).spawn(
            self.config.tick_interval,
            self.error_tx.clone(),
            self.shutdown_tx.subscribe(),
        );

        Ok(())
    }

    /// Receiver for the per-tick leadership state; available after `start`.
    pub fn leadership(&self) -> Option<watch::Receiver<LeadershipState>> {
        self.leadership.clone()
    }

    /// Waits for the first fatal error from any background task.
    pub async fn wait_fatal(&mut self) -> Option<FatalError> {
        self.error_rx.recv().await
    }

    /// Broadcasts cancellation, deregisters from the store, and drains the
    /// health endpoint within the grace period.
    ///
    /// Both steps always run — including after a background task already
    /// died of a fatal error — each failure is logged, and the first one is
    /// returned.
    pub async fn shutdown(&mut self) -> Result<(), ShutdownError> {
        let _ = self.shutdown_tx.send(());

        let mut first_error = None;

        let service_id = self.config.service_id();
        match self.client.deregister_service(&service_id).await {
            Ok(()) => {
                tracing::info!(service_id = %service_id, "deregistered from the coordination store");
            }
            Err(error) => {
                tracing::error!(error = ?error, "failed to deregister service during shutdown");
                first_error = Some(ShutdownError::Deregister(error));
            }
        }

        if let Some(health) = self.health.take() {
            if let Err(error) = health.stop(SHUTDOWN_GRACE).await {
                tracing::error!(error = ?error, "failed to stop health endpoint during shutdown");
                if first_error.is_none() {
                    first_error = Some(ShutdownError::HealthEndpoint(format!("{:#}", error)));
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
