//! Leader election: session lifecycle and the renew/acquire loop.
//!
//! One coordinator runs per instance. It creates a TTL session with the
//! coordination store at startup, then on every tick renews that session and
//! contends for the well-known leader key with the session as holder.
//! Leadership is derived, never persisted: each tick independently
//! re-asserts or loses the role, and whatever the store's acquire call
//! reports at the instant of the call is the truth. All linearizability
//! guarantees are delegated to the store.

use crate::config::ServiceConfig;
use crate::coordination::{ClientError, CoordinationClient, Session};
use crate::service::{report_fatal, FatalError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Role this instance holds with respect to the leader lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    Follower,
    Leader,
}

/// Outcome of a single renew/acquire cycle.
#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    /// The session was renewed and the acquire attempt ran.
    Ran(LeadershipState),
    /// The store no longer knows the session; acquire was skipped.
    SessionMissing,
}

pub struct LeaderCoordinator<C> {
    client: Arc<C>,
    service_id: String,
    lock_key: String,
    session_id: String,
    missed_renewals: u32,
    leadership_tx: watch::Sender<LeadershipState>,
}

impl<C: CoordinationClient + 'static> LeaderCoordinator<C> {
    /// Creates the session and returns a coordinator holding it, plus a
    /// receiver for the per-tick leadership state.
    ///
    /// A failure here is a startup failure: no task has been spawned yet and
    /// the caller is expected to abort, not to route this through the error
    /// channel.
    pub async fn new(
        client: Arc<C>,
        config: &ServiceConfig,
    ) -> Result<(Self, watch::Receiver<LeadershipState>), ClientError> {
        let session_id = client
            .create_session(&config.lock_key(), config.session_ttl, true)
            .await?;
        tracing::info!(
            session_id = %session_id,
            ttl = ?config.session_ttl,
            "created leader session"
        );

        let (leadership_tx, leadership_rx) = watch::channel(LeadershipState::Follower);
        Ok((
            Self {
                client,
                service_id: config.service_id(),
                lock_key: config.lock_key(),
                session_id,
                missed_renewals: 0,
                leadership_tx,
            },
            leadership_rx,
        ))
    }

    /// Spawns the tick loop. The task ends on cancellation or after
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
        mut self,
        tick_interval: Duration,
        errors: mpsc::Sender<FatalError>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(tick_interval);
        // A slow store call must not be followed by a burst of catch-up ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::debug!("leader coordinator stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            if let Err(fatal) = self.tick().await {
                report_fatal(&errors, fatal);
                return;
            }
        }
    }

    /// Replaces the held session id with the one the store reported back.
    fn adopt(&mut self, session: Session) {
        if session.id != self.session_id {
            tracing::info!(
                old = %self.session_id,
                new = %session.id,
                ttl = ?session.ttl,
                "store issued a new session id on renewal"
            );
        }
        self.session_id = session.id;
    }

    /// Runs one renew/acquire cycle. Renewal strictly precedes acquisition:
    /// the lock is never contended with a stale, unrenewed session.
    async fn tick(&mut self) -> Result<TickOutcome, FatalError> {
        let session = self
            .client
            .renew_session(&self.session_id)
            .await
            .map_err(FatalError::Renewal)?;

        let Some(session) = session else {
            // The store dropped the session (TTL expiry or deletion). Soft
            // condition: stay alive and retry renewal on the next tick, but
            // never contend for the lock without a live session.
            self.missed_renewals += 1;
            tracing::warn!(
                session_id = %self.session_id,
                consecutive_misses = self.missed_renewals,
                "session no longer exists, skipping acquire until renewal succeeds"
            );
            let _ = self.leadership_tx.send(LeadershipState::Follower);
            return Ok(TickOutcome::SessionMissing);
        };
        self.missed_renewals = 0;
        self.adopt(session);

        let acquired = self
            .client
            .acquire_lock(
                &self.lock_key,
                self.service_id.as_bytes(),
                &self.session_id,
            )
            .await
            .map_err(FatalError::Acquire)?;

        let state = if acquired {
            tracing::info!(session_id = %self.session_id, "lock acquired, registered as leader");
            LeadershipState::Leader
        } else {
            tracing::debug!(session_id = %self.session_id, "lock held by another session");
            LeadershipState::Follower
        };
        let _ = self.leadership_tx.send(state);
        Ok(TickOutcome::Ran(state))
    }
}
