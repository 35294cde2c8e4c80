//! Scripted coordination client double shared by the task and lifecycle
//! tests. Each operation can be programmed with a closure; unprogrammed
//! operations answer with benign defaults. Call counts and the last acquire
//! arguments are recorded for assertions.

use super::client::{
    ClientError, CoordinationClient, PeerRecord, ServiceRegistration, Session,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type OpFn<T> = Box<dyn Fn() -> Result<T, ClientError> + Send + Sync>;

#[derive(Default)]
pub(crate) struct CallCounts {
    pub register: AtomicUsize,
    pub deregister: AtomicUsize,
    pub create_session: AtomicUsize,
    pub renew: AtomicUsize,
    pub acquire: AtomicUsize,
    pub list_services: AtomicUsize,
    pub list_instances: AtomicUsize,
}

#[derive(Default)]
pub(crate) struct MockClient {
    pub register_fn: Option<OpFn<()>>,
    pub deregister_fn: Option<OpFn<()>>,
    pub create_session_fn: Option<OpFn<String>>,
    pub renew_session_fn: Option<OpFn<Option<Session>>>,
    pub acquire_fn: Option<OpFn<bool>>,
    pub list_services_fn: Option<OpFn<HashMap<String, Vec<String>>>>,
    pub list_instances_fn: Option<OpFn<Vec<PeerRecord>>>,
    pub calls: CallCounts,
    /// `(key, value, session_id)` of the most recent acquire call.
    pub last_acquire: Mutex<Option<(String, Vec<u8>, String)>>,
}

impl MockClient {
    fn default_session() -> Session {
        Session {
            id: "session-id".to_string(),
            ttl: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl CoordinationClient for MockClient {
    async fn register_service(&self, _: &ServiceRegistration) -> Result<(), ClientError> {
        self.calls.register.fetch_add(1, Ordering::SeqCst);
        match &self.register_fn {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    async fn deregister_service(&self, _: &str) -> Result<(), ClientError> {
        self.calls.deregister.fetch_add(1, Ordering::SeqCst);
        match &self.deregister_fn {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    async fn create_session(
        &self,
        _: &str,
        _: Duration,
        _: bool,
    ) -> Result<String, ClientError> {
        self.calls.create_session.fetch_add(1, Ordering::SeqCst);
        match &self.create_session_fn {
            Some(f) => f(),
            None => Ok("session-id".to_string()),
        }
    }

    async fn renew_session(&self, _: &str) -> Result<Option<Session>, ClientError> {
        self.calls.renew.fetch_add(1, Ordering::SeqCst);
        match &self.renew_session_fn {
            Some(f) => f(),
            None => Ok(Some(Self::default_session())),
        }
    }

    async fn acquire_lock(
        &self,
        key: &str,
        value: &[u8],
        session_id: &str,
    ) -> Result<bool, ClientError> {
        self.calls.acquire.fetch_add(1, Ordering::SeqCst);
        *self.last_acquire.lock().unwrap() =
            Some((key.to_string(), value.to_vec(), session_id.to_string()));
        match &self.acquire_fn {
            Some(f) => f(),
            None => Ok(false),
        }
    }

    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        self.calls.list_services.fetch_add(1, Ordering::SeqCst);
        match &self.list_services_fn {
            Some(f) => f(),
            None => Ok(HashMap::new()),
        }
    }

    async fn list_service_instances(&self, _: &str) -> Result<Vec<PeerRecord>, ClientError> {
        self.calls.list_instances.fetch_add(1, Ordering::SeqCst);
        match &self.list_instances_fn {
            Some(f) => f(),
            None => Ok(Vec::new()),
        }
    }
}
