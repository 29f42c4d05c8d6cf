//! Delivery endpoints.
//!
//! A [`Transport`] knows how to hand a payload to one downstream system. The
//! [`Endpoint`] wrapper adds what every transport shares: exactly-once
//! network initialization, a retry directory and the periodic retry task.

mod log;
#[cfg(feature = "amqp")]
mod queue;
mod registry;
mod web;

pub use self::log::{LogEndpoint, LogObserver};
#[cfg(feature = "amqp")]
pub use self::queue::{
    MessageFactory, QueueEndpoint, QueueMessage, TextMessageFactory, TEXT_MESSAGE_FACTORY,
};
#[cfg(feature = "amqp")]
pub use self::registry::MessageFactoryBuilder;
pub use self::registry::{EndpointRegistry, TransportFactory};
pub use self::web::WebEndpoint;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::retry::{DrainReport, PersistError, RetryScheduler, RetryStore, RetryTarget};

/// Endpoint variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Queue,
    Log,
    Web,
    Custom,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Queue => f.write_str("queue"),
            EndpointKind::Log => f.write_str("log"),
            EndpointKind::Web => f.write_str("web"),
            EndpointKind::Custom => f.write_str("custom"),
        }
    }
}

/// Lifecycle state of a constructed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Validated and owning its retry directory; no network resources yet.
    Configured,
    NetworkReady,
}

/// Recoverable delivery failure; the payload goes to the retry store.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("endpoint not initialized: {0}")]
    NotReady(String),

    #[error("network init failed: {0}")]
    Init(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP endpoint answered {status}")]
    Status { status: u16 },

    #[cfg(feature = "amqp")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// A concrete way of handing a payload to a downstream system.
///
/// Implementations must tolerate concurrent `deliver` calls.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn kind(&self) -> EndpointKind;

    /// Acquire connections or clients. Called at most once successfully.
    async fn init_network_resources(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn deliver(&self, payload: &str) -> Result<(), DeliveryError>;
}

/// A configured endpoint: a transport plus its retry plumbing.
pub struct Endpoint {
    index: usize,
    transport: Arc<dyn Transport>,
    store: RetryStore,
    retry_interval: Duration,
    scheduler: RetryScheduler,
    network: OnceCell<()>,
    retry_running: AtomicBool,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("index", &self.index)
            .field("transport", &self.transport)
            .field("retry_dir", &self.store.dir())
            .field("retry_interval", &self.retry_interval)
            .field("state", &self.state())
            .finish()
    }
}

impl Endpoint {
    pub fn new(
        index: usize,
        transport: Arc<dyn Transport>,
        store: RetryStore,
        retry_interval: Duration,
        scheduler: RetryScheduler,
    ) -> Self {
        Self {
            index,
            transport,
            store,
            retry_interval,
            scheduler,
            network: OnceCell::new(),
            retry_running: AtomicBool::new(false),
        }
    }

    /// Position in the configured endpoint list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> EndpointKind {
        self.transport.kind()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn store(&self) -> &RetryStore {
        &self.store
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn state(&self) -> EndpointState {
        if self.network.initialized() {
            EndpointState::NetworkReady
        } else {
            EndpointState::Configured
        }
    }

    /// Initialize network resources exactly once.
    ///
    /// Concurrent callers wait for the first one; a failed attempt leaves
    /// the endpoint `Configured` so a later call tries again.
    pub async fn init_network_resources(&self) -> Result<(), DeliveryError> {
        self.network
            .get_or_try_init(|| async {
                self.transport.init_network_resources().await?;
                info!(endpoint = self.index, kind = %self.kind(), "endpoint network ready");
                Ok::<(), DeliveryError>(())
            })
            .await
            .map(|_| ())
    }

    /// Deliver a payload, initializing the transport first if needed.
    pub async fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        self.init_network_resources().await?;
        self.transport.deliver(payload).await
    }

    /// Persist a payload for redelivery and make sure the retry task runs.
    pub async fn schedule_retry(self: &Arc<Self>, payload: &str) -> Result<PathBuf, PersistError> {
        let path = self.store.enqueue(payload).await?;
        self.start_retry_task();
        Ok(path)
    }

    /// Start periodic redelivery. No-op when already running.
    pub fn start_retry_task(self: &Arc<Self>) {
        if self.retry_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let target: Arc<dyn RetryTarget> = self.clone();
        self.scheduler.start(
            self.store.dir().to_path_buf(),
            self.retry_interval,
            Arc::downgrade(&target),
        );
        debug!(endpoint = self.index, "retry task requested");
    }

    /// Stop periodic redelivery. A drain in progress finishes first.
    pub fn stop_retry_task(&self) {
        if self.retry_running.swap(false, Ordering::SeqCst) {
            self.scheduler.stop(self.store.dir().to_path_buf());
        }
    }

    pub fn retry_task_running(&self) -> bool {
        self.retry_running.load(Ordering::SeqCst)
    }

    /// Run one redelivery pass over this endpoint's retry store.
    pub async fn drain_once(&self) -> Result<DrainReport, PersistError> {
        self.store
            .drain_once(|payload| async move { self.deliver(&payload).await })
            .await
    }
}

#[async_trait]
impl RetryTarget for Endpoint {
    fn label(&self) -> String {
        format!("endpoint_{}", self.index)
    }

    async fn drain_once(&self) -> Result<DrainReport, PersistError> {
        Endpoint::drain_once(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct Flaky {
        inits: AtomicUsize,
        fail_init: AtomicBool,
        fail_deliver: AtomicBool,
        delivered: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Flaky {
        fn kind(&self) -> EndpointKind {
            EndpointKind::Custom
        }

        async fn init_network_resources(&self) -> Result<(), DeliveryError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(DeliveryError::Init("no route to host".into()));
            }
            Ok(())
        }

        async fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
            if self.fail_deliver.load(Ordering::SeqCst) {
                return Err(DeliveryError::Rejected("down".into()));
            }
            self.delivered.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    fn endpoint(dir: &TempDir, transport: Arc<Flaky>) -> Arc<Endpoint> {
        let store = RetryStore::open(dir.path().join("endpoint_0")).unwrap();
        Arc::new(Endpoint::new(
            0,
            transport,
            store,
            Duration::from_secs(60),
            RetryScheduler::spawn(),
        ))
    }

    #[tokio::test]
    async fn test_concurrent_init_runs_once() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(Flaky::default());
        let ep = endpoint(&dir, transport.clone());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ep = ep.clone();
            handles.push(tokio::spawn(async move { ep.init_network_resources().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(transport.inits.load(Ordering::SeqCst), 1);
        assert_eq!(ep.state(), EndpointState::NetworkReady);
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(Flaky::default());
        transport.fail_init.store(true, Ordering::SeqCst);
        let ep = endpoint(&dir, transport.clone());

        assert!(ep.deliver("x").await.is_err());
        assert_eq!(ep.state(), EndpointState::Configured);

        transport.fail_init.store(false, Ordering::SeqCst);
        ep.deliver("x").await.unwrap();
        assert_eq!(transport.inits.load(Ordering::SeqCst), 2);
        assert_eq!(ep.state(), EndpointState::NetworkReady);
    }

    #[tokio::test]
    async fn test_schedule_retry_then_drain() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(Flaky::default());
        let ep = endpoint(&dir, transport.clone());

        let path = ep.schedule_retry("<smpp/>").await.unwrap();
        assert!(path.exists());
        assert!(ep.retry_task_running());

        let report = ep.drain_once().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(!path.exists());
        assert_eq!(*transport.delivered.lock().unwrap(), vec!["<smpp/>"]);

        ep.stop_retry_task();
        assert!(!ep.retry_task_running());
    }

    #[tokio::test]
    async fn test_drain_keeps_record_while_down() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(Flaky::default());
        transport.fail_deliver.store(true, Ordering::SeqCst);
        let ep = endpoint(&dir, transport);

        ep.schedule_retry("payload").await.unwrap();
        let report = ep.drain_once().await.unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 1);
    }
}
