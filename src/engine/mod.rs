use crate::cache::EntityCache;
use crate::config::HearthConfig;
use crate::connection::{
    BackoffSchedule, ConnCmd, ConnectionHandle, ConnectionManager, ConnectionStatus,
};
use crate::entity::EntityId;
use crate::registry::SubscriptionRegistry;
use crate::service::ServiceCaller;
use crate::staleness::StalenessMonitor;
use crate::view::{AllEntitiesView, EntityView};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// The entity synchronization engine
///
/// Explicitly constructed and explicitly shut down — no module-level
/// global — so tests can run independent instances side by side. Owns the
/// connection task and the staleness sweep; everything else is shared
/// state handed out through views and callers.
pub struct SyncEngine {
    config: HearthConfig,
    cache: Arc<EntityCache>,
    registry: SubscriptionRegistry,
    conn: ConnectionHandle,
    status_rx: watch::Receiver<ConnectionStatus>,
    last_error: Arc<Mutex<Option<String>>>,
    conn_task: JoinHandle<()>,
    staleness_task: JoinHandle<()>,
}

impl SyncEngine {
    /// Build the engine and spawn its background tasks
    ///
    /// The transport stays idle until [`connect`](Self::connect) is
    /// called. Must run inside a tokio runtime.
    pub fn new(config: HearthConfig) -> Self {
        let cache = Arc::new(EntityCache::new());
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ConnCmd>();
        let conn = ConnectionHandle::new(cmd_tx);
        let last_error = Arc::new(Mutex::new(None));

        let manager = ConnectionManager::new(
            config.connection.url.clone(),
            BackoffSchedule::from(&config.backoff),
            Arc::clone(&cache),
            status_tx,
            Arc::clone(&last_error),
        );
        let conn_task = tokio::spawn(manager.run(cmd_rx));

        let registry = SubscriptionRegistry::new(
            conn.clone(),
            Duration::from_millis(config.subscription.release_grace_ms),
        );

        let monitor = StalenessMonitor::new(
            Arc::clone(&cache),
            registry.clone(),
            &config.staleness,
        );
        let staleness_task = tokio::spawn(monitor.run());

        info!(url = %config.connection.url, "Sync engine initialized");

        Self {
            config,
            cache,
            registry,
            conn,
            status_rx,
            last_error,
            conn_task,
            staleness_task,
        }
    }

    /// Open the hub transport; retries with backoff until it succeeds or
    /// [`disconnect`](Self::disconnect) is called
    pub fn connect(&self) {
        self.conn.connect();
    }

    /// Close the transport and stop reconnecting
    pub fn disconnect(&self) {
        self.conn.disconnect();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    /// Most recent transport error, cleared on successful connect
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// Live view of one entity; registers interest until dropped
    pub fn entity(&self, entity_id: EntityId) -> EntityView {
        EntityView::new(
            Arc::clone(&self.cache),
            self.registry.clone(),
            self.status_rx.clone(),
            entity_id,
        )
    }

    /// Live view over every known entity
    pub fn entities(&self) -> AllEntitiesView {
        AllEntitiesView::new(Arc::clone(&self.cache), self.status_rx.clone())
    }

    /// Per-call-site command dispatcher
    pub fn service_caller(&self) -> ServiceCaller {
        ServiceCaller::new(
            self.conn.clone(),
            Duration::from_secs(self.config.service.call_timeout_secs),
        )
    }

    /// Stop the background tasks and close the transport
    pub async fn shutdown(self) {
        self.staleness_task.abort();
        self.conn.shutdown();
        let _ = self.conn_task.await;
        info!("Sync engine stopped");
    }
}
