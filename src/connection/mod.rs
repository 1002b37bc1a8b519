use crate::entity::EntityId;
use crate::protocol::ClientMessage;
use crate::service::ServiceCallError;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

mod backoff;
mod manager;

pub use backoff::BackoffSchedule;
pub use manager::ConnectionManager;

/// Connection state of the hub transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. }
        )
    }
}

/// Reply channel for a correlated service call
pub(crate) type CallReply = oneshot::Sender<Result<Option<Value>, ServiceCallError>>;

/// Commands sent from the public API to the background connection task
pub(crate) enum ConnCmd {
    /// Open the transport and keep it open until Disconnect
    Connect,
    /// Close the transport and stop reconnecting
    Disconnect,
    /// Add an entity to the wire-subscription set
    Subscribe(EntityId),
    /// Remove an entity from the wire-subscription set
    Unsubscribe(EntityId),
    /// Dispatch a call_service request; fails fast when offline
    CallService {
        id: Uuid,
        message: ClientMessage,
        result_tx: CallReply,
    },
    /// Terminate the connection task
    Shutdown,
}

/// Cloneable handle for talking to the connection task
///
/// Subscribe/unsubscribe are synchronous fire-and-forget sends so they can
/// be issued from drop paths; while the transport is down they mutate the
/// queued subscription set rather than being dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
}

impl ConnectionHandle {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<ConnCmd>) -> Self {
        Self { cmd_tx }
    }

    pub fn connect(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Disconnect);
    }

    pub(crate) fn subscribe(&self, entity_id: EntityId) {
        let _ = self.cmd_tx.send(ConnCmd::Subscribe(entity_id));
    }

    pub(crate) fn unsubscribe(&self, entity_id: EntityId) {
        let _ = self.cmd_tx.send(ConnCmd::Unsubscribe(entity_id));
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Shutdown);
    }

    /// Send a call_service request and wait for the correlated result
    pub(crate) async fn call_service(
        &self,
        id: Uuid,
        message: ClientMessage,
    ) -> Result<Option<Value>, ServiceCallError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::CallService {
                id,
                message,
                result_tx,
            })
            .map_err(|_| ServiceCallError::ConnectionLost)?;
        result_rx.await.map_err(|_| ServiceCallError::ConnectionLost)?
    }
}
