use crate::connection::ConnectionHandle;
use crate::entity::EntityId;
use crate::protocol::{ClientMessage, ServiceTarget};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;


/// Service call errors, surfaced as per-call state rather than thrown
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCallError {
    /// The transport is down; commands are never queued
    NotConnected,
    /// The hub answered with success=false
    Rejected(String),
    /// No result message arrived within the configured timeout
    Timeout,
    /// The connection dropped while the call was in flight
    ConnectionLost,
}

impl fmt::Display for ServiceCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCallError::NotConnected => write!(f, "not connected to hub"),
            ServiceCallError::Rejected(reason) => write!(f, "hub rejected call: {}", reason),
            ServiceCallError::Timeout => write!(f, "timed out waiting for hub result"),
            ServiceCallError::ConnectionLost => {
                write!(f, "connection lost while call was in flight")
            }
        }
    }
}

impl std::error::Error for ServiceCallError {}

/// A user intent headed for the hub
#[derive(Debug, Clone)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub entity_id: Option<EntityId>,
    pub data: Value,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            entity_id: None,
            data: json!({}),
        }
    }

    pub fn target(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Per-call-site command dispatcher with its own loading/error state
///
/// Deliberately never touches the entity cache: the UI shows a command's
/// effect only once the hub echoes the resulting state_changed event.
/// Calls are forwarded as-is and never retried.
pub struct ServiceCaller {
    conn: ConnectionHandle,
    timeout: Duration,
    loading: AtomicBool,
    last_error: Mutex<Option<ServiceCallError>>,
}

impl ServiceCaller {
    pub fn new(conn: ConnectionHandle, timeout: Duration) -> Self {
        Self {
            conn,
            timeout,
            loading: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Dispatch an arbitrary domain/service call
    pub async fn call_service(
        &self,
        call: ServiceCall,
    ) -> Result<Option<Value>, ServiceCallError> {
        // Loading is observable before the request hits the wire
        self.loading.store(true, Ordering::SeqCst);

        let result = self.dispatch(call).await;

        self.loading.store(false, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = result.as_ref().err().cloned();
        result
    }

    async fn dispatch(&self, call: ServiceCall) -> Result<Option<Value>, ServiceCallError> {
        let id = Uuid::new_v4();
        debug!(
            call_id = %id,
            domain = %call.domain,
            service = %call.service,
            "Dispatching service call"
        );

        let message = ClientMessage::CallService {
            id,
            domain: call.domain,
            service: call.service,
            target: ServiceTarget {
                entity_id: call.entity_id,
            },
            service_data: call.data,
        };

        match tokio::time::timeout(self.timeout, self.conn.call_service(id, message)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ServiceCallError::Timeout),
        }
    }

    /// Turn an entity on (`<domain>.turn_on`)
    pub async fn turn_on(&self, entity_id: &EntityId) -> Result<Option<Value>, ServiceCallError> {
        self.call_service(
            ServiceCall::new(entity_id.domain(), "turn_on").target(entity_id.clone()),
        )
        .await
    }

    /// Turn an entity off (`<domain>.turn_off`)
    pub async fn turn_off(&self, entity_id: &EntityId) -> Result<Option<Value>, ServiceCallError> {
        self.call_service(
            ServiceCall::new(entity_id.domain(), "turn_off").target(entity_id.clone()),
        )
        .await
    }

    /// Toggle an entity (`<domain>.toggle`)
    pub async fn toggle(&self, entity_id: &EntityId) -> Result<Option<Value>, ServiceCallError> {
        self.call_service(ServiceCall::new(entity_id.domain(), "toggle").target(entity_id.clone()))
            .await
    }

    /// Set a range-style value (`<domain>.set_value`)
    pub async fn set_value(
        &self,
        entity_id: &EntityId,
        value: Value,
    ) -> Result<Option<Value>, ServiceCallError> {
        self.call_service(
            ServiceCall::new(entity_id.domain(), "set_value")
                .target(entity_id.clone())
                .data(json!({ "value": value })),
        )
        .await
    }

    /// Whether a call is currently in flight
    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Error from the most recent call, until cleared or superseded
    pub fn last_error(&self) -> Option<ServiceCallError> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap() = None;
    }
}
