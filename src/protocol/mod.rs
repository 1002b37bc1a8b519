use crate::entity::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;


/// Client → Hub message types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe_entities")]
    SubscribeEntities { entity_ids: Vec<EntityId> },
    #[serde(rename = "unsubscribe_entities")]
    UnsubscribeEntities { entity_ids: Vec<EntityId> },
    #[serde(rename = "call_service")]
    CallService {
        /// Correlation ID echoed back in the hub's result message
        id: Uuid,
        domain: String,
        service: String,
        target: ServiceTarget,
        service_data: Value,
    },
}

/// Target selector for a service call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
}

/// Hub → Client message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full replacement state for one entity. The hub sends complete
    /// records, not diffs; `last_updated` is the hub's own clock and is
    /// carried through but not used for staleness.
    #[serde(rename = "state_changed")]
    StateChanged {
        entity_id: EntityId,
        state: String,
        #[serde(default)]
        attributes: HashMap<String, Value>,
        last_updated: DateTime<Utc>,
    },
    /// Correlated response to a call_service request
    #[serde(rename = "result")]
    CallResult {
        id: Uuid,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}
