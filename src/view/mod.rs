use crate::cache::{CacheUpdate, EntityCache};
use crate::connection::ConnectionStatus;
use crate::entity::{EntityId, EntityRecord};
use crate::registry::{SubscriptionRegistry, SubscriptionToken};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

#[cfg(test)]
mod tests;

/// Live read handle for a single entity
///
/// Construction registers interest in the subscription registry; dropping
/// the view releases it. `changed()` wakes only for this entity's updates
/// or a connection-status transition, never for unrelated cache traffic.
pub struct EntityView {
    cache: Arc<EntityCache>,
    registry: SubscriptionRegistry,
    status_rx: watch::Receiver<ConnectionStatus>,
    entity_id: EntityId,
    updates: broadcast::Receiver<Arc<EntityRecord>>,
    _token: SubscriptionToken,
}

impl EntityView {
    pub(crate) fn new(
        cache: Arc<EntityCache>,
        registry: SubscriptionRegistry,
        status_rx: watch::Receiver<ConnectionStatus>,
        entity_id: EntityId,
    ) -> Self {
        let updates = cache.subscribe_entity(&entity_id);
        let token = registry.acquire(entity_id.clone());
        Self {
            cache,
            registry,
            status_rx,
            entity_id,
            updates,
            _token: token,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Latest cached record, absent until the first snapshot arrives
    pub fn record(&self) -> Option<Arc<EntityRecord>> {
        self.cache.get(&self.entity_id)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    /// Derived staleness; absent entities are not stale, just absent
    pub fn is_stale(&self) -> bool {
        self.record().map(|record| record.stale).unwrap_or(false)
    }

    /// True only before any snapshot has been received for this entity
    pub fn is_loading(&self) -> bool {
        self.record().is_none()
    }

    /// Retarget the view: release the old entity, acquire the new one
    pub fn set_entity(&mut self, entity_id: EntityId) {
        if entity_id == self.entity_id {
            return;
        }
        self.updates = self.cache.subscribe_entity(&entity_id);
        // Acquire the new interest before dropping the old token
        self._token = self.registry.acquire(entity_id.clone());
        self.entity_id = entity_id;
    }

    /// Wait until this entity's record or the connection status changes
    pub async fn changed(&mut self) {
        tokio::select! {
            result = self.updates.recv() => match result {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    // Cache gone (engine shut down) — fall back to status
                    let _ = self.status_rx.changed().await;
                }
            },
            result = self.status_rx.changed() => {
                let _ = result;
            }
        }
    }
}

/// Live read handle over the whole cache
///
/// Observes every cache mutation; adds no wire interest of its own — the
/// collection reflects what per-entity interest populates.
pub struct AllEntitiesView {
    cache: Arc<EntityCache>,
    status_rx: watch::Receiver<ConnectionStatus>,
    updates: broadcast::Receiver<CacheUpdate>,
}

impl AllEntitiesView {
    pub(crate) fn new(
        cache: Arc<EntityCache>,
        status_rx: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        let updates = cache.subscribe();
        Self {
            cache,
            status_rx,
            updates,
        }
    }

    /// O(1) snapshot of all known entities
    pub fn entities(&self) -> Arc<HashMap<EntityId, Arc<EntityRecord>>> {
        self.cache.snapshot()
    }

    /// True until the first record lands in the cache
    pub fn is_loading(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    /// Wait until any record or the connection status changes
    pub async fn changed(&mut self) {
        tokio::select! {
            result = self.updates.recv() => match result {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = self.status_rx.changed().await;
                }
            },
            result = self.status_rx.changed() => {
                let _ = result;
            }
        }
    }
}
