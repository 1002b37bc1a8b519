use crate::entity::{EntityId, EntityRecord};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;


/// Change notification fanned out to whole-cache observers
#[derive(Clone, Debug)]
pub struct CacheUpdate {
    pub entity_id: EntityId,
    pub record: Arc<EntityRecord>,
}

/// In-memory entity state, the single source of truth for all reads
///
/// The record map is copy-on-write: a snapshot is an O(1) `Arc` clone and
/// every mutation swaps in a freshly built map, so concurrent readers never
/// observe a partially applied update. Mutations come from exactly two
/// paths — event ingestion (`apply_event`) and the staleness monitor
/// (`set_stale`).
pub struct EntityCache {
    /// Copy-on-write record map
    records: RwLock<Arc<HashMap<EntityId, Arc<EntityRecord>>>>,

    /// Broadcast channel for whole-cache observers
    update_tx: broadcast::Sender<CacheUpdate>,

    /// Per-entity broadcast channels, created on demand, so single-entity
    /// observers are not woken by unrelated updates
    entity_tx: DashMap<EntityId, broadcast::Sender<Arc<EntityRecord>>>,
}

impl EntityCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(1024);
        Self {
            records: RwLock::new(Arc::new(HashMap::new())),
            update_tx,
            entity_tx: DashMap::new(),
        }
    }

    /// Get the latest record for one entity
    pub fn get(&self, entity_id: &EntityId) -> Option<Arc<EntityRecord>> {
        self.records.read().unwrap().get(entity_id).cloned()
    }

    /// O(1) snapshot of the whole cache
    pub fn snapshot(&self) -> Arc<HashMap<EntityId, Arc<EntityRecord>>> {
        Arc::clone(&self.records.read().unwrap())
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Apply a state_changed event: authoritative wholesale overwrite
    ///
    /// The hub sends full records, so this replaces rather than merges;
    /// last writer wins in wire-arrival order. `last_updated` is stamped
    /// here and the stale flag resets — a fresh event is fresh by
    /// definition.
    pub fn apply_event(
        &self,
        entity_id: EntityId,
        state: String,
        attributes: HashMap<String, Value>,
    ) -> Arc<EntityRecord> {
        let record = Arc::new(EntityRecord {
            entity_id: entity_id.clone(),
            state,
            attributes,
            last_updated: Utc::now(),
            stale: false,
        });

        self.replace(entity_id.clone(), Arc::clone(&record));
        self.notify(entity_id, Arc::clone(&record));
        record
    }

    /// Flip the derived stale flag; the staleness monitor's only write path
    ///
    /// Returns true when the flag actually changed (and observers were
    /// notified), false when the entity is absent or already in the
    /// requested state. The check and the swap happen under one write
    /// lock so a concurrent `apply_event` can never be overwritten by a
    /// flag flip of the record it replaced.
    pub fn set_stale(&self, entity_id: &EntityId, stale: bool) -> bool {
        let updated = {
            let mut guard = self.records.write().unwrap();
            match guard.get(entity_id) {
                Some(record) if record.stale != stale => {
                    let mut new_record = record.as_ref().clone();
                    new_record.stale = stale;
                    let record = Arc::new(new_record);
                    let mut next = guard.as_ref().clone();
                    next.insert(entity_id.clone(), Arc::clone(&record));
                    *guard = Arc::new(next);
                    Some(record)
                }
                _ => None,
            }
        };

        match updated {
            Some(record) => {
                debug!(entity_id = %entity_id, stale = stale, "Stale flag changed");
                self.notify(entity_id.clone(), record);
                true
            }
            None => false,
        }
    }

    /// Subscribe to all cache changes
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.update_tx.subscribe()
    }

    /// Subscribe to changes of a single entity
    pub fn subscribe_entity(&self, entity_id: &EntityId) -> broadcast::Receiver<Arc<EntityRecord>> {
        self.entity_tx
            .entry(entity_id.clone())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    /// Swap in a new map containing the updated record
    fn replace(&self, entity_id: EntityId, record: Arc<EntityRecord>) {
        let mut guard = self.records.write().unwrap();
        let mut next = guard.as_ref().clone();
        next.insert(entity_id, record);
        *guard = Arc::new(next);
    }

    fn notify(&self, entity_id: EntityId, record: Arc<EntityRecord>) {
        // Whole-cache observers; send fails only when nobody listens
        let _ = self.update_tx.send(CacheUpdate {
            entity_id: entity_id.clone(),
            record: Arc::clone(&record),
        });

        // Single-entity observers; drop the channel once the last
        // receiver is gone
        if let Some(tx) = self.entity_tx.get(&entity_id) {
            if tx.send(record).is_err() && tx.receiver_count() == 0 {
                drop(tx);
                self.entity_tx
                    .remove_if(&entity_id, |_, tx| tx.receiver_count() == 0);
            }
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}
