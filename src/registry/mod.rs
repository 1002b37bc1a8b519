use crate::connection::ConnectionHandle;
use crate::entity::EntityId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};


/// Per-entity subscription bookkeeping
///
/// An entry exists iff the entity is subscribed on the wire. The ref count
/// may sit at zero during the release grace window, in which case the wire
/// subscription is still live and a re-acquire adopts it without traffic.
struct SubEntry {
    count: usize,
    /// Bumped on every release that hits zero; a grace task only acts if
    /// its captured epoch is still current, so an acquire/release cycle
    /// inside the window cannot be finalized by an older task
    release_epoch: u64,
}

/// Ref-counted interest token; releases its entity when dropped
///
/// Tokens are not cloneable, so a double release is unrepresentable in
/// safe code; the registry still clamps defensively underneath.
pub struct SubscriptionToken {
    inner: Arc<RegistryInner>,
    entity_id: EntityId,
    serial: u64,
}

impl SubscriptionToken {
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Unique per-acquire serial, distinct even for the same entity
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        RegistryInner::release(&self.inner, &self.entity_id);
    }
}

struct RegistryInner {
    entries: DashMap<EntityId, SubEntry>,
    conn: ConnectionHandle,
    grace: Duration,
    next_serial: AtomicU64,
}

impl RegistryInner {
    fn release(this: &Arc<Self>, entity_id: &EntityId) {
        let epoch = {
            let Some(mut entry) = this.entries.get_mut(entity_id) else {
                debug_assert!(false, "release for unknown entity {}", entity_id);
                warn!(entity_id = %entity_id, "Release for unknown entity ignored");
                return;
            };
            debug_assert!(entry.count > 0, "subscription ref count underflow");
            entry.count = entry.count.saturating_sub(1);
            if entry.count > 0 {
                return;
            }
            entry.release_epoch += 1;
            entry.release_epoch
        };

        debug!(entity_id = %entity_id, "Last interest released, grace timer started");
        let inner = Arc::clone(this);
        let entity_id = entity_id.clone();
        let grace = this.grace;

        // The grace timer needs a runtime; without one (late teardown)
        // finalize immediately
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    inner.finalize_release(&entity_id, epoch);
                });
            }
            Err(_) => this.finalize_release(&entity_id, epoch),
        }
    }

    /// Remove the entry and unsubscribe on wire, unless the entity was
    /// re-acquired (count > 0) or re-released (newer epoch) meanwhile
    fn finalize_release(&self, entity_id: &EntityId, epoch: u64) {
        if let Entry::Occupied(entry) = self.entries.entry(entity_id.clone()) {
            let sub = entry.get();
            if sub.count == 0 && sub.release_epoch == epoch {
                // Unsubscribe while holding the shard lock, so a racing
                // acquire orders its wire subscribe after this
                self.conn.unsubscribe(entity_id.clone());
                debug!(entity_id = %entity_id, "Wire subscription released");
                entry.remove();
            }
        }
    }
}

/// Ref-counts per-entity interest and derives wire subscriptions from it
///
/// Wire traffic happens only on 0→1 (subscribe) and, after the grace
/// delay, 1→0 (unsubscribe) transitions; any number of concurrent
/// observers of the same entity share one wire subscription.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(conn: ConnectionHandle, grace: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                conn,
                grace,
                next_serial: AtomicU64::new(1),
            }),
        }
    }

    /// Register interest in an entity
    ///
    /// The first acquire issues a wire subscribe (queued by the connection
    /// task while offline); further acquires only bump the ref count.
    pub fn acquire(&self, entity_id: EntityId) -> SubscriptionToken {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);

        match self.inner.entries.entry(entity_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().count += 1;
            }
            Entry::Vacant(vacant) => {
                debug!(entity_id = %entity_id, "First interest, subscribing on wire");
                self.inner.conn.subscribe(entity_id.clone());
                vacant.insert(SubEntry {
                    count: 1,
                    release_epoch: 0,
                });
            }
        }

        SubscriptionToken {
            inner: Arc::clone(&self.inner),
            entity_id,
            serial,
        }
    }

    /// Explicit release; equivalent to dropping the token
    pub fn release(&self, token: SubscriptionToken) {
        drop(token);
    }

    /// Current ref count for an entity (0 when unknown)
    pub fn ref_count(&self, entity_id: &EntityId) -> usize {
        self.inner
            .entries
            .get(entity_id)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Entities with live interest (ref count > 0)
    pub fn subscribed_ids(&self) -> Vec<EntityId> {
        self.inner
            .entries
            .iter()
            .filter(|entry| entry.value().count > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
