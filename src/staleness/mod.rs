use crate::cache::EntityCache;
use crate::config::StalenessConfig;
use crate::registry::SubscriptionRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// Periodically derives the stale flag for subscribed entities
///
/// Staleness is client-computed only: the sweep compares the locally
/// stamped ingestion time against the configured threshold. Entities
/// without live interest are exempt — no cost for unobserved data.
pub struct StalenessMonitor {
    cache: Arc<EntityCache>,
    registry: SubscriptionRegistry,
    threshold: chrono::Duration,
    sweep_interval: Duration,
}

impl StalenessMonitor {
    pub fn new(
        cache: Arc<EntityCache>,
        registry: SubscriptionRegistry,
        config: &StalenessConfig,
    ) -> Self {
        Self {
            cache,
            registry,
            threshold: chrono::Duration::seconds(config.threshold_secs as i64),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }

    /// Run the background sweep loop until the task is cancelled
    pub async fn run(self) {
        info!(
            threshold_secs = self.threshold.num_seconds(),
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Starting staleness monitor"
        );

        let mut timer = interval(self.sweep_interval);
        loop {
            timer.tick().await;
            self.sweep(Utc::now());
        }
    }

    /// One sweep pass; returns how many flags flipped
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut flipped = 0;
        for entity_id in self.registry.subscribed_ids() {
            if let Some(record) = self.cache.get(&entity_id) {
                let stale = now.signed_duration_since(record.last_updated) > self.threshold;
                if self.cache.set_stale(&entity_id, stale) {
                    debug!(entity_id = %entity_id, stale = stale, "Stale flag swept");
                    flipped += 1;
                }
            }
        }
        flipped
    }
}
