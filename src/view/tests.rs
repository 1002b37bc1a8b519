use super::*;
use crate::connection::{ConnCmd, ConnectionHandle};
use std::time::Duration;
use tokio::sync::mpsc;

const GRACE: Duration = Duration::from_millis(100);

fn entity(id: &str) -> EntityId {
    EntityId::parse(id).unwrap()
}

struct Fixture {
    cache: Arc<EntityCache>,
    registry: SubscriptionRegistry,
    status_tx: watch::Sender<ConnectionStatus>,
    status_rx: watch::Receiver<ConnectionStatus>,
    cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
}

fn fixture() -> Fixture {
    let cache = Arc::new(EntityCache::new());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let registry = SubscriptionRegistry::new(ConnectionHandle::new(cmd_tx), GRACE);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    Fixture {
        cache,
        registry,
        status_tx,
        status_rx,
        cmd_rx,
    }
}

impl Fixture {
    fn entity_view(&self, id: &str) -> EntityView {
        EntityView::new(
            Arc::clone(&self.cache),
            self.registry.clone(),
            self.status_rx.clone(),
            entity(id),
        )
    }

    fn all_view(&self) -> AllEntitiesView {
        AllEntitiesView::new(Arc::clone(&self.cache), self.status_rx.clone())
    }

    fn drain(&mut self) -> (Vec<EntityId>, Vec<EntityId>) {
        let mut subs = Vec::new();
        let mut unsubs = Vec::new();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                ConnCmd::Subscribe(id) => subs.push(id),
                ConnCmd::Unsubscribe(id) => unsubs.push(id),
                _ => {}
            }
        }
        (subs, unsubs)
    }
}

#[tokio::test(start_paused = true)]
async fn test_view_acquires_on_create_and_releases_on_drop() {
    let mut fx = fixture();
    let id = entity("light.kitchen");

    let view = fx.entity_view("light.kitchen");
    let (subs, _) = fx.drain();
    assert_eq!(subs, vec![id.clone()]);
    assert_eq!(fx.registry.ref_count(&id), 1);

    drop(view);
    tokio::time::sleep(GRACE * 2).await;
    let (_, unsubs) = fx.drain();
    assert_eq!(unsubs, vec![id.clone()]);
    assert_eq!(fx.registry.ref_count(&id), 0);
}

#[tokio::test(start_paused = true)]
async fn test_loading_until_first_snapshot() {
    let fx = fixture();
    let view = fx.entity_view("sensor.temp");

    assert!(view.is_loading());
    assert!(view.record().is_none());
    assert!(!view.is_stale());

    fx.cache
        .apply_event(entity("sensor.temp"), "21".to_string(), HashMap::new());

    assert!(!view.is_loading());
    assert_eq!(view.record().unwrap().state, "21");
}

#[tokio::test(start_paused = true)]
async fn test_two_views_share_one_subscription() {
    let mut fx = fixture();
    let id = entity("sensor.temp");

    let first = fx.entity_view("sensor.temp");
    let mut second = fx.entity_view("sensor.temp");

    let (subs, _) = fx.drain();
    assert_eq!(subs.len(), 1);

    // Unmount the first — interest must survive
    drop(first);
    tokio::time::sleep(GRACE * 2).await;
    let (_, unsubs) = fx.drain();
    assert!(unsubs.is_empty());
    assert_eq!(fx.registry.ref_count(&id), 1);

    // And the second still sees updates
    fx.cache
        .apply_event(id.clone(), "22".to_string(), HashMap::new());
    tokio::time::timeout(Duration::from_secs(1), second.changed())
        .await
        .expect("expected a change notification");
    assert_eq!(second.record().unwrap().state, "22");
}

#[tokio::test(start_paused = true)]
async fn test_changed_ignores_unrelated_entities() {
    let fx = fixture();
    let mut view = fx.entity_view("light.kitchen");

    fx.cache
        .apply_event(entity("sensor.temp"), "21".to_string(), HashMap::new());

    // No wake-up for an entity this view does not watch
    let woken = tokio::time::timeout(Duration::from_millis(50), view.changed()).await;
    assert!(woken.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_changed_wakes_on_connection_transition() {
    let fx = fixture();
    let mut view = fx.entity_view("light.kitchen");
    assert!(!view.is_connected());

    fx.status_tx.send(ConnectionStatus::Connected).unwrap();
    tokio::time::timeout(Duration::from_secs(1), view.changed())
        .await
        .expect("expected a wake-up on status change");
    assert!(view.is_connected());
    assert_eq!(view.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_set_entity_swaps_interest() {
    let mut fx = fixture();
    let kitchen = entity("light.kitchen");
    let temp = entity("sensor.temp");

    let mut view = fx.entity_view("light.kitchen");
    fx.drain();

    view.set_entity(temp.clone());
    assert_eq!(view.entity_id(), &temp);
    assert_eq!(fx.registry.ref_count(&temp), 1);

    // Old interest drains away after the grace window
    tokio::time::sleep(GRACE * 2).await;
    let (subs, unsubs) = fx.drain();
    assert_eq!(subs, vec![temp.clone()]);
    assert_eq!(unsubs, vec![kitchen.clone()]);
    assert_eq!(fx.registry.ref_count(&kitchen), 0);

    // Updates for the new entity arrive
    fx.cache
        .apply_event(temp.clone(), "19".to_string(), HashMap::new());
    assert_eq!(view.record().unwrap().state, "19");
}

#[tokio::test(start_paused = true)]
async fn test_set_entity_same_id_is_a_no_op() {
    let mut fx = fixture();
    let mut view = fx.entity_view("light.kitchen");
    fx.drain();

    view.set_entity(entity("light.kitchen"));
    tokio::time::sleep(GRACE * 2).await;

    let (subs, unsubs) = fx.drain();
    assert!(subs.is_empty());
    assert!(unsubs.is_empty());
    assert_eq!(fx.registry.ref_count(&entity("light.kitchen")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_flag_reaches_view() {
    let fx = fixture();
    let id = entity("sensor.temp");
    let mut view = fx.entity_view("sensor.temp");

    fx.cache
        .apply_event(id.clone(), "21".to_string(), HashMap::new());
    assert!(!view.is_stale());

    fx.cache.set_stale(&id, true);
    tokio::time::timeout(Duration::from_secs(1), view.changed())
        .await
        .expect("expected a wake-up on stale flip");
    assert!(view.is_stale());
}

#[tokio::test(start_paused = true)]
async fn test_all_entities_view_sees_everything() {
    let fx = fixture();
    let mut all = fx.all_view();

    assert!(all.is_loading());
    assert!(all.entities().is_empty());

    fx.cache
        .apply_event(entity("light.kitchen"), "on".to_string(), HashMap::new());
    tokio::time::timeout(Duration::from_secs(1), all.changed())
        .await
        .expect("expected a wake-up");

    fx.cache
        .apply_event(entity("sensor.temp"), "21".to_string(), HashMap::new());
    tokio::time::timeout(Duration::from_secs(1), all.changed())
        .await
        .expect("expected a wake-up");

    assert!(!all.is_loading());
    let snapshot = all.entities();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get(&entity("light.kitchen")).unwrap().state, "on");
}

#[tokio::test(start_paused = true)]
async fn test_all_entities_view_adds_no_wire_interest() {
    let mut fx = fixture();
    let _all = fx.all_view();

    let (subs, unsubs) = fx.drain();
    assert!(subs.is_empty());
    assert!(unsubs.is_empty());
    assert!(fx.registry.subscribed_ids().is_empty());
}
