//! Notification lifecycle
//!
//! [`NotificationController`] decides whether the keyspace subscription is
//! running. Transitions go through one async mutex so concurrent toggles
//! from the HTTP layer stay idempotent, while [`NotificationController::is_enabled`]
//! reads an atomic and never waits.

use keyscope_core::store::NOTIFY_FLAGS;
use keyscope_core::{Envelope, StatsSnapshot, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientHandle;
use crate::error::Result;
use crate::hub::Hub;
use crate::router::{route_events, KeyFilter};
use crate::subscriber;

/// Status message sent when the upstream subscription drops on its own
pub const SUBSCRIPTION_LOST_MSG: &str = "subscription lost";

#[derive(Default)]
struct SubscriptionState {
    enabled: bool,
    cancel: Option<CancellationToken>,
    /// Bumped on every enable so a stale pump cannot disable a newer subscription
    generation: u64,
}

pub struct NotificationController {
    store: Arc<dyn Store>,
    hub: Hub,
    db: u32,
    filter: KeyFilter,
    event_buffer: usize,
    shutdown: CancellationToken,
    live: Arc<AtomicBool>,
    state: Arc<Mutex<SubscriptionState>>,
}

impl NotificationController {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        hub: Hub,
        db: u32,
        filter: KeyFilter,
        event_buffer: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            hub,
            db,
            filter,
            event_buffer,
            shutdown,
            live: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SubscriptionState::default())),
        }
    }

    /// Startup check. Never fails: problems are logged and leave the
    /// controller disabled.
    pub async fn start(&self, auto_enable: bool) {
        let flags = match self.store.notification_config().await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to read keyspace notification config, live view disabled"
                );
                return;
            }
        };

        if flags.is_empty() && !auto_enable {
            info!(
                "Keyspace notifications are off on the server and auto-enable is not set, \
                 live view disabled"
            );
            return;
        }

        if let Err(e) = self.enable().await {
            warn!(error = %e, "Failed to enable live view at startup");
        }
    }

    /// Start the subscription. Returns `false` if it was already running.
    pub async fn enable(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.enabled {
            debug!("Live view already enabled");
            return Ok(false);
        }

        if let Err(e) = self.ensure_notify_config().await {
            warn!(error = %e, "Failed to configure keyspace notifications");
            return Err(e);
        }

        let cancel = self.shutdown.child_token();
        let opened =
            subscriber::subscribe(&self.store, self.db, self.event_buffer, cancel.clone()).await;
        let events = match opened {
            Ok(events) => events,
            Err(e) => {
                warn!(db = self.db, error = %e, "Failed to open keyspace subscription");
                return Err(e);
            }
        };

        state.generation += 1;
        state.enabled = true;
        state.cancel = Some(cancel.clone());
        self.live.store(true, Ordering::SeqCst);
        self.hub.broadcast(&Envelope::status(true, "")).await;

        tokio::spawn(supervise(
            events,
            self.filter.clone(),
            self.hub.clone(),
            cancel,
            Arc::clone(&self.state),
            Arc::clone(&self.live),
            state.generation,
        ));

        info!(
            db = self.db,
            prefix = %self.filter.prefix(),
            generation = state.generation,
            "Live view enabled"
        );
        Ok(true)
    }

    /// Cancel the subscription. Returns `false` if it was not running.
    pub async fn disable(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.enabled {
            debug!("Live view already disabled");
            return false;
        }

        state.enabled = false;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        self.live.store(false, Ordering::SeqCst);
        self.hub.broadcast(&Envelope::status(false, "")).await;

        info!(generation = state.generation, "Live view disabled");
        true
    }

    /// Greet a new viewer and register it with the hub.
    ///
    /// The greeting is queued and the viewer registered while the state lock
    /// is held, so no status change can slip between the greeting and the
    /// first broadcast the viewer receives.
    pub async fn admit(&self, client: ClientHandle, mut stats: StatsSnapshot) -> Result<()> {
        let state = self.state.lock().await;
        stats.notifications_on = state.enabled;

        for envelope in [Envelope::status(state.enabled, ""), Envelope::Stats(stats)] {
            match envelope.to_frame() {
                Ok(frame) => {
                    if !client.send(frame) {
                        warn!(client_id = %client.id(), "Greeting frame dropped, queue full");
                    }
                }
                Err(e) => warn!(client_id = %client.id(), error = %e, "Failed to encode greeting"),
            }
        }

        self.hub.register(client).await
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn ensure_notify_config(&self) -> Result<()> {
        let flags = self.store.notification_config().await?;
        if flags.is_empty() {
            self.store.set_notification_config(NOTIFY_FLAGS).await?;
            info!(flags = NOTIFY_FLAGS, "Enabled keyspace notifications on the server");
        }
        Ok(())
    }
}

/// Run the router for one enabled period and flip the controller to
/// disabled if the upstream ends without being cancelled.
async fn supervise(
    events: tokio::sync::mpsc::Receiver<keyscope_core::ChangeEvent>,
    filter: KeyFilter,
    hub: Hub,
    cancel: CancellationToken,
    state: Arc<Mutex<SubscriptionState>>,
    live: Arc<AtomicBool>,
    generation: u64,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        _ = route_events(events, filter, hub.clone()) => {}
    }

    if cancel.is_cancelled() {
        return;
    }

    let mut state = state.lock().await;
    if !state.enabled || state.generation != generation {
        return;
    }
    state.enabled = false;
    state.cancel = None;
    live.store(false, Ordering::SeqCst);
    hub.broadcast(&Envelope::status(false, SUBSCRIPTION_LOST_MSG)).await;
    warn!(generation = generation, "Keyspace subscription lost, live view disabled");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{self, ClientQueue};
    use async_trait::async_trait;
    use bytes::Bytes;
    use keyscope_core::store::{MemoryUsage, NotificationStream};
    use keyscope_core::test_helpers::MemoryStore;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        RedisStore {}

        #[async_trait]
        impl Store for RedisStore {
            async fn notification_config(&self) -> keyscope_core::Result<String>;
            async fn set_notification_config(&self, flags: &str) -> keyscope_core::Result<()>;
            async fn psubscribe(&self, pattern: &str) -> keyscope_core::Result<NotificationStream>;
            async fn db_size(&self) -> keyscope_core::Result<i64>;
            async fn memory_usage(&self) -> keyscope_core::Result<MemoryUsage>;
        }
    }

    struct Harness {
        memory: Arc<MemoryStore>,
        controller: NotificationController,
        hub: Hub,
    }

    fn harness(memory: MemoryStore, prefix: &str) -> Harness {
        let memory = Arc::new(memory);
        let store: Arc<dyn Store> = memory.clone();
        let (hub, _task) = Hub::spawn(64, CancellationToken::new());
        let controller = NotificationController::new(
            store,
            hub.clone(),
            0,
            KeyFilter::new(prefix),
            8,
            CancellationToken::new(),
        );
        Harness {
            memory,
            controller,
            hub,
        }
    }

    async fn viewer(hub: &Hub) -> ClientQueue {
        let (handle, queue) = client::channel(64);
        hub.register(handle).await.unwrap();
        queue
    }

    fn drain(queue: &mut ClientQueue) -> Vec<Envelope> {
        std::iter::from_fn(|| queue.try_recv())
            .map(|frame: Bytes| serde_json::from_slice(&frame).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_enable_and_disable_are_idempotent() {
        let h = harness(MemoryStore::with_notify_flags("KEA"), "");
        let mut queue = viewer(&h.hub).await;

        assert!(h.controller.enable().await.unwrap());
        assert!(!h.controller.enable().await.unwrap());
        assert!(h.controller.is_enabled());
        assert_eq!(h.memory.patterns().len(), 1, "only one subscription is opened");

        assert!(h.controller.disable().await);
        assert!(!h.controller.disable().await);
        assert!(!h.controller.is_enabled());

        h.hub.client_count().await;
        assert_eq!(
            drain(&mut queue),
            [Envelope::status(true, ""), Envelope::status(false, "")]
        );
    }

    fn snapshot() -> StatsSnapshot {
        StatsSnapshot {
            db_size: 3,
            used_memory: 1024,
            used_memory_human: "1.00K".to_string(),
            notifications_on: true,
        }
    }

    #[tokio::test]
    async fn test_admit_greets_before_later_status() {
        let h = harness(MemoryStore::with_notify_flags("KEA"), "");
        let (handle, mut queue) = client::channel(8);

        // A snapshot taken before the state settled is corrected on admit.
        h.controller.admit(handle, snapshot()).await.unwrap();
        h.controller.enable().await.unwrap();

        h.hub.client_count().await;
        let stale = StatsSnapshot {
            notifications_on: false,
            ..snapshot()
        };
        assert_eq!(
            drain(&mut queue),
            [
                Envelope::status(false, ""),
                Envelope::Stats(stale),
                Envelope::status(true, ""),
            ]
        );
        assert_eq!(h.hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_admit_waits_for_pending_enable() {
        let h = Arc::new(harness(MemoryStore::with_notify_flags("KEA"), ""));

        // Queue an enable behind the transition lock, then a viewer behind it.
        let guard = h.controller.state.lock().await;
        let enabling = tokio::spawn({
            let h = Arc::clone(&h);
            async move { h.controller.enable().await }
        });
        tokio::task::yield_now().await;

        let (handle, mut queue) = client::channel(8);
        let stale = StatsSnapshot {
            notifications_on: false,
            ..snapshot()
        };
        let admitted = tokio::spawn({
            let h = Arc::clone(&h);
            async move { h.controller.admit(handle, stale).await }
        });
        tokio::task::yield_now().await;
        assert!(queue.try_recv().is_none(), "greeting waits for the transition");

        drop(guard);
        assert!(enabling.await.unwrap().unwrap());
        admitted.await.unwrap().unwrap();

        h.hub.client_count().await;
        assert_eq!(
            drain(&mut queue),
            [Envelope::status(true, ""), Envelope::Stats(snapshot())]
        );
    }

    #[tokio::test]
    async fn test_admit_with_tiny_queue_still_registers() {
        let h = harness(MemoryStore::with_notify_flags("KEA"), "");
        let (handle, mut queue) = client::channel(1);

        h.controller.admit(handle, snapshot()).await.unwrap();

        assert_eq!(drain(&mut queue), [Envelope::status(false, "")]);
        assert_eq!(h.hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_auto_enable_writes_flags_once() {
        let mut store = MockRedisStore::new();
        store
            .expect_notification_config()
            .returning(|| Ok(String::new()));
        store
            .expect_set_notification_config()
            .with(eq(NOTIFY_FLAGS))
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_psubscribe()
            .with(eq("__keyspace@0__:*"))
            .times(1)
            .returning(|_| Ok(futures::StreamExt::boxed(futures::stream::pending())));

        let (hub, _task) = Hub::spawn(16, CancellationToken::new());
        let controller = NotificationController::new(
            Arc::new(store),
            hub,
            0,
            KeyFilter::default(),
            8,
            CancellationToken::new(),
        );

        controller.start(true).await;
        assert!(controller.is_enabled());
    }

    #[tokio::test]
    async fn test_empty_config_without_auto_enable_stays_disabled() {
        let h = harness(MemoryStore::new(), "");

        h.controller.start(false).await;

        assert!(!h.controller.is_enabled());
        assert!(h.memory.config_writes().is_empty());
        assert!(h.memory.patterns().is_empty());
    }

    #[tokio::test]
    async fn test_existing_config_enables_without_writing() {
        let h = harness(MemoryStore::with_notify_flags("Kx"), "");

        h.controller.start(false).await;

        assert!(h.controller.is_enabled());
        assert!(h.memory.config_writes().is_empty());
    }

    #[tokio::test]
    async fn test_config_error_leaves_controller_disabled() {
        let h = harness(MemoryStore::new(), "");
        h.memory.fail_config(true);

        h.controller.start(true).await;
        assert!(!h.controller.is_enabled());
        assert!(h.controller.enable().await.is_err());
        assert!(!h.controller.is_enabled());
    }

    #[tokio::test]
    async fn test_subscribe_error_is_returned() {
        let h = harness(MemoryStore::with_notify_flags("KEA"), "");
        h.memory.fail_subscribe(true);

        assert!(h.controller.enable().await.is_err());
        assert!(!h.controller.is_enabled());

        h.memory.fail_subscribe(false);
        assert!(h.controller.enable().await.unwrap(), "a later enable can succeed");
    }

    #[tokio::test]
    async fn test_disable_cancels_subscription() {
        let h = harness(MemoryStore::with_notify_flags("KEA"), "");
        h.controller.enable().await.unwrap();
        assert_eq!(h.memory.open_subscriptions(), 1);

        h.controller.disable().await;

        for _ in 0..100 {
            if h.memory.open_subscriptions() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.memory.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_subscription_loss_disables() {
        let h = harness(MemoryStore::with_notify_flags("KEA"), "");
        let mut queue = viewer(&h.hub).await;
        h.controller.enable().await.unwrap();

        h.memory.drop_subscriptions();

        for _ in 0..100 {
            if !h.controller.is_enabled() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!h.controller.is_enabled());

        h.hub.client_count().await;
        assert_eq!(
            drain(&mut queue),
            [
                Envelope::status(true, ""),
                Envelope::status(false, SUBSCRIPTION_LOST_MSG)
            ]
        );

        assert!(h.controller.enable().await.unwrap(), "can re-enable after loss");
    }

    #[tokio::test]
    async fn test_auto_enable_end_to_end() {
        let h = harness(MemoryStore::new(), "app:");
        let mut queue = viewer(&h.hub).await;

        h.controller.start(true).await;
        assert_eq!(h.memory.config_writes(), [NOTIFY_FLAGS]);

        h.memory.touch(0, "other:1", "set");
        h.memory.touch(0, "app:42", "set");

        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.extend(drain(&mut queue));
            if seen.len() >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            seen,
            [
                Envelope::status(true, ""),
                Envelope::from(keyscope_core::ChangeEvent::new("set", "app:42")),
            ]
        );
    }
}
