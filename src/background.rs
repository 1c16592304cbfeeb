//! Background context: the process root that owns and wires every component.
//!
//! [`Background`] builds the shared tab tracker, connection manager,
//! notification bus and router, restores persisted connections and
//! registers the built-in actions.
//!
//! # Built-in Actions
//!
//! | Action | Params | Reply payload |
//! |--------|--------|---------------|
//! | `ping` | | `timestamp`, `ready` |
//! | `addConnection` | `port` | `connectionId` |
//! | `connectWebSocket` | `connectionId` | |
//! | `disconnectWebSocket` | `connectionId` | |
//! | `removeConnection` | `connectionId` | |
//! | `getConnections` | | `connections` |
//! | `sendWebSocketMessage` | `connectionId`, `data` | |
//! | `canAcceptRequest` | `tabId` | `canAccept` |
//! | `markTabBusy` | `tabId` | |
//! | `markTabFree` | `tabId` | |
//! | `getTabStatus` | `tabId` | `state` |
//! | `getAvailableTabs` | `tabIds` | `tabs`, `count` |
//! | `getHeartbeatStatus` | `conversationId` | `active`, `tabId`, `lastPongTime` |
//!
//! `sendWebSocketMessage` runs through a circuit breaker owned by the target
//! connection, so one dead controller cannot block sends to another.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use zentab_bridge::{Background, BridgeConfig, FileStorage};
//!
//! let storage = Arc::new(FileStorage::new("bridge-state.json"));
//! let background = Background::start(BridgeConfig::default(), storage).await?;
//!
//! let reply = background.dispatch(json!({"action": "addConnection", "port": 1500})).await;
//! background.shutdown().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::clock::{SharedClock, SystemClock};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, TabId};
use crate::protocol::{Notification, Reply, RuntimeMessage};
use crate::retry::BreakerMap;
use crate::router::{Responder, Router};
use crate::storage::Storage;
use crate::tabs::{HeartbeatMonitor, ListenerHandle, TabEvent, TabTracker};
use crate::transport::ConnectionManager;

// ============================================================================
// Background
// ============================================================================

/// Owner of every long-lived component.
pub struct Background {
    config: BridgeConfig,
    clock: SharedClock,
    tracker: Arc<TabTracker>,
    heartbeat: Arc<HeartbeatMonitor>,
    connections: Arc<ConnectionManager>,
    breakers: Arc<BreakerMap<ConnectionId>>,
    bus: MessageBus,
    router: Router,
    tab_events: broadcast::Sender<TabEvent>,
    listener: Mutex<Option<ListenerHandle>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Background")
            .field("tracked_tabs", &self.tracker.tracked_count())
            .field("connections", &self.connections.connections().len())
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Background - Lifecycle
// ============================================================================

impl Background {
    /// Starts the background context on the system clock.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `config` is invalid
    /// - storage errors if persisted connections cannot be restored
    pub async fn start(config: BridgeConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        Self::start_with_clock(config, storage, SystemClock::shared()).await
    }

    /// Starts the background context on an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Background::start`].
    pub async fn start_with_clock(
        config: BridgeConfig,
        storage: Arc<dyn Storage>,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;

        let bus = MessageBus::new(config.bus_capacity);
        let tracker = Arc::new(TabTracker::with_min_free_time(
            Arc::clone(&clock),
            config.tabs.min_free_time,
        ));
        let connections = ConnectionManager::new(
            config.connections.clone(),
            storage,
            bus.clone(),
            Arc::clone(&clock),
        );
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&clock),
            config.tabs.pong_timeout,
        ));
        let breakers = Arc::new(BreakerMap::new(config.breaker.clone(), Arc::clone(&clock)));

        let restored = config
            .retry
            .execute_with_condition(|| connections.load(), |e, _| e.is_retryable())
            .await?;

        let (tab_events, _) = broadcast::channel(config.bus_capacity);
        let listener = tracker.listen(tab_events.subscribe());
        let sweeper = spawn_sweeper(&tracker, &heartbeat, bus.subscribe(), &config);

        let router = builtin_routes(&clock, &tracker, &heartbeat, &connections, &breakers);

        info!(
            restored,
            actions = router.actions().len(),
            stuck_recovery = config.tabs.stuck_after.is_some(),
            "Background started"
        );

        Ok(Self {
            config,
            clock,
            tracker,
            heartbeat,
            connections,
            breakers,
            bus,
            router,
            tab_events,
            listener: Mutex::new(Some(listener)),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Stops the tab listener and the sweep, then disconnects every socket.
    ///
    /// # Errors
    ///
    /// Returns storage errors from persisting the final connection list.
    pub async fn shutdown(&self) -> Result<()> {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.detach().await;
        }

        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        self.connections.shutdown().await?;
        info!("Background shut down");
        Ok(())
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

// ============================================================================
// Background - Messaging
// ============================================================================

impl Background {
    /// Dispatches a runtime message and returns the reply object.
    pub async fn dispatch(&self, message: Value) -> Value {
        self.router.dispatch(message).await
    }

    /// Dispatches a runtime message and answers through `responder`.
    pub async fn handle(&self, message: Value, responder: Responder) {
        self.router.handle(message, responder).await;
    }

    /// Subscribes to cross-context notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    /// Sender for browser tab lifecycle events.
    #[inline]
    #[must_use]
    pub fn tab_events(&self) -> &broadcast::Sender<TabEvent> {
        &self.tab_events
    }

    /// Feeds one tab lifecycle event to the tracker.
    pub fn emit_tab_event(&self, event: TabEvent) {
        if self.tab_events.send(event).is_err() {
            debug!(tab_id = %event.tab_id(), "Tab event dropped, listener detached");
        }
    }
}

// ============================================================================
// Background - Accessors
// ============================================================================

impl Background {
    /// Settings in use.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Clock shared by every component.
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Shared tab tracker.
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &Arc<TabTracker> {
        &self.tracker
    }

    /// Conversation heartbeat monitor.
    #[inline]
    #[must_use]
    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    /// Shared connection manager.
    #[inline]
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Per-connection breakers guarding outbound controller frames.
    #[inline]
    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerMap<ConnectionId>> {
        &self.breakers
    }

    /// Notification bus.
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Action router.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }
}

// ============================================================================
// Sweep
// ============================================================================

/// Feeds controller frames to the heartbeat monitor and periodically frees
/// stuck tabs and tabs of silent conversations.
fn spawn_sweeper(
    tracker: &Arc<TabTracker>,
    heartbeat: &Arc<HeartbeatMonitor>,
    mut notifications: broadcast::Receiver<Notification>,
    config: &BridgeConfig,
) -> JoinHandle<()> {
    let stuck_after = config.tabs.stuck_after;
    let interval = config.tabs.recovery_interval.max(Duration::from_millis(1));
    let tracker = Arc::clone(tracker);
    let heartbeat = Arc::clone(heartbeat);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(stuck_after) = stuck_after {
                        let freed = tracker.recover_stuck(stuck_after);
                        if !freed.is_empty() {
                            info!(count = freed.len(), tabs = ?freed, "Freed stuck tabs");
                        }
                    }

                    let expired = heartbeat.expire(&tracker);
                    if !expired.is_empty() {
                        info!(count = expired.len(), tabs = ?expired, "Freed tabs of silent conversations");
                    }
                }

                notification = notifications.recv() => match notification {
                    Ok(Notification::Message { data, .. }) => {
                        heartbeat.observe(&data);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sweep lagged behind notifications");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Notification bus closed, sweep stopped");
                        break;
                    }
                },
            }
        }
    })
}

// ============================================================================
// Built-in Routes
// ============================================================================

fn builtin_routes(
    clock: &SharedClock,
    tracker: &Arc<TabTracker>,
    heartbeat: &Arc<HeartbeatMonitor>,
    connections: &Arc<ConnectionManager>,
    breakers: &Arc<BreakerMap<ConnectionId>>,
) -> Router {
    let router = Router::new();

    let ping_clock = Arc::clone(clock);
    let router = router.route_fn("ping", move |_| {
        let now = ping_clock.now_ms();
        async move {
            Ok(Reply::ok()
                .with("timestamp", json!(now))
                .with("ready", Value::Bool(true)))
        }
    });

    let router = connection_routes(router, connections, breakers);
    let router = tab_routes(router, tracker);

    let monitor = Arc::clone(heartbeat);
    router.route_fn("getHeartbeatStatus", move |message: RuntimeMessage| {
        let result = message.require_str("conversationId").map(|conversation_id| {
            match monitor.status(conversation_id) {
                Some(heartbeat) => Reply::ok()
                    .with("active", Value::Bool(true))
                    .with("tabId", json!(heartbeat.tab_id))
                    .with("lastPongTime", json!(heartbeat.last_pong_time)),
                None => Reply::ok().with("active", Value::Bool(false)),
            }
        });
        async move { result }
    })
}

fn connection_routes(
    router: Router,
    connections: &Arc<ConnectionManager>,
    breakers: &Arc<BreakerMap<ConnectionId>>,
) -> Router {
    let manager = Arc::clone(connections);
    let router = router.route_fn("addConnection", move |message: RuntimeMessage| {
        let manager = Arc::clone(&manager);
        async move {
            let port = message.port()?;
            let id = manager.add_connection(port).await?;
            Ok(Reply::ok().with("connectionId", json!(id)))
        }
    });

    let manager = Arc::clone(connections);
    let router = router.route_fn("connectWebSocket", move |message: RuntimeMessage| {
        let manager = Arc::clone(&manager);
        async move {
            let id = message.connection_id()?;
            manager.connect(&id).await?;
            Ok(Reply::ok())
        }
    });

    let manager = Arc::clone(connections);
    let router = router.route_fn("disconnectWebSocket", move |message: RuntimeMessage| {
        let manager = Arc::clone(&manager);
        async move {
            let id = message.connection_id()?;
            manager.disconnect(&id).await?;
            Ok(Reply::ok())
        }
    });

    let manager = Arc::clone(connections);
    let guards = Arc::clone(breakers);
    let router = router.route_fn("removeConnection", move |message: RuntimeMessage| {
        let manager = Arc::clone(&manager);
        let guards = Arc::clone(&guards);
        async move {
            let id = message.connection_id()?;
            manager.remove_connection(&id).await?;
            guards.remove(&id);
            Ok(Reply::ok())
        }
    });

    let manager = Arc::clone(connections);
    let router = router.route_fn("getConnections", move |_| {
        let snapshots = manager.connections();
        async move {
            let connections = serde_json::to_value(snapshots)?;
            Ok(Reply::ok().with("connections", connections))
        }
    });

    let manager = Arc::clone(connections);
    let guards = Arc::clone(breakers);
    router.route_fn("sendWebSocketMessage", move |message: RuntimeMessage| {
        let manager = Arc::clone(&manager);
        let guards = Arc::clone(&guards);
        async move {
            let id = message.connection_id()?;
            let data = message
                .get("data")
                .cloned()
                .ok_or_else(|| Error::invalid_argument("'data' is required"))?;

            // Unknown ids never reach a breaker.
            if manager.connection(&id).is_none() {
                return Err(Error::connection_not_found(id));
            }

            guards.get(&id).call(|| manager.send(&id, data)).await?;
            Ok(Reply::ok())
        }
    })
}

fn tab_routes(router: Router, tracker: &Arc<TabTracker>) -> Router {
    let tabs = Arc::clone(tracker);
    let router = router.route_fn("canAcceptRequest", move |message: RuntimeMessage| {
        let result = message
            .tab_id()
            .map(|tab_id| Reply::ok().with("canAccept", json!(tabs.can_accept_request(tab_id))));
        async move { result }
    });

    let tabs = Arc::clone(tracker);
    let router = router.route_fn("markTabBusy", move |message: RuntimeMessage| {
        let result = message.tab_id().map(|tab_id| {
            tabs.mark_busy(tab_id);
            Reply::ok()
        });
        async move { result }
    });

    let tabs = Arc::clone(tracker);
    let router = router.route_fn("markTabFree", move |message: RuntimeMessage| {
        let result = message.tab_id().map(|tab_id| {
            tabs.mark_free(tab_id);
            Reply::ok()
        });
        async move { result }
    });

    let tabs = Arc::clone(tracker);
    let router = router.route_fn("getTabStatus", move |message: RuntimeMessage| {
        let result = message.tab_id().and_then(|tab_id| {
            let state = serde_json::to_value(tabs.status(tab_id))?;
            Ok(Reply::ok().with("state", state))
        });
        async move { result }
    });

    let tabs = Arc::clone(tracker);
    router.route_fn("getAvailableTabs", move |message: RuntimeMessage| {
        let result = tab_ids(&message).map(|candidates| {
            let available = tabs.available(candidates);
            Reply::ok()
                .with("count", json!(available.len()))
                .with("tabs", json!(available))
        });
        async move { result }
    })
}

/// Reads the `tabIds` array parameter.
fn tab_ids(message: &RuntimeMessage) -> Result<Vec<TabId>> {
    let raw = message
        .get("tabIds")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::invalid_argument("'tabIds' must be an array"))?;

    raw.iter()
        .map(|value| {
            value
                .as_u64()
                .and_then(TabId::from_u64)
                .ok_or_else(|| Error::invalid_argument(format!("invalid tab id: {value}")))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::ManualClock;
    use crate::protocol::{ConnectionSnapshot, ConnectionStatus};
    use crate::storage::{self, MemoryStorage, keys};
    use crate::tabs::TrackerConfig;
    use crate::transport::ConnectionConfig;

    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    const START_MS: u64 = 1_700_000_000_000;

    fn quiet_config() -> BridgeConfig {
        BridgeConfig::default().with_connections(
            ConnectionConfig::default()
                .with_max_reconnect_attempts(0)
                .with_connect_timeout(Duration::from_secs(2)),
        )
    }

    async fn start(config: BridgeConfig) -> (Arc<ManualClock>, Arc<MemoryStorage>, Background) {
        let clock = Arc::new(ManualClock::new(START_MS));
        let storage = Arc::new(MemoryStorage::new());
        let background = Background::start_with_clock(
            config,
            Arc::clone(&storage) as Arc<dyn Storage>,
            Arc::clone(&clock) as SharedClock,
        )
        .await
        .expect("start");
        (clock, storage, background)
    }

    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        port
    }

    /// A controller that accepts every client and drains what it sends.
    async fn live_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        port
    }

    async fn add_connection(background: &Background, port: u16) -> anyhow::Result<String> {
        let reply = background
            .dispatch(json!({"action": "addConnection", "port": port}))
            .await;
        Ok(reply["connectionId"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no connectionId in {reply}"))?
            .to_string())
    }

    async fn send_to(background: &Background, id: &str) -> Value {
        background
            .dispatch(json!({"action": "sendWebSocketMessage", "connectionId": id, "data": {"type": "x"}}))
            .await
    }

    #[tokio::test]
    async fn test_ping() {
        let (_, _, background) = start(quiet_config()).await;

        let reply = background.dispatch(json!({"action": "ping"})).await;
        assert_eq!(
            reply,
            json!({"success": true, "timestamp": START_MS, "ready": true})
        );
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let (_, _, background) = start(quiet_config()).await;

        let reply = background.dispatch(json!({"action": "unknownFoo"})).await;
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().expect("error").contains("unknownFoo"));
    }

    #[tokio::test]
    async fn test_tab_cooldown_through_messages() {
        let (clock, _, background) = start(quiet_config()).await;

        let busy = background.dispatch(json!({"action": "markTabBusy", "tabId": 7})).await;
        assert_eq!(busy, json!({"success": true}));

        let reply = background.dispatch(json!({"action": "canAcceptRequest", "tabId": 7})).await;
        assert_eq!(reply["canAccept"], false);

        background.dispatch(json!({"action": "markTabFree", "tabId": 7})).await;
        let reply = background.dispatch(json!({"action": "canAcceptRequest", "tabId": 7})).await;
        assert_eq!(reply["canAccept"], false);

        clock.advance(Duration::from_millis(2000));
        let reply = background.dispatch(json!({"action": "canAcceptRequest", "tabId": 7})).await;
        assert_eq!(reply["canAccept"], true);

        let reply = background.dispatch(json!({"action": "getTabStatus", "tabId": 7})).await;
        assert_eq!(reply["state"]["isBusy"], false);
        assert_eq!(reply["state"]["lastUsed"], START_MS);

        let reply = background.dispatch(json!({"action": "getTabStatus", "tabId": 8})).await;
        assert_eq!(reply["state"], Value::Null);
    }

    #[tokio::test]
    async fn test_get_available_tabs() {
        let (_, _, background) = start(quiet_config()).await;
        background.tracker().mark_busy(TabId::new(2));

        let reply = background
            .dispatch(json!({"action": "getAvailableTabs", "tabIds": [1, 2, 3]}))
            .await;
        assert_eq!(reply, json!({"success": true, "tabs": [1, 3], "count": 2}));

        let reply = background
            .dispatch(json!({"action": "getAvailableTabs", "tabIds": "1,2"}))
            .await;
        assert_eq!(reply["success"], false);
    }

    #[tokio::test]
    async fn test_missing_tab_id() {
        let (_, _, background) = start(quiet_config()).await;

        let reply = background.dispatch(json!({"action": "markTabBusy"})).await;
        assert_eq!(reply["success"], false);
        assert_eq!(background.tracker().tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_tab_removal_event_clears_state() {
        let (_, _, background) = start(quiet_config()).await;
        background.tracker().mark_busy(TabId::new(42));

        background.emit_tab_event(TabEvent::Removed {
            tab_id: TabId::new(42),
        });

        for _ in 0..100 {
            if background.tracker().status(TabId::new(42)).is_none() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(background.tracker().status(TabId::new(42)).is_none());
    }

    #[tokio::test]
    async fn test_connection_actions() -> anyhow::Result<()> {
        let (_, storage, background) = start(quiet_config()).await;
        let port = dead_port().await;

        let reply = background
            .dispatch(json!({"action": "addConnection", "port": port}))
            .await;
        assert_eq!(reply["success"], true);
        let id = reply["connectionId"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no connectionId in {reply}"))?
            .to_string();
        assert!(id.starts_with("ws-"));

        let reply = background.dispatch(json!({"action": "getConnections"})).await;
        let connections: Vec<ConnectionSnapshot> =
            serde_json::from_value(reply["connections"].clone())?;
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].status, ConnectionStatus::Disconnected);
        assert_eq!(connections[0].url, format!("ws://localhost:{port}"));

        let reply = background
            .dispatch(json!({"action": "sendWebSocketMessage", "connectionId": id, "data": {"type": "x"}}))
            .await;
        assert_eq!(reply, json!({"success": false, "error": "Connection closed"}));

        let reply = background
            .dispatch(json!({"action": "sendWebSocketMessage", "connectionId": id}))
            .await;
        assert_eq!(reply, json!({"success": false, "error": "'data' is required"}));

        let reply = background
            .dispatch(json!({"action": "removeConnection", "connectionId": id}))
            .await;
        assert_eq!(reply, json!({"success": true}));

        let persisted: Option<Vec<ConnectionSnapshot>> =
            storage::load(&*storage, keys::WS_CONNECTIONS).await?;
        assert_eq!(persisted.map(|list| list.len()), Some(0));

        let reply = background
            .dispatch(json!({"action": "connectWebSocket", "connectionId": id}))
            .await;
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().unwrap_or_default().contains(&id));
        Ok(())
    }

    #[tokio::test]
    async fn test_send_failures_stay_with_their_connection() -> anyhow::Result<()> {
        let (_, _, background) = start(quiet_config()).await;
        let healthy = add_connection(&background, live_port().await).await?;
        let dead = add_connection(&background, dead_port().await).await?;

        assert_eq!(send_to(&background, &healthy).await, json!({"success": true}));

        // Unknown ids are rejected before any breaker sees them.
        for _ in 0..6 {
            let reply = send_to(&background, "ws-0-typo").await;
            assert_eq!(reply["error"], "Connection not found: ws-0-typo");
        }
        assert!(background.breakers().peek(&ConnectionId::new("ws-0-typo")).is_none());
        assert_eq!(send_to(&background, &healthy).await, json!({"success": true}));

        // Five transient failures open only the dead connection's breaker.
        for _ in 0..5 {
            assert_eq!(send_to(&background, &dead).await["error"], "Connection closed");
        }
        let reply = send_to(&background, &dead).await;
        assert!(
            reply["error"]
                .as_str()
                .unwrap_or_default()
                .starts_with("Circuit breaker is open")
        );
        assert_eq!(send_to(&background, &healthy).await, json!({"success": true}));

        background
            .dispatch(json!({"action": "removeConnection", "connectionId": dead}))
            .await;
        assert!(background.breakers().peek(&ConnectionId::new(dead)).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_conversation_frees_its_tab() {
        let config = quiet_config().with_tabs(TrackerConfig {
            recovery_interval: Duration::from_millis(10),
            pong_timeout: Duration::from_secs(10),
            ..TrackerConfig::default()
        });
        let (clock, _, background) = start(config).await;
        background.tracker().mark_busy(TabId::new(4));

        background.bus().publish(Notification::Message {
            connection_id: ConnectionId::new("ws-1-abc"),
            data: json!({"type": "conversationPong", "conversationId": "c1", "tabId": 4, "requestId": "req-1"}),
        });

        for _ in 0..100 {
            if background.heartbeat().status("c1").is_some() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        let reply = background
            .dispatch(json!({"action": "getHeartbeatStatus", "conversationId": "c1"}))
            .await;
        assert_eq!(reply["active"], true);
        assert_eq!(reply["tabId"], 4);
        assert_eq!(reply["lastPongTime"], START_MS);

        clock.advance(Duration::from_millis(10_001));
        for _ in 0..100 {
            if background.tracker().status(TabId::new(4)).is_some_and(|s| !s.is_busy) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(!background.tracker().status(TabId::new(4)).expect("state").is_busy);

        let reply = background
            .dispatch(json!({"action": "getHeartbeatStatus", "conversationId": "c1"}))
            .await;
        assert_eq!(reply, json!({"success": true, "active": false}));
    }

    #[tokio::test]
    async fn test_restores_persisted_connections() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new(START_MS));
        let storage = Arc::new(MemoryStorage::new());

        let mut record = ConnectionSnapshot::new("ws-1-abc".into(), 1500);
        record.status = ConnectionStatus::Connected;
        storage::save(&*storage, keys::WS_CONNECTIONS, &vec![record]).await?;

        let background = Background::start_with_clock(
            quiet_config(),
            Arc::clone(&storage) as Arc<dyn Storage>,
            clock as SharedClock,
        )
        .await?;

        let restored = background.connections().connections();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].status, ConnectionStatus::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = Background::start(
            quiet_config().with_bus_capacity(0),
            Arc::new(MemoryStorage::new()),
        )
        .await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_stuck_tabs_are_recovered() {
        let config = quiet_config().with_tabs(TrackerConfig {
            stuck_after: Some(Duration::from_millis(100)),
            recovery_interval: Duration::from_millis(10),
            ..TrackerConfig::default()
        });
        let (clock, _, background) = start(config).await;

        background.tracker().mark_busy(TabId::new(5));
        clock.advance(Duration::from_millis(200));

        for _ in 0..100 {
            if background.tracker().status(TabId::new(5)).is_some_and(|s| !s.is_busy) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        let state = background.tracker().status(TabId::new(5)).expect("state");
        assert!(!state.is_busy);
    }

    #[tokio::test]
    async fn test_shutdown_detaches_listener() {
        let (_, _, background) = start(quiet_config()).await;
        background.tracker().mark_busy(TabId::new(9));

        background.shutdown().await.expect("shutdown");
        background.emit_tab_event(TabEvent::Removed {
            tab_id: TabId::new(9),
        });
        sleep(Duration::from_millis(20)).await;

        assert!(background.tracker().status(TabId::new(9)).is_some());
        assert_eq!(background.tab_events().receiver_count(), 0);
    }
}
