//! WebSocket connection manager.
//!
//! Owns every controller connection, drives its state machine and keeps the
//! persisted list under [`keys::WS_CONNECTIONS`] in step with memory.
//!
//! # State Machine
//!
//! ```text
//!                 connect()
//! disconnected ─────────────► connecting ──── open ────► connected
//!      ▲                          │                         │
//!      │                        fail                      close
//!      │                          ▼                         │
//!      └──────── (close path) ── error                      │
//!      └───────────────────────────────────────────────────┘
//!                  reconnect after `reconnect_delay`
//!                  while attempts < max_reconnect_attempts
//! ```
//!
//! Every transition is persisted first and then broadcast as
//! [`Notification::StatusChanged`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::clock::SharedClock;
use crate::config::{millis, opt_millis};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{ConnectionSnapshot, ConnectionStatus, Notification, frame};
use crate::storage::{self, Storage, keys};

use super::socket::Socket;

// ============================================================================
// Constants
// ============================================================================

/// Automatic reconnects allowed after a close.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed wait before each automatic reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Limit on opening a socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected socket silent for this long is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Number of recent `requestId`s remembered per connection.
pub const DEFAULT_DEDUP_WINDOW: usize = 50;

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Automatic reconnects before a connection is frozen.
    pub max_reconnect_attempts: u32,

    /// Wait before each automatic reconnect.
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,

    /// Limit on the opening handshake.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// Close a connected socket after this much silence. `None` disables.
    #[serde(with = "opt_millis")]
    pub idle_timeout: Option<Duration>,

    /// Recent `requestId`s remembered for de-duplication.
    pub dedup_window: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl ConnectionConfig {
    /// Sets the automatic reconnect budget.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the fixed reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the opening handshake limit.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = limit;
        self
    }

    /// Sets or disables the idle timeout.
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Sets the de-duplication window.
    #[inline]
    #[must_use]
    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window;
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero connect timeout, zero idle
    /// timeout or zero de-duplication window.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connectTimeout must be > 0"));
        }
        if self.idle_timeout.is_some_and(|idle| idle.is_zero()) {
            return Err(Error::config("idleTimeout must be > 0 or null"));
        }
        if self.dedup_window == 0 {
            return Err(Error::config("dedupWindow must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// In-memory state of one connection.
#[derive(Debug)]
struct Entry {
    record: ConnectionSnapshot,
    /// Insertion order, used to keep the persisted list stable.
    seq: u64,
    socket: Option<Socket>,
    reconnect: Option<JoinHandle<()>>,
    /// Bumped whenever the current socket or timer is superseded.
    generation: u64,
    recent: VecDeque<String>,
}

impl Entry {
    fn new(record: ConnectionSnapshot, seq: u64) -> Self {
        Self {
            record,
            seq,
            socket: None,
            reconnect: None,
            generation: 0,
            recent: VecDeque::new(),
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    entries: FxHashMap<ConnectionId, Entry>,
    next_seq: u64,
}

impl Registry {
    fn insert(&mut self, record: ConnectionSnapshot) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(record.id.clone(), Entry::new(record, seq));
    }

    fn get_mut(&mut self, id: &ConnectionId) -> Result<&mut Entry> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| Error::connection_not_found(id.clone()))
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Registry and state machine for controller connections.
///
/// Always handled through `Arc`; sockets and reconnect timers keep a weak
/// reference back to it.
pub struct ConnectionManager {
    config: ConnectionConfig,
    registry: Mutex<Registry>,
    storage: Arc<dyn Storage>,
    bus: MessageBus,
    clock: SharedClock,
    /// Serializes snapshot-and-write of the persisted list.
    persist_lock: tokio::sync::Mutex<()>,
    me: Weak<Self>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("connections", &self.registry.lock().entries.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        storage: Arc<dyn Storage>,
        bus: MessageBus,
        clock: SharedClock,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            registry: Mutex::new(Registry::default()),
            storage,
            bus,
            clock,
            persist_lock: tokio::sync::Mutex::new(()),
            me: me.clone(),
        })
    }

    /// Settings in use.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Restores persisted records, all as `disconnected`.
    ///
    /// Attempt counters start again from zero. Returns the number restored.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list cannot be read or decoded.
    pub async fn load(&self) -> Result<usize> {
        let records: Vec<ConnectionSnapshot> =
            storage::load(&*self.storage, keys::WS_CONNECTIONS)
                .await?
                .unwrap_or_default();

        let count = records.len();
        {
            let mut registry = self.registry.lock();
            for mut record in records {
                record.status = ConnectionStatus::Disconnected;
                record.reconnect_attempts = 0;
                if !registry.entries.contains_key(&record.id) {
                    registry.insert(record);
                }
            }
        }

        info!(count, "Restored persisted connections");
        Ok(count)
    }

    /// Registers a connection to `ws://localhost:<port>` and starts
    /// connecting.
    ///
    /// The id is returned even if the first open fails; the connection then
    /// follows the reconnect schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the new record cannot be persisted.
    pub async fn add_connection(&self, port: u16) -> Result<ConnectionId> {
        let id = ConnectionId::generate();
        let record = ConnectionSnapshot::new(id.clone(), port);
        info!(connection_id = %id, url = %record.url, "Adding connection");

        self.registry.lock().insert(record);
        self.persist().await?;

        if let Err(e) = self.connect(&id).await {
            debug!(connection_id = %id, error = %e, "Initial connect failed");
        }

        Ok(id)
    }

    /// Opens the socket for `id`.
    ///
    /// Does nothing if the connection is already connecting or connected.
    /// A pending reconnect timer is cancelled.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if `id` is unknown
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds `connect_timeout`
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(&self, id: &ConnectionId) -> Result<()> {
        let (url, generation) = {
            let mut registry = self.registry.lock();
            let entry = registry.get_mut(id)?;

            if entry.record.status.is_active() {
                debug!(connection_id = %id, status = %entry.record.status, "Already active");
                return Ok(());
            }

            entry.cancel_reconnect();
            entry.generation += 1;
            entry.record.status = ConnectionStatus::Connecting;
            (entry.record.url.clone(), entry.generation)
        };
        self.commit(id).await;

        debug!(connection_id = %id, %url, "Connecting");

        let limit = self.config.connect_timeout;
        let opened = match timeout(limit, connect_async(url.as_str())).await {
            Ok(Ok((stream, _))) => Ok(stream),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::connection_timeout(limit.as_millis() as u64)),
        };

        match opened {
            Ok(stream) => {
                let current = {
                    let mut registry = self.registry.lock();
                    match registry.entries.get_mut(id) {
                        Some(entry) if entry.generation == generation => {
                            entry.socket = Some(Socket::spawn(
                                stream,
                                id.clone(),
                                generation,
                                self.me.clone(),
                                self.config.idle_timeout,
                            ));
                            entry.record.status = ConnectionStatus::Connected;
                            entry.record.reconnect_attempts = 0;
                            entry.record.last_connected = Some(self.clock.now_ms());
                            true
                        }
                        _ => false,
                    }
                };

                if current {
                    info!(connection_id = %id, "Connected");
                    self.commit(id).await;
                } else {
                    debug!(connection_id = %id, "Connection superseded while opening");
                }
                Ok(())
            }

            Err(e) => {
                warn!(connection_id = %id, error = %e, "Connect failed");

                let current = {
                    let mut registry = self.registry.lock();
                    match registry.entries.get_mut(id) {
                        Some(entry) if entry.generation == generation => {
                            entry.record.status = ConnectionStatus::Error;
                            true
                        }
                        _ => false,
                    }
                };

                if current {
                    self.commit(id).await;
                    self.on_closed(id, generation).await;
                }
                Err(e)
            }
        }
    }

    /// Closes the socket for `id` and cancels any pending reconnect.
    ///
    /// The connection will not reconnect on its own afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if `id` is unknown.
    pub async fn disconnect(&self, id: &ConnectionId) -> Result<()> {
        let socket = {
            let mut registry = self.registry.lock();
            let entry = registry.get_mut(id)?;
            entry.cancel_reconnect();
            entry.generation += 1;
            entry.record.status = ConnectionStatus::Disconnected;
            entry.socket.take()
        };

        if let Some(socket) = socket {
            socket.shutdown();
        }

        info!(connection_id = %id, "Disconnected");
        self.commit(id).await;
        Ok(())
    }

    /// Disconnects and deletes `id`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if `id` is unknown
    /// - storage errors from persisting the shortened list
    pub async fn remove_connection(&self, id: &ConnectionId) -> Result<()> {
        self.disconnect(id).await?;
        self.registry.lock().entries.remove(id);
        self.persist().await?;

        info!(connection_id = %id, "Connection removed");
        self.bus.publish(Notification::ConnectionRemoved {
            connection_id: id.clone(),
        });
        Ok(())
    }

    /// Clears the attempt counter of a frozen connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if `id` is unknown.
    pub async fn reset_attempts(&self, id: &ConnectionId) -> Result<()> {
        self.registry.lock().get_mut(id)?.record.reconnect_attempts = 0;
        self.commit(id).await;
        Ok(())
    }

    /// Sends `frame` as JSON text.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if `id` is unknown
    /// - [`Error::ConnectionClosed`] unless the connection is `connected`
    /// - write errors from the socket
    pub async fn send(&self, id: &ConnectionId, frame: Value) -> Result<()> {
        let socket = {
            let mut registry = self.registry.lock();
            let entry = registry.get_mut(id)?;
            match (&entry.socket, entry.record.status) {
                (Some(socket), ConnectionStatus::Connected) => socket.clone(),
                _ => return Err(Error::ConnectionClosed),
            }
        };

        socket.send(frame).await
    }

    /// Snapshots of every connection, oldest first.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionSnapshot> {
        let registry = self.registry.lock();
        let mut entries: Vec<_> = registry.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.record.clone()).collect()
    }

    /// Snapshot of one connection.
    #[must_use]
    pub fn connection(&self, id: &ConnectionId) -> Option<ConnectionSnapshot> {
        self.registry
            .lock()
            .entries
            .get(id)
            .map(|entry| entry.record.clone())
    }

    /// Closes every socket, cancels every timer and persists the result.
    ///
    /// Every connection that was not already `disconnected` is announced
    /// after the final write.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the final write.
    pub async fn shutdown(&self) -> Result<()> {
        let (sockets, mut changed) = {
            let mut registry = self.registry.lock();
            let mut sockets = Vec::new();
            let mut changed = Vec::new();

            for (id, entry) in registry.entries.iter_mut() {
                entry.cancel_reconnect();
                entry.generation += 1;

                if entry.record.status != ConnectionStatus::Disconnected {
                    entry.record.status = ConnectionStatus::Disconnected;
                    changed.push((entry.seq, id.clone()));
                }
                if let Some(socket) = entry.socket.take() {
                    sockets.push(socket);
                }
            }
            (sockets, changed)
        };

        for socket in &sockets {
            socket.shutdown();
        }

        info!(
            closed = sockets.len(),
            changed = changed.len(),
            "Connection manager shut down"
        );
        let persisted = self.persist().await;

        changed.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, id) in &changed {
            if let Some(connection) = self.connection(id) {
                self.bus.publish(Notification::StatusChanged { connection });
            }
        }

        persisted
    }
}

// ============================================================================
// Socket Callbacks
// ============================================================================

impl ConnectionManager {
    /// Handles a parsed inbound frame. Returns a frame to send back.
    pub(crate) fn on_frame(&self, id: &ConnectionId, frame: Value) -> Option<Value> {
        if frame::is_ping(&frame) {
            return Some(frame::pong(self.clock.now_ms()));
        }

        if let Some(key) = frame::dedup_key(&frame) {
            let mut registry = self.registry.lock();
            let entry = registry.entries.get_mut(id)?;

            if entry.recent.iter().any(|seen| seen == key) {
                debug!(connection_id = %id, request_id = key, "Dropping duplicate frame");
                return None;
            }

            if entry.recent.len() >= self.config.dedup_window {
                entry.recent.pop_front();
            }
            entry.recent.push_back(key.to_string());
        }

        self.bus.publish(Notification::Message {
            connection_id: id.clone(),
            data: frame,
        });
        None
    }

    /// Handles the end of a socket or a failed open.
    ///
    /// Ignored if `generation` has been superseded.
    pub(crate) async fn on_closed(&self, id: &ConnectionId, generation: u64) {
        let scheduled = {
            let mut registry = self.registry.lock();
            let Some(entry) = registry.entries.get_mut(id) else {
                return;
            };
            if entry.generation != generation {
                return;
            }

            entry.socket = None;
            entry.record.status = ConnectionStatus::Disconnected;

            if entry.record.reconnect_attempts < self.config.max_reconnect_attempts {
                entry.record.reconnect_attempts += 1;
                entry.reconnect = Some(self.spawn_reconnect(id.clone(), generation));
                Some(entry.record.reconnect_attempts)
            } else {
                None
            }
        };

        self.commit(id).await;

        match scheduled {
            Some(attempt) => info!(
                connection_id = %id,
                attempt,
                max = self.config.max_reconnect_attempts,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "Reconnect scheduled"
            ),
            None => warn!(
                connection_id = %id,
                max = self.config.max_reconnect_attempts,
                "Max reconnect attempts reached"
            ),
        }
    }

    fn spawn_reconnect(&self, id: ConnectionId, generation: u64) -> JoinHandle<()> {
        let manager = self.me.clone();
        let delay = self.config.reconnect_delay;

        tokio::spawn(async move {
            sleep(delay).await;

            let Some(manager) = manager.upgrade() else {
                return;
            };

            // Release our own handle; from here the timer can no longer be aborted.
            {
                let mut registry = manager.registry.lock();
                match registry.entries.get_mut(&id) {
                    Some(entry) if entry.generation == generation => entry.reconnect = None,
                    _ => return,
                }
            }

            if let Err(e) = manager.connect(&id).await {
                debug!(connection_id = %id, error = %e, "Reconnect failed");
            }
        })
    }
}

// ============================================================================
// Persistence
// ============================================================================

impl ConnectionManager {
    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let records = self.connections();
        storage::save(&*self.storage, keys::WS_CONNECTIONS, &records).await
    }

    /// Persists, then announces the current state of `id`.
    async fn commit(&self, id: &ConnectionId) {
        if let Err(e) = self.persist().await {
            error!(connection_id = %id, error = %e, "Failed to persist connections");
        }

        if let Some(connection) = self.connection(id) {
            self.bus.publish(Notification::StatusChanged { connection });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
