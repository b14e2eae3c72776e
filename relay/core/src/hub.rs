//! Connection Hub - live client connections and their outbound queues
//!
//! Every client connection gets a stable [`ConnectionId`] and a bounded
//! queue of [`StageEvent`]s. Request workers push into the queue through the
//! hub without ever blocking; a writer task per connection drains it through
//! the [`OutboundQueue`] handed out at registration.
//!
//! # Lifecycle
//!
//! ```text
//!   register ──► Active ──(unregister | queue full | writer gone)──► Closing ──► Closed
//! ```
//!
//! Only the hub moves a connection between states. A full queue tears the
//! connection down instead of blocking the producer or growing the buffer;
//! events still queued at that point are lost.
//!
//! # Thread Safety
//!
//! Membership lives in a sharded `DashMap`, so registrations and enqueues on
//! different connections don't contend on one lock. Operations on the same
//! connection are serialized by its shard.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::stage::StageEvent;
use crate::streaming::{Delivery, StageSink};

/// Default per-connection queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Unique identifier for a client connection
///
/// Allocated from a process-wide counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Liveness of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Accepting events
    Active,
    /// Being torn down
    Closing,
    /// Gone; the queue is released
    Closed,
}

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The event is in the queue
    Delivered,
    /// The queue was full or its writer gone; the connection was removed
    Disconnected,
    /// No such connection; nothing happened
    Unknown,
}

/// Snapshot of one connection, for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Connection identifier
    pub id: ConnectionId,
    /// Caller-supplied label, e.g. a user id
    pub label: String,
    /// Seconds since registration
    pub uptime_secs: u64,
    /// Events waiting in the queue
    pub queued: usize,
}

#[derive(Debug)]
struct ConnectionHandle {
    label: String,
    tx: mpsc::Sender<StageEvent>,
    state: watch::Sender<ConnectionState>,
    connected_at: Instant,
}

impl ConnectionHandle {
    /// Walk the state machine to `Closed`, releasing the queue on the way
    fn teardown(self) {
        let Self { tx, state, .. } = self;
        state.send_replace(ConnectionState::Closing);
        drop(tx);
        state.send_replace(ConnectionState::Closed);
    }
}

/// Receiving half of a connection's queue
///
/// Owned by the connection's writer. Dropping it makes the next enqueue
/// tear the connection down.
#[derive(Debug)]
pub struct OutboundQueue {
    id: ConnectionId,
    rx: mpsc::Receiver<StageEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl OutboundQueue {
    /// Connection this queue belongs to
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current liveness as last published by the hub
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Next event, or `None` once the connection is no longer active
    ///
    /// Buffered events are abandoned as soon as the connection leaves
    /// `Active`.
    pub async fn recv(&mut self) -> Option<StageEvent> {
        loop {
            if *self.state.borrow_and_update() != ConnectionState::Active {
                return None;
            }
            tokio::select! {
                biased;
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                event = self.rx.recv() => return event,
            }
        }
    }
}

/// Registry of live connections
#[derive(Clone, Debug)]
pub struct ConnectionHub {
    inner: Arc<DashMap<ConnectionId, ConnectionHandle>>,
    capacity: usize,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ConnectionHub {
    /// Create an empty hub giving every connection `capacity` queue slots
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Queue slots per connection
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new connection in the `Active` state
    pub fn register(&self, label: impl Into<String>) -> (ConnectionId, OutboundQueue) {
        let id = ConnectionId::next();
        let label = label.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Active);

        tracing::info!(connection_id = %id, label = %label, "Connection registered");

        self.inner.insert(
            id,
            ConnectionHandle {
                label,
                tx,
                state: state_tx,
                connected_at: Instant::now(),
            },
        );

        (
            id,
            OutboundQueue {
                id,
                rx,
                state: state_rx,
            },
        )
    }

    /// Remove a connection and release its queue
    ///
    /// Returns `false` if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        match self.inner.remove(&id) {
            Some((_, handle)) => {
                handle.teardown();
                tracing::info!(connection_id = %id, "Connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Push an event onto a connection's queue without waiting
    ///
    /// A full queue disconnects the connection.
    pub fn enqueue(&self, id: ConnectionId, event: StageEvent) -> EnqueueOutcome {
        let overflow = {
            let Some(handle) = self.inner.get(&id) else {
                return EnqueueOutcome::Unknown;
            };
            match handle.tx.try_send(event) {
                Ok(()) => return EnqueueOutcome::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
            // Shard guard released here; `remove` below takes it again
        };

        if let Some((_, handle)) = self.inner.remove(&id) {
            handle.teardown();
            if overflow {
                tracing::warn!(
                    connection_id = %id,
                    capacity = self.capacity,
                    "Outbound queue full, disconnecting"
                );
            } else {
                tracing::debug!(connection_id = %id, "Writer gone, disconnecting");
            }
        }
        EnqueueOutcome::Disconnected
    }

    /// Sink delivering into one connection's queue
    #[must_use]
    pub fn sink(&self, id: ConnectionId) -> HubSink {
        HubSink {
            hub: self.clone(),
            connection: id,
        }
    }

    /// Get the number of live connections
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Check if a connection is live
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.contains_key(&id)
    }

    /// Get the IDs of all live connections
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of every live connection
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self
            .inner
            .iter()
            .map(|entry| ConnectionInfo {
                id: *entry.key(),
                label: entry.label.clone(),
                uptime_secs: entry.connected_at.elapsed().as_secs(),
                queued: self.capacity - entry.tx.capacity(),
            })
            .collect();
        infos.sort_unstable_by_key(|info| info.id);
        infos
    }

    /// Tear down every connection
    pub fn close_all(&self) {
        for id in self.connection_ids() {
            self.unregister(id);
        }
    }
}

/// [`StageSink`] delivering into one hub connection
#[derive(Clone, Debug)]
pub struct HubSink {
    hub: ConnectionHub,
    connection: ConnectionId,
}

impl HubSink {
    /// Target connection
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl StageSink for HubSink {
    fn deliver(&mut self, event: StageEvent) -> Delivery {
        match self.hub.enqueue(self.connection, event) {
            EnqueueOutcome::Delivered => Delivery::Accepted,
            EnqueueOutcome::Disconnected | EnqueueOutcome::Unknown => Delivery::Closed,
        }
    }
}
