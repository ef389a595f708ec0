//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track live connections and tunnels (Active → Draining → Closed)
//! - Generate unique connection IDs for tracing
//! - Broadcast drain and force-close to every connection task

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Server-wide connection state, observed by every connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connections are active and processing requests.
    Active,
    /// No new requests; in-flight cycles and tunnels may finish.
    Draining,
    /// Grace period over; every connection must drop its sockets.
    Closed,
}

/// Tracks active connections for graceful shutdown.
///
/// Uses a watch channel to broadcast the drain and close phases.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Active);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            state_tx: Arc::new(tx),
        }
    }

    /// Record a new active connection or tunnel. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Subscribe to state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Ask connections to finish in-flight work and close.
    pub fn drain(&self) {
        self.state_tx.send_replace(ConnectionState::Draining);
    }

    /// Force every connection and tunnel to close.
    pub fn close(&self) {
        self.state_tx.send_replace(ConnectionState::Closed);
    }

    /// Wait until all tracked connections are gone, or `grace` elapses.
    ///
    /// Returns `true` when the count reached zero in time.
    pub async fn wait_for_shutdown(&self, grace: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the tracker broadcasts [`ConnectionState::Closed`].
///
/// Never resolves if the tracker is dropped without closing.
pub async fn closed(mut rx: watch::Receiver<ConnectionState>) {
    if rx.wait_for(|s| *s == ConnectionState::Closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_shutdown_respects_grace() {
        let tracker = ConnectionTracker::new();
        assert!(tracker.wait_for_shutdown(Duration::from_millis(10)).await);

        let guard = tracker.track();
        assert!(!tracker.wait_for_shutdown(Duration::from_millis(100)).await);

        let waiter = tracker.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn state_broadcast_reaches_subscribers() {
        let tracker = ConnectionTracker::new();
        let rx = tracker.state_receiver();
        assert_eq!(*rx.borrow(), ConnectionState::Active);

        tracker.drain();
        assert_eq!(*rx.borrow(), ConnectionState::Draining);

        let waiter = tokio::spawn(closed(tracker.state_receiver()));
        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
