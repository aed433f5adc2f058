//! Live streaming connections
//!
//! A connection is one physical stream to a client. Its liveness flag moves
//! true -> false exactly once; whoever wins that compare-and-set performs the
//! cleanup, whatever the trigger (completion, transport error, idle timeout).

use super::events::StreamEvent;
use crate::error::{HubError, HubResult};
use crate::utils::lock_mutex;
use dashmap::DashMap;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Why a connection closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Completed,
    Failed,
    TransportError,
    Timeout,
    Replaced,
    Shutdown,
}

/// One open connection
pub struct Connection {
    id: String,
    session_id: String,
    live: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>,
    close_reason: Mutex<Option<CloseReason>>,
    // Wakes the idle timer once the connection is released
    closed: Notify,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *lock_mutex(&self.close_reason)
    }

    fn push(&self, event: StreamEvent) -> Result<(), String> {
        if !self.is_live() {
            return Err("connection closed".to_string());
        }
        match lock_mutex(&self.sender).as_ref() {
            Some(tx) => tx.send(event).map_err(|_| "client went away".to_string()),
            None => Err("connection closed".to_string()),
        }
    }

    /// Flip liveness off. Only the first caller gets `true`.
    fn mark_closed(&self) -> bool {
        self.live
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
    session_connections: DashMap<String, String>,
    connection_sessions: DashMap<String, String>,
    timeout: Duration,
    cleanups: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CONNECTION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            session_connections: DashMap::new(),
            connection_sessions: DashMap::new(),
            timeout,
            cleanups: AtomicUsize::new(0),
        }
    }

    /// Open a connection for `session_id`. The returned handle yields the
    /// connection's events, starting with `connected`, and closes the
    /// connection when dropped.
    pub fn open(self: &Arc<Self>, connection_id: &str, session_id: &str) -> ConnectionHandle {
        self.open_with_timeout(connection_id, session_id, self.timeout)
    }

    pub fn open_with_timeout(
        self: &Arc<Self>,
        connection_id: &str,
        session_id: &str,
        timeout: Duration,
    ) -> ConnectionHandle {
        if self.is_live(connection_id) {
            log::warn!("[Connections] Replacing live connection {}", connection_id);
            self.close_with(connection_id, CloseReason::Replaced);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            id: connection_id.to_string(),
            session_id: session_id.to_string(),
            live: AtomicBool::new(true),
            sender: Mutex::new(Some(tx)),
            close_reason: Mutex::new(None),
            closed: Notify::new(),
        });
        let _ = connection.push(StreamEvent::connected(connection_id, session_id));

        self.connections
            .insert(connection_id.to_string(), connection.clone());
        self.session_connections
            .insert(session_id.to_string(), connection_id.to_string());
        self.connection_sessions
            .insert(connection_id.to_string(), session_id.to_string());
        log::debug!(
            "[Connections] Opened {} for session {} (timeout {:?})",
            connection_id,
            session_id,
            timeout
        );

        let registry = Arc::downgrade(self);
        let watched = connection.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if let Some(registry) = registry.upgrade() {
                        if watched.is_live() {
                            log::info!("[Connections] {} idle timeout", watched.id());
                            registry.release(&watched, CloseReason::Timeout);
                        }
                    }
                }
                _ = watched.closed.notified() => {}
            }
        });

        ConnectionHandle {
            connection,
            registry: Arc::downgrade(self),
            rx,
        }
    }

    pub fn is_live(&self, connection_id: &str) -> bool {
        self.connections
            .get(connection_id)
            .map_or(false, |c| c.is_live())
    }

    /// Push an event to a live connection
    pub fn push(&self, connection_id: &str, event: StreamEvent) -> HubResult<()> {
        let connection = self
            .connections
            .get(connection_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| HubError::Delivery {
                connection_id: connection_id.to_string(),
                reason: "no such connection".to_string(),
            })?;
        connection.push(event).map_err(|reason| HubError::Delivery {
            connection_id: connection_id.to_string(),
            reason,
        })
    }

    /// Session the connection belongs to
    pub fn session_of(&self, connection_id: &str) -> Option<String> {
        self.connection_sessions
            .get(connection_id)
            .map(|s| s.value().clone())
    }

    /// Latest connection opened for a session
    pub fn connection_of(&self, session_id: &str) -> Option<String> {
        self.session_connections
            .get(session_id)
            .map(|c| c.value().clone())
    }

    /// Close after normal completion. Returns whether this call did the cleanup.
    pub fn close(&self, connection_id: &str) -> bool {
        self.close_with(connection_id, CloseReason::Completed)
    }

    pub fn close_with(&self, connection_id: &str, reason: CloseReason) -> bool {
        let connection = match self.connections.get(connection_id) {
            Some(c) => c.value().clone(),
            None => return false,
        };
        self.release(&connection, reason)
    }

    fn release(&self, connection: &Arc<Connection>, reason: CloseReason) -> bool {
        if !connection.mark_closed() {
            return false;
        }

        *lock_mutex(&connection.close_reason) = Some(reason);
        // Dropping the sender ends the client's stream
        lock_mutex(&connection.sender).take();
        // notify_one keeps a permit if the timer has not started waiting yet
        connection.closed.notify_one();
        self.connections
            .remove_if(connection.id(), |_, c| Arc::ptr_eq(c, connection));
        self.connection_sessions
            .remove_if(connection.id(), |_, s| s.as_str() == connection.session_id());
        self.session_connections
            .remove_if(connection.session_id(), |_, c| c.as_str() == connection.id());
        self.cleanups.fetch_add(1, Ordering::SeqCst);

        log::debug!("[Connections] Closed {} ({:?})", connection.id(), reason);
        true
    }

    /// Close every live connection, returning how many were closed
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.close_with(id, CloseReason::Shutdown))
            .count()
    }

    pub fn live_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_live()).count()
    }

    /// Number of cleanups performed since creation
    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one connection
pub struct ConnectionHandle {
    connection: Arc<Connection>,
    registry: Weak<ConnectionRegistry>,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ConnectionHandle {
    pub fn connection_id(&self) -> &str {
        self.connection.id()
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Why the connection closed, once it has
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.connection.close_reason()
    }
}

impl Stream for ConnectionHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ConnectionHandle {
    // A client that stops reading counts as a transport error. No-op when
    // this connection already closed or was replaced.
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.connection, CloseReason::TransportError);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::events::EventKind;

    #[tokio::test]
    async fn test_open_queues_connected_event() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handle = registry.open("c1", "s1");
        assert!(registry.is_live("c1"));
        assert_eq!(registry.session_of("c1").as_deref(), Some("s1"));
        assert_eq!(registry.connection_of("s1").as_deref(), Some("c1"));

        let first = handle.recv().await.unwrap();
        assert_eq!(first.event, EventKind::Connected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_stream() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handle = registry.open("c1", "s1");
        registry.push("c1", StreamEvent::chunk("a")).unwrap();

        assert!(registry.close("c1"));
        assert!(!registry.close("c1"));
        assert!(!registry.is_live("c1"));
        assert!(registry.session_of("c1").is_none());
        assert!(registry.push("c1", StreamEvent::chunk("b")).is_err());

        let mut kinds = Vec::new();
        while let Some(event) = handle.recv().await {
            kinds.push(event.event);
        }
        assert_eq!(kinds, vec![EventKind::Connected, EventKind::Message]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_cleans_up_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _handle = registry.open("c1", "s1");

        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let reason = if i % 2 == 0 {
                    CloseReason::Completed
                } else {
                    CloseReason::Timeout
                };
                registry.close_with("c1", reason)
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.cleanup_count(), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handle = registry.open_with_timeout("c1", "s1", Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!registry.is_live("c1"));
        assert!(!registry.close("c1"));
        assert_eq!(registry.cleanup_count(), 1);
        assert_eq!(handle.close_reason(), Some(CloseReason::Timeout));
    }

    #[tokio::test]
    async fn test_close_stops_idle_timer() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handle = registry.open("c1", "s1");
        // Handle, registry map and the pending timer task
        assert_eq!(Arc::strong_count(&handle.connection), 3);

        assert!(registry.close("c1"));
        for _ in 0..50 {
            if Arc::strong_count(&handle.connection) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(Arc::strong_count(&handle.connection), 1);
        assert_eq!(handle.close_reason(), Some(CloseReason::Completed));
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handle = registry.open("c1", "s1");
        drop(handle);
        assert!(!registry.is_live("c1"));
        assert_eq!(registry.cleanup_count(), 1);
    }

    #[tokio::test]
    async fn test_reopen_replaces_live_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut old = registry.open("c1", "s1");
        let _new = registry.open("c1", "s1");
        assert!(registry.is_live("c1"));

        // Old stream ends after its queued connected event
        assert!(old.recv().await.is_some());
        assert!(old.recv().await.is_none());
        drop(old);
        assert!(registry.is_live("c1"));
        assert_eq!(registry.close_all(), 1);
    }
}
