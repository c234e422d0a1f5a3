//! The accepting side: an HTTP endpoint that yields [`Connection`]s.
//!
//! A [`Server`] is not bound to a socket. [`Server::router`] returns an axum
//! router that can be served directly or nested under any prefix; requests
//! are told apart by protocol markers, not by path.
//!
//! # Thread Safety
//!
//! `Server` is cheap to clone and every method takes `&self`. The session
//! registry is the only state shared between request handlers and session
//! tasks.

mod handlers;
pub(crate) mod registry;

use crate::config::{OverflowPolicy, ServerConfig};
use crate::connection::Connection;
use crate::error::{Result, WebdialError};
use crate::sse::SseServerConn;
use axum::Router;
use futures::future;
use registry::SessionRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by the public handle, the HTTP handlers and session tasks.
pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) sessions: Arc<SessionRegistry<SseServerConn>>,
    accept_tx: mpsc::Sender<Connection>,
    accept_rx: Mutex<mpsc::Receiver<Connection>>,
    pub(crate) shutdown: CancellationToken,
    closed: AtomicBool,
}

impl ServerInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Hand an established connection to the accept queue.
    ///
    /// Returns false when the connection was not queued; it has been closed
    /// by then.
    pub(crate) async fn offer(&self, conn: Connection) -> bool {
        let permit = match self.config.overflow_policy {
            OverflowPolicy::Block => tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                permit = self.accept_tx.reserve() => permit.ok(),
            },
            OverflowPolicy::Drop => match self.accept_tx.try_reserve() {
                Ok(permit) => Some(permit),
                Err(mpsc::error::TrySendError::Full(())) => {
                    warn!(
                        "Accept queue full ({}), dropping {} connection from {}",
                        self.config.accept_queue_capacity,
                        conn.transport(),
                        conn.remote_addr()
                    );
                    None
                }
                Err(mpsc::error::TrySendError::Closed(())) => None,
            },
        };

        match permit {
            Some(permit) if !self.is_closed() => {
                permit.send(conn);
                true
            }
            _ => {
                let _ = conn.close().await;
                false
            }
        }
    }
}

/// Endpoint producing virtual connections over WebSocket or SSE.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a server with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_queue_capacity.max(1));
        Self {
            inner: Arc::new(ServerInner {
                config,
                sessions: Arc::new(SessionRegistry::new()),
                accept_tx,
                accept_rx: Mutex::new(accept_rx),
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Router answering all webdial requests; mount it at any path.
    pub fn router(&self) -> Router {
        handlers::router(self.inner.clone())
    }

    /// Wait for the next established connection.
    ///
    /// Fails with [`WebdialError::ServerClosed`] once [`Server::close`] has
    /// been called, including for callers already waiting.
    pub async fn accept(&self) -> Result<Connection> {
        if self.inner.is_closed() {
            return Err(WebdialError::ServerClosed);
        }
        let mut queue = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(WebdialError::ServerClosed),
            queue = self.inner.accept_rx.lock() => queue,
        };
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(WebdialError::ServerClosed),
            conn = queue.recv() => conn.ok_or(WebdialError::ServerClosed),
        }
    }

    /// Shut the server down.
    ///
    /// Wakes every pending `accept`, closes every open SSE session and every
    /// connection still waiting in the accept queue. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.cancel();

        let sessions = self.inner.sessions.drain();
        let session_count = sessions.len();
        future::join_all(sessions.iter().map(|session| session.shutdown())).await;

        let mut queued = 0;
        {
            let mut queue = self.inner.accept_rx.lock().await;
            queue.close();
            while let Ok(conn) = queue.try_recv() {
                if let Err(e) = conn.close().await {
                    debug!("Closing queued connection failed: {}", e);
                }
                queued += 1;
            }
        }

        info!(
            "webdial server closed ({} sessions, {} queued connections)",
            session_count, queued
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of SSE sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("sessions", &self.session_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{Addr, Transport};
    use crate::config::ProtocolConfig;
    use crate::connection::Conn;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_wakes_pending_accept() {
        let server = Server::new();
        let waiter = {
            let server = server.clone();
            tokio::spawn(async move { server.accept().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        server.close().await.unwrap();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_server_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = Server::new();
        server.close().await.unwrap();
        server.close().await.unwrap();
        assert!(server.is_closed());
        assert!(server.accept().await.unwrap_err().is_server_closed());
    }

    fn queued_session(server: &Server) -> Arc<SseServerConn> {
        let inner = &server.inner;
        let (tx, _rx) = mpsc::channel(4);
        let weak = Arc::downgrade(&inner.sessions);
        inner.sessions.register(move |id| {
            Arc::new(SseServerConn::new(
                id,
                tx,
                4,
                weak,
                Addr::new(Transport::Sse, "local"),
                Addr::new(Transport::Sse, "peer"),
            ))
        })
    }

    #[tokio::test]
    async fn test_drop_policy_closes_overflow() {
        let server = Server::with_config(
            ServerConfig::new()
                .with_accept_queue_capacity(1)
                .with_overflow_policy(OverflowPolicy::Drop),
        );
        let first = queued_session(&server);
        let second = queued_session(&server);

        assert!(server.inner.offer(Connection::sse_server(first.clone())).await);
        assert!(!server.inner.offer(Connection::sse_server(second.clone())).await);
        assert!(second.is_closed());
        assert!(!first.is_closed());
        assert_eq!(server.session_count(), 1);
    }

    #[tokio::test]
    async fn test_close_shuts_queued_connections() {
        let server = Server::new();
        let session = queued_session(&server);
        assert!(server.inner.offer(Connection::sse_server(session.clone())).await);

        server.close().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_close_notifies_stalled_sessions_concurrently() {
        let server = Server::new();
        let inner = &server.inner;
        let mut streams = Vec::new();
        for _ in 0..4 {
            // A full event queue that nobody drains.
            let (tx, rx) = mpsc::channel(1);
            let weak = Arc::downgrade(&inner.sessions);
            let session = inner.sessions.register(move |id| {
                Arc::new(SseServerConn::new(
                    id,
                    tx,
                    4,
                    weak,
                    Addr::new(Transport::Sse, "local"),
                    Addr::new(Transport::Sse, "peer"),
                ))
            });
            session.write(b"unread").await.unwrap();
            streams.push(rx);
        }

        let started = tokio::time::Instant::now();
        server.close().await.unwrap();
        assert!(started.elapsed() < ProtocolConfig::CLOSE_NOTIFY_TIMEOUT * 2);
        assert_eq!(server.session_count(), 0);
    }
}
