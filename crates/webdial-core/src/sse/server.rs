//! Server end of the SSE transport.
//!
//! Each session owns the sender half of its push stream, a bounded inbound
//! pipe fed by uploads, and a closed token. A per-session task admits the
//! connection to the accept queue, emits heartbeats, and tears the session
//! down when either side goes away.
//!
//! Teardown order matters: the session leaves the registry before its stream
//! ends, so an upload can never find a session whose stream is gone.

use super::PAYLOAD_ENGINE;
use crate::addr::Addr;
use crate::config::ProtocolConfig;
use crate::connection::{Conn, Connection};
use crate::error::{Result, WebdialError};
use crate::pipe::BytePipe;
use crate::server::registry::{SessionId, SessionRegistry};
use crate::server::ServerInner;
use async_trait::async_trait;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) type Registry = SessionRegistry<SseServerConn>;

/// Server side of one SSE session.
pub(crate) struct SseServerConn {
    id: SessionId,
    /// Push-stream handle; the lock also serializes writers.
    events: Mutex<Option<mpsc::Sender<Event>>>,
    inbound: BytePipe,
    upload_lock: Mutex<()>,
    closed: CancellationToken,
    close_started: AtomicBool,
    registry: Weak<Registry>,
    local: Addr,
    remote: Addr,
}

impl SseServerConn {
    pub(crate) fn new(
        id: SessionId,
        events: mpsc::Sender<Event>,
        inbound_capacity: usize,
        registry: Weak<Registry>,
        local: Addr,
        remote: Addr,
    ) -> Self {
        Self {
            id,
            events: Mutex::new(Some(events)),
            inbound: BytePipe::new(inbound_capacity),
            upload_lock: Mutex::new(()),
            closed: CancellationToken::new(),
            close_started: AtomicBool::new(false),
            registry,
            local,
            remote,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    /// Append an upload body to the inbound pipe.
    ///
    /// Returns once the body is buffered; fails when the session is closed.
    pub(crate) async fn upload(&self, body: Bytes) -> Result<()> {
        let _guard = self.upload_lock.lock().await;
        self.inbound.put(body).await
    }

    /// Mark the session dead without waiting; the session task finishes
    /// the teardown. Uploads fail from here on.
    pub(crate) fn abandon(&self) {
        self.closed.cancel();
        self.inbound.close();
    }

    async fn heartbeat(&self) -> Result<()> {
        self.send_event(Event::default().event(ProtocolConfig::EVENT_HEARTBEAT))
            .await
    }

    async fn send_event(&self, event: Event) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(WebdialError::ConnectionClosed);
        }
        let events = self.events.lock().await;
        let Some(sender) = events.as_ref() else {
            return Err(WebdialError::ConnectionClosed);
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(WebdialError::ConnectionClosed),
            sent = sender.send(event) => sent.map_err(|_| {
                // The response body was dropped.
                self.closed.cancel();
                WebdialError::ConnectionClosed
            }),
        }
    }

    /// Tear the session down. Runs once; later calls return immediately.
    pub(crate) async fn shutdown(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
        self.closed.cancel();
        self.inbound.close();

        let sender = self.events.lock().await.take();
        if let Some(sender) = sender {
            let notice = Event::default().event(ProtocolConfig::EVENT_CLOSE);
            match tokio::time::timeout(ProtocolConfig::CLOSE_NOTIFY_TIMEOUT, sender.send(notice))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(_)) => debug!("SSE session {} stream already gone", self.id),
                Err(_) => debug!("SSE session {} close notice timed out", self.id),
            }
        }
        debug!("SSE session {} closed", self.id);
    }
}

#[async_trait]
impl Conn for SseServerConn {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inbound.take(buf).await)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let event = Event::default()
            .event(ProtocolConfig::EVENT_DATA)
            .data(PAYLOAD_ENGINE.encode(buf));
        self.send_event(event).await?;
        Ok(buf.len())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn local_addr(&self) -> &Addr {
        &self.local
    }

    fn remote_addr(&self) -> &Addr {
        &self.remote
    }
}

/// Register a session and answer the stream-open request.
///
/// The response body starts with the `sid` event and then carries whatever
/// the session writes. When the HTTP stack drops the body the session ends.
pub(crate) fn open_session(server: Arc<ServerInner>, local: Addr, remote: Addr) -> Response {
    let (tx, mut rx) = mpsc::channel(ProtocolConfig::EVENT_QUEUE_CAPACITY);
    let registry = server.sessions.clone();
    let weak = Arc::downgrade(&registry);
    let capacity = server.config.inbound_pipe_capacity;
    let session = registry.register(move |id| {
        Arc::new(SseServerConn::new(id, tx, capacity, weak, local, remote))
    });
    debug!(
        "SSE session {} opened by {}",
        session.id(),
        session.remote_addr()
    );

    let request_done = CancellationToken::new();
    let guard = request_done.clone().drop_guard();

    let hello = Event::default()
        .event(ProtocolConfig::EVENT_SESSION_ID)
        .data(session.id().to_string());
    let events = stream::once(future::ready(hello))
        .chain(stream::poll_fn(move |cx| rx.poll_recv(cx)))
        .map(move |event| {
            let _alive = &guard;
            Ok::<_, Infallible>(event)
        });

    tokio::spawn(run_session(server, session, request_done));

    Sse::new(events).into_response()
}

async fn run_session(
    server: Arc<ServerInner>,
    session: Arc<SseServerConn>,
    request_done: CancellationToken,
) {
    let period = server.config.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);

    // Heartbeats also run while the connection waits in the accept queue.
    let offer = server.offer(Connection::sse_server(session.clone()));
    tokio::pin!(offer);
    let accepted = loop {
        tokio::select! {
            accepted = &mut offer => break accepted,
            _ = request_done.cancelled() => break false,
            _ = ticker.tick() => {
                if let Err(e) = session.heartbeat().await {
                    debug!("SSE session {} heartbeat failed while queued: {}", session.id(), e);
                    break false;
                }
            }
        }
    };

    if accepted {
        loop {
            tokio::select! {
                _ = session.closed.cancelled() => break,
                _ = request_done.cancelled() => {
                    debug!("SSE session {} client went away", session.id());
                    break;
                }
                _ = server.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = session.heartbeat().await {
                        warn!("SSE session {} heartbeat failed: {}", session.id(), e);
                        break;
                    }
                }
            }
        }
    }

    session.shutdown().await;
}
