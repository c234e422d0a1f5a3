//! WebSocket transport adapter.
//!
//! Presents a message-oriented WebSocket as a byte stream. Both the server
//! socket (axum) and the client socket (async-tungstenite) are erased into the
//! same boxed sink/stream pair at construction, so a single [`WsConn`] type
//! serves both ends.
//!
//! # Thread Safety
//!
//! Reads are serialized by the reader mutex, writes and keep-alive pings by
//! the sink mutex. One task may read while another writes.

use crate::addr::Addr;
use crate::config::ProtocolConfig;
use crate::connection::Conn;
use crate::error::{Result, WebdialError};
use async_trait::async_trait;
use async_tungstenite::tungstenite;
use axum::extract::ws as axum_ws;
use bytes::{Buf, Bytes};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Frames this adapter sends.
pub(crate) enum Outbound {
    Binary(Vec<u8>),
    Ping,
    Close,
}

/// Frames this adapter cares about when receiving.
pub(crate) enum Inbound {
    Data(Bytes),
    Control,
    Close,
}

/// Conversion between a socket library's message type and this adapter's.
pub(crate) trait WireMessage: Send + Sized + 'static {
    fn from_outbound(out: Outbound) -> Self;
    fn into_inbound(self) -> Inbound;
}

impl WireMessage for tungstenite::Message {
    fn from_outbound(out: Outbound) -> Self {
        match out {
            Outbound::Binary(data) => tungstenite::Message::Binary(data),
            Outbound::Ping => tungstenite::Message::Ping(Vec::new()),
            Outbound::Close => tungstenite::Message::Close(None),
        }
    }

    fn into_inbound(self) -> Inbound {
        match self {
            tungstenite::Message::Binary(data) => Inbound::Data(Bytes::from(data)),
            tungstenite::Message::Text(text) => Inbound::Data(Bytes::from(text.into_bytes())),
            tungstenite::Message::Close(_) => Inbound::Close,
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_) => Inbound::Control,
        }
    }
}

impl WireMessage for axum_ws::Message {
    fn from_outbound(out: Outbound) -> Self {
        match out {
            Outbound::Binary(data) => axum_ws::Message::Binary(data),
            Outbound::Ping => axum_ws::Message::Ping(Vec::new()),
            Outbound::Close => axum_ws::Message::Close(None),
        }
    }

    fn into_inbound(self) -> Inbound {
        match self {
            axum_ws::Message::Binary(data) => Inbound::Data(Bytes::from(data)),
            axum_ws::Message::Text(text) => Inbound::Data(Bytes::from(text.into_bytes())),
            axum_ws::Message::Close(_) => Inbound::Close,
            axum_ws::Message::Ping(_) | axum_ws::Message::Pong(_) => Inbound::Control,
        }
    }
}

type FrameSink = Pin<Box<dyn Sink<Outbound, Error = WebdialError> + Send>>;
type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound>> + Send>>;

struct Reader {
    stream: FrameStream,
    /// Unread remainder of the current frame.
    frame: Bytes,
    eof: bool,
}

/// A WebSocket presented as a byte stream.
pub(crate) struct WsConn {
    sink: Arc<Mutex<FrameSink>>,
    reader: Mutex<Reader>,
    /// Local close; ends pending and future reads.
    closed: CancellationToken,
    /// Child of `closed`, also cancelled when a write fails. Reads keep
    /// draining what the peer already sent.
    writes: CancellationToken,
    close_sent: AtomicBool,
    local: Addr,
    remote: Addr,
}

impl WsConn {
    /// Wrap an upgraded socket.
    ///
    /// With `keep_alive` set, a ping is sent every interval until the
    /// connection closes or a ping fails.
    pub(crate) fn new<S, M, E>(
        socket: S,
        local: Addr,
        remote: Addr,
        keep_alive: Option<Duration>,
    ) -> Self
    where
        S: Stream<Item = std::result::Result<M, E>> + Sink<M, Error = E> + Send + 'static,
        M: WireMessage,
        E: Into<WebdialError> + Send + 'static,
    {
        let (sink, stream) = socket.split::<M>();
        let sink: FrameSink = Box::pin(
            sink.sink_map_err(Into::<WebdialError>::into)
                .with(|out: Outbound| future::ready(Ok::<M, WebdialError>(M::from_outbound(out)))),
        );
        let stream: FrameStream =
            Box::pin(stream.map(|frame| frame.map(M::into_inbound).map_err(Into::into)));

        let closed = CancellationToken::new();
        let conn = Self {
            sink: Arc::new(Mutex::new(sink)),
            reader: Mutex::new(Reader {
                stream,
                frame: Bytes::new(),
                eof: false,
            }),
            writes: closed.child_token(),
            closed,
            close_sent: AtomicBool::new(false),
            local,
            remote,
        };

        if let Some(interval) = keep_alive {
            tokio::spawn(keep_alive_loop(
                conn.sink.clone(),
                conn.writes.clone(),
                interval,
            ));
        }

        conn
    }
}

async fn keep_alive_loop(
    sink: Arc<Mutex<FrameSink>>,
    writes: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = writes.cancelled() => return,
            _ = ticker.tick() => {
                let mut sink = sink.lock().await;
                match tokio::time::timeout(ProtocolConfig::PING_TIMEOUT, sink.send(Outbound::Ping)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("WebSocket keep-alive stopped: {}", e);
                        return;
                    }
                    Err(_) => {
                        debug!("WebSocket keep-alive ping timed out");
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Conn for WsConn {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut reader = self.reader.lock().await;
        loop {
            if !reader.frame.is_empty() {
                let n = buf.len().min(reader.frame.len());
                buf[..n].copy_from_slice(&reader.frame[..n]);
                reader.frame.advance(n);
                return Ok(n);
            }
            if reader.eof {
                return Ok(0);
            }

            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(0),
                next = reader.stream.next() => next,
            };
            match next {
                // Empty frames carry nothing; wait for the next one.
                Some(Ok(Inbound::Data(frame))) => reader.frame = frame,
                Some(Ok(Inbound::Control)) => {}
                Some(Ok(Inbound::Close)) | None | Some(Err(WebdialError::ConnectionClosed)) => {
                    reader.eof = true;
                    return Ok(0);
                }
                Some(Err(e)) => {
                    reader.eof = true;
                    self.closed.cancel();
                    return Err(e);
                }
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.writes.is_cancelled() {
            return Err(WebdialError::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        match sink.send(Outbound::Binary(buf.to_vec())).await {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                self.writes.cancel();
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.close_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        let goodbye = async {
            sink.send(Outbound::Close).await?;
            sink.close().await
        };
        if let Err(e) = tokio::time::timeout(ProtocolConfig::PING_TIMEOUT, goodbye)
            .await
            .unwrap_or(Err(WebdialError::ConnectionClosed))
        {
            debug!("WebSocket close handshake incomplete: {}", e);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.writes.is_cancelled()
    }

    fn local_addr(&self) -> &Addr {
        &self.local
    }

    fn remote_addr(&self) -> &Addr {
        &self.remote
    }
}

impl Drop for WsConn {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
