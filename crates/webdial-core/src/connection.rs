//! The transport-agnostic virtual connection.
//!
//! A [`Connection`] is what both [`crate::dial`] and [`crate::Server::accept`]
//! hand out. It is a byte stream: message and event boundaries of the
//! underlying transport are not visible to callers.
//!
//! Four variants exist (WebSocket client/server, SSE client/server); each
//! implements the crate-private [`Conn`] contract and keeps its transport
//! state private.

use crate::addr::{Addr, Transport};
use crate::error::{Result, WebdialError};
use crate::sse::{SseClientConn, SseServerConn};
use crate::ws::WsConn;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Contract every transport variant satisfies.
#[async_trait]
pub(crate) trait Conn: Send + Sync {
    /// Read into `buf`. `Ok(0)` means end of stream.
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf` as one unit and report `buf.len()`.
    async fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Close the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn local_addr(&self) -> &Addr;

    fn remote_addr(&self) -> &Addr;
}

enum Variant {
    WsClient(WsConn),
    WsServer(WsConn),
    SseClient(SseClientConn),
    SseServer(Arc<SseServerConn>),
}

/// A bidirectional byte stream carried over HTTP.
///
/// All methods take `&self`; wrap the connection in an [`Arc`] to read and
/// write from different tasks. Concurrent writers never interleave bytes
/// within one `write` call.
pub struct Connection {
    variant: Variant,
}

impl Connection {
    pub(crate) fn ws_client(conn: WsConn) -> Self {
        Self {
            variant: Variant::WsClient(conn),
        }
    }

    pub(crate) fn ws_server(conn: WsConn) -> Self {
        Self {
            variant: Variant::WsServer(conn),
        }
    }

    pub(crate) fn sse_client(conn: SseClientConn) -> Self {
        Self {
            variant: Variant::SseClient(conn),
        }
    }

    pub(crate) fn sse_server(conn: Arc<SseServerConn>) -> Self {
        Self {
            variant: Variant::SseServer(conn),
        }
    }

    fn inner(&self) -> &dyn Conn {
        match &self.variant {
            Variant::WsClient(conn) | Variant::WsServer(conn) => conn,
            Variant::SseClient(conn) => conn,
            Variant::SseServer(conn) => conn.as_ref(),
        }
    }

    /// Read available bytes into `buf`.
    ///
    /// Waits until at least one byte is available. Returns `Ok(0)` once the
    /// peer has closed and everything it sent has been delivered.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner().read(buf).await
    }

    /// Fill `buf` completely, failing with `ConnectionClosed` on early EOF.
    pub async fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner().read(&mut buf[filled..]).await? {
                0 => return Err(WebdialError::ConnectionClosed),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Send `buf` to the peer.
    ///
    /// On WebSocket this is one binary message; on SSE it is one event or one
    /// upload round trip. Fails with `ConnectionClosed` after close.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.inner().write(buf).await
    }

    /// Close the connection. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.inner().close().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner().is_closed()
    }

    pub fn transport(&self) -> Transport {
        match &self.variant {
            Variant::WsClient(_) | Variant::WsServer(_) => Transport::WebSocket,
            Variant::SseClient(_) | Variant::SseServer(_) => Transport::Sse,
        }
    }

    pub fn local_addr(&self) -> &Addr {
        self.inner().local_addr()
    }

    pub fn remote_addr(&self) -> &Addr {
        self.inner().remote_addr()
    }

    /// Accepted for API compatibility; timeouts belong to the HTTP layer.
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }

    /// Accepted for API compatibility; has no effect.
    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }

    /// Accepted for API compatibility; has no effect.
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match &self.variant {
            Variant::WsClient(_) | Variant::SseClient(_) => "client",
            Variant::WsServer(_) | Variant::SseServer(_) => "server",
        };
        f.debug_struct("Connection")
            .field("transport", &self.transport())
            .field("role", &role)
            .field("local", &self.local_addr().to_string())
            .field("remote", &self.remote_addr().to_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Dropped without close: let the session task tear the session down.
        if let Variant::SseServer(conn) = &self.variant {
            conn.abandon();
        }
    }
}
