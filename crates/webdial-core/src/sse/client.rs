//! Client end of the SSE transport.

use super::codec::{EventDecoder, SseEvent};
use super::PAYLOAD_ENGINE;
use crate::addr::{Addr, Transport};
use crate::config::ProtocolConfig;
use crate::connection::Conn;
use crate::error::{Result, WebdialError};
use async_trait::async_trait;
use base64::Engine;
use bytes::{Buf, Bytes};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

type EventStream = FramedRead<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>, EventDecoder>;

struct Reader {
    events: EventStream,
    pending: Bytes,
    eof: bool,
}

/// Client side of an SSE session: reads the event stream, writes by POST.
pub(crate) struct SseClientConn {
    client: reqwest::Client,
    upload_url: Url,
    close_url: Url,
    /// `None` once closed locally, which drops the event stream.
    reader: Mutex<Option<Reader>>,
    write_lock: Mutex<()>,
    /// Local close or end of the event stream; ends reads.
    closed: CancellationToken,
    /// Child of `closed`, also cancelled when an upload fails.
    writes: CancellationToken,
    close_sent: AtomicBool,
    local: Addr,
    remote: Addr,
}

/// Open an SSE session against `base_url` and wait for its `sid` event.
pub(crate) async fn dial_sse(client: reqwest::Client, base_url: &str) -> Result<SseClientConn> {
    let handshake = |message: String| WebdialError::handshake(Transport::Sse, message);

    let mut upload_url = Url::parse(base_url).map_err(|e| WebdialError::InvalidUrl {
        url: base_url.to_string(),
        message: e.to_string(),
    })?;

    let response = client
        .get(base_url)
        .header(ACCEPT, ProtocolConfig::EVENT_STREAM_MIME)
        .send()
        .await
        .map_err(|e| handshake(e.to_string()))?;
    if !response.status().is_success() {
        return Err(handshake(format!("server returned {}", response.status())));
    }

    let body: BoxStream<'static, io::Result<Bytes>> = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed();
    let mut events = FramedRead::new(StreamReader::new(body), EventDecoder::new());

    let session_id = match events.next().await {
        Some(Ok(SseEvent { event, data })) if event == ProtocolConfig::EVENT_SESSION_ID => data,
        Some(Ok(SseEvent { event, .. })) => {
            return Err(handshake(format!("expected sid event, got {:?}", event)))
        }
        Some(Err(e)) => return Err(handshake(format!("reading session id: {}", e))),
        None => return Err(handshake("stream ended before session id".to_string())),
    };
    if session_id.is_empty() {
        return Err(handshake("empty session id".to_string()));
    }

    upload_url
        .query_pairs_mut()
        .append_pair(ProtocolConfig::QUERY_SESSION_ID, &session_id);
    let mut close_url = upload_url.clone();
    close_url
        .query_pairs_mut()
        .append_pair(ProtocolConfig::QUERY_CLOSE, "1");

    debug!("SSE session {} established with {}", session_id, base_url);

    let closed = CancellationToken::new();
    Ok(SseClientConn {
        client,
        upload_url,
        close_url,
        reader: Mutex::new(Some(Reader {
            events,
            pending: Bytes::new(),
            eof: false,
        })),
        write_lock: Mutex::new(()),
        writes: closed.child_token(),
        closed,
        close_sent: AtomicBool::new(false),
        local: Addr::new(Transport::Sse, "local"),
        remote: Addr::new(Transport::Sse, base_url),
    })
}

#[async_trait]
impl Conn for SseClientConn {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Ok(0);
        };
        loop {
            if !reader.pending.is_empty() {
                let n = buf.len().min(reader.pending.len());
                buf[..n].copy_from_slice(&reader.pending[..n]);
                reader.pending.advance(n);
                return Ok(n);
            }
            if reader.eof {
                return Ok(0);
            }

            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(0),
                next = reader.events.next() => next,
            };
            match next {
                Some(Ok(event)) => match event.event.as_str() {
                    ProtocolConfig::EVENT_DATA => {
                        reader.pending = Bytes::from(PAYLOAD_ENGINE.decode(event.data)?);
                    }
                    ProtocolConfig::EVENT_HEARTBEAT => {}
                    ProtocolConfig::EVENT_CLOSE => {
                        debug!("SSE server closed session for {}", self.remote);
                        reader.eof = true;
                        self.closed.cancel();
                    }
                    other => {
                        return Err(WebdialError::protocol(format!(
                            "unexpected event type {:?}",
                            other
                        )))
                    }
                },
                Some(Err(e @ WebdialError::Protocol { .. })) => return Err(e),
                // A dropped stream without a close event still ends cleanly.
                Some(Err(e)) => {
                    debug!("SSE event stream from {} failed: {}", self.remote, e);
                    reader.eof = true;
                    self.closed.cancel();
                }
                None => {
                    reader.eof = true;
                    self.closed.cancel();
                }
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.writes.is_cancelled() {
            return Err(WebdialError::ConnectionClosed);
        }
        let _guard = self.write_lock.lock().await;
        if self.writes.is_cancelled() {
            return Err(WebdialError::ConnectionClosed);
        }

        let response = self
            .client
            .post(self.upload_url.clone())
            .header(CONTENT_TYPE, ProtocolConfig::UPLOAD_MIME)
            .body(buf.to_vec())
            .send()
            .await
            .inspect_err(|_| self.writes.cancel())?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(buf.len()),
            // The server no longer knows the session.
            StatusCode::NOT_FOUND => {
                self.writes.cancel();
                Err(WebdialError::ConnectionClosed)
            }
            status => Err(WebdialError::UnexpectedStatus {
                status: status.as_u16(),
                operation: "upload",
            }),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.close_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.cancel();

        {
            let _guard = self.write_lock.lock().await;
            let result = self
                .client
                .post(self.close_url.clone())
                .timeout(ProtocolConfig::CLOSE_REQUEST_TIMEOUT)
                .send()
                .await;
            if let Err(e) = result {
                debug!("SSE close request to {} failed: {}", self.remote, e);
            }
        }

        self.reader.lock().await.take();
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

impl Drop for SseClientConn {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
