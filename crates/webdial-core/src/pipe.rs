//! Bounded byte pipe between upload handlers and an SSE session's reader.
//!
//! `put` waits while the pipe is full and fails once the pipe is closed.
//! `take` waits for data and returns 0 only after the pipe is closed and
//! every buffered chunk has been handed out.

use crate::error::{Result, WebdialError};
use bytes::{Buf, Bytes};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

struct Reader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

pub(crate) struct BytePipe {
    tx: mpsc::Sender<Bytes>,
    reader: Mutex<Reader>,
    closed: CancellationToken,
}

impl BytePipe {
    /// Create a pipe that buffers up to `capacity` chunks.
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            reader: Mutex::new(Reader {
                rx,
                pending: Bytes::new(),
            }),
            closed: CancellationToken::new(),
        }
    }

    /// Append a chunk. Returns once the chunk is buffered.
    pub(crate) async fn put(&self, chunk: Bytes) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(WebdialError::ConnectionClosed);
        }
        if chunk.is_empty() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(WebdialError::ConnectionClosed),
            sent = self.tx.send(chunk) => sent.map_err(|_| WebdialError::ConnectionClosed),
        }
    }

    /// Copy buffered bytes into `buf`, waiting for data if none is buffered.
    pub(crate) async fn take(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut reader = self.reader.lock().await;
        loop {
            if !reader.pending.is_empty() {
                let n = buf.len().min(reader.pending.len());
                buf[..n].copy_from_slice(&reader.pending[..n]);
                reader.pending.advance(n);
                return n;
            }

            let next = tokio::select! {
                biased;
                chunk = reader.rx.recv() => chunk,
                // Drain whatever was buffered before the close.
                _ = self.closed.cancelled() => reader.rx.try_recv().ok(),
            };
            match next {
                Some(chunk) => reader.pending = chunk,
                None => return 0,
            }
        }
    }

    /// Close the pipe. Later `put`s fail; `take` drains, then reports EOF.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}
