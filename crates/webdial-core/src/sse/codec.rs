//! Text event-stream decoding for the client side of the SSE transport.
//!
//! Implements the subset of the `text/event-stream` format that webdial
//! servers emit: `event:` and `data:` fields, comments, and blank-line
//! dispatch. Lines end in `\n` or `\r\n`.

use crate::config::ProtocolConfig;
use crate::error::{Result, WebdialError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Streaming decoder producing [`SseEvent`]s.
#[derive(Debug, Default)]
pub(crate) struct EventDecoder {
    event: Option<String>,
    data: Option<String>,
    /// Bytes of the current event accumulated so far.
    size: usize,
}

impl EventDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        self.size = 0;
        let event = self.event.take();
        let data = self.data.take();
        if event.is_none() && data.is_none() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.unwrap_or_default(),
        })
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            // id and retry carry no meaning here
            _ => {}
        }
    }
}

impl Decoder for EventDecoder {
    type Item = SseEvent;
    type Error = WebdialError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>> {
        loop {
            let Some(end) = src.iter().position(|b| *b == b'\n') else {
                if self.size + src.len() > ProtocolConfig::MAX_EVENT_BYTES {
                    return Err(WebdialError::protocol("event exceeds maximum size"));
                }
                return Ok(None);
            };

            let mut line = src.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    return Ok(Some(event));
                }
                continue;
            }

            self.size += line.len();
            if self.size > ProtocolConfig::MAX_EVENT_BYTES {
                return Err(WebdialError::protocol("event exceeds maximum size"));
            }
            let line = std::str::from_utf8(&line)
                .map_err(|_| WebdialError::protocol("event stream is not valid UTF-8"))?;
            self.field(line);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        // An event without its terminating blank line is discarded.
        src.advance(src.len());
        self.event = None;
        self.data = None;
        self.size = 0;
        Ok(None)
    }
}
