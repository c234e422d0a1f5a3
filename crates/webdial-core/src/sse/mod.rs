//! Server-Sent Events transport.
//!
//! Emulates a duplex byte stream with two one-way channels tied together by
//! a session identifier:
//!
//! ```text
//! client                                   server
//!   | GET  Accept: text/event-stream  -->    |  register session
//!   |  <-- event: sid   data: <id>           |
//!   |  <-- event: d     data: <base64>       |  Connection::write
//!   |  <-- event: ping                       |  every heartbeat interval
//!   | POST ?s=<id>  body: raw bytes  -->     |  appended to session pipe, 204
//!   | POST ?s=<id>&close=1           -->     |  session torn down, 204
//!   |  <-- event: close                      |  server-initiated close
//! ```

mod client;
pub(crate) mod codec;
mod server;

pub(crate) use client::{dial_sse, SseClientConn};
pub(crate) use server::{open_session, SseServerConn};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Base64 for `d` event payloads: standard alphabet, written without
/// padding, read with or without it.
pub(crate) const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
