//! Error types for webdial.
//!
//! Every failure a caller can observe maps to one [`WebdialError`] variant.
//! The variants follow the lifetime of a virtual connection: handshake
//! failures (which make [`crate::dial`] fall back to the next transport),
//! transport failures, protocol violations, and the two terminal conditions
//! "connection closed" and "server closed".

use crate::addr::Transport;
use async_tungstenite::tungstenite;
use thiserror::Error;

/// Main error type for webdial.
#[derive(Debug, Error)]
pub enum WebdialError {
    // Handshake errors
    #[error("{transport} handshake failed: {message}")]
    Handshake {
        transport: Transport,
        message: String,
    },

    #[error("All transports failed (ws: {websocket}; sse: {sse})")]
    AllTransportsFailed { websocket: String, sse: String },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    // Transport errors
    #[error("WebSocket error: {message}")]
    WebSocket {
        message: String,
        #[source]
        source: Option<tungstenite::Error>,
    },

    #[error("HTTP error: {message}")]
    Http {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Unexpected HTTP status {status} from {operation}")]
    UnexpectedStatus { status: u16, operation: &'static str },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Protocol errors
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    // Terminal conditions
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server closed")]
    ServerClosed,

    #[error("Dial cancelled")]
    Cancelled,
}

/// Result type alias for webdial operations.
pub type Result<T> = std::result::Result<T, WebdialError>;

impl From<std::io::Error> for WebdialError {
    fn from(err: std::io::Error) -> Self {
        WebdialError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for WebdialError {
    fn from(err: reqwest::Error) -> Self {
        WebdialError::Http {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tungstenite::Error> for WebdialError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                WebdialError::ConnectionClosed
            }
            other => WebdialError::WebSocket {
                message: other.to_string(),
                source: Some(other),
            },
        }
    }
}

impl From<axum::Error> for WebdialError {
    fn from(err: axum::Error) -> Self {
        WebdialError::WebSocket {
            message: err.to_string(),
            source: None,
        }
    }
}

impl From<base64::DecodeError> for WebdialError {
    fn from(err: base64::DecodeError) -> Self {
        WebdialError::Protocol {
            message: format!("invalid base64 payload: {}", err),
        }
    }
}

impl WebdialError {
    /// Create a handshake error for the given transport.
    pub fn handshake(transport: Transport, message: impl Into<String>) -> Self {
        WebdialError::Handshake {
            transport,
            message: message.into(),
        }
    }

    /// Create a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        WebdialError::Protocol {
            message: message.into(),
        }
    }

    /// True when the error means the server was shut down.
    ///
    /// Accept loops use this to stop instead of retrying.
    pub fn is_server_closed(&self) -> bool {
        matches!(self, WebdialError::ServerClosed)
    }

    /// True when the error means the connection is already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, WebdialError::ConnectionClosed)
    }

    /// Check if dialing again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebdialError::Handshake { .. }
                | WebdialError::AllTransportsFailed { .. }
                | WebdialError::WebSocket { .. }
                | WebdialError::Http { .. }
                | WebdialError::UnexpectedStatus { .. }
                | WebdialError::Io { .. }
        )
    }
}
