//! Centralized configuration for webdial.
//!
//! Wire-level constants live in [`ProtocolConfig`]; they must agree between
//! client and server. Per-server tunables live in [`ServerConfig`].

use std::time::Duration;

/// Wire-level protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    // SSE event names
    pub const EVENT_SESSION_ID: &'static str = "sid";
    pub const EVENT_DATA: &'static str = "d";
    pub const EVENT_HEARTBEAT: &'static str = "ping";
    pub const EVENT_CLOSE: &'static str = "close";

    // Upload query parameters
    pub const QUERY_SESSION_ID: &'static str = "s";
    pub const QUERY_CLOSE: &'static str = "close";

    pub const EVENT_STREAM_MIME: &'static str = "text/event-stream";
    pub const UPLOAD_MIME: &'static str = "application/octet-stream";

    /// Random bytes in a session identifier (hex encoded on the wire).
    pub const SESSION_ID_BYTES: usize = 16;

    /// Upper bound on one decoded SSE event, guards the client decoder.
    pub const MAX_EVENT_BYTES: usize = 16 * 1024 * 1024;

    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
    pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long a closing session waits to enqueue its `close` event.
    pub const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);
    /// Deadline for the client's `close=1` upload.
    pub const CLOSE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Outbound events buffered per SSE session before writes wait.
    pub const EVENT_QUEUE_CAPACITY: usize = 64;
}

/// What a producer does when the accept queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for room in the queue or for server shutdown.
    #[default]
    Block,
    /// Close the new connection right away.
    Drop,
}

/// Server tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Connections that may wait for [`crate::Server::accept`].
    pub accept_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Interval between SSE `ping` events.
    pub heartbeat_interval: Duration,
    /// Interval between WebSocket pings on accepted sockets, `None` disables.
    pub websocket_keep_alive: Option<Duration>,
    /// Upload bodies buffered per SSE session before uploads start waiting.
    pub inbound_pipe_capacity: usize,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
    /// Whether upgrade requests are honored.
    pub websocket_enabled: bool,
}

impl ServerConfig {
    pub const DEFAULT_ACCEPT_QUEUE_CAPACITY: usize = 16;
    pub const DEFAULT_INBOUND_PIPE_CAPACITY: usize = 64;
    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_accept_queue_capacity(mut self, capacity: usize) -> Self {
        self.accept_queue_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_websocket_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.websocket_keep_alive = interval;
        self
    }

    #[must_use]
    pub fn with_inbound_pipe_capacity(mut self, capacity: usize) -> Self {
        self.inbound_pipe_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    #[must_use]
    pub fn with_websocket(mut self, enabled: bool) -> Self {
        self.websocket_enabled = enabled;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            accept_queue_capacity: Self::DEFAULT_ACCEPT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::Block,
            heartbeat_interval: ProtocolConfig::HEARTBEAT_INTERVAL,
            websocket_keep_alive: Some(ProtocolConfig::HEARTBEAT_INTERVAL),
            inbound_pipe_capacity: Self::DEFAULT_INBOUND_PIPE_CAPACITY,
            max_upload_bytes: Self::DEFAULT_MAX_UPLOAD_BYTES,
            websocket_enabled: true,
        }
    }
}
