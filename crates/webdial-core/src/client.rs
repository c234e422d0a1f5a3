//! Dialing: turn a base URL into a [`Connection`].
//!
//! Without an explicit transport the dialer tries WebSocket first and falls
//! back to SSE against the same URL when the upgrade fails for any reason.

use crate::addr::{Addr, Transport};
use crate::connection::Connection;
use crate::error::{Result, WebdialError};
use crate::sse::dial_sse;
use crate::ws::WsConn;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Options for [`dial`].
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Use exactly this transport instead of trying WebSocket then SSE.
    pub transport: Option<Transport>,
    /// WebSocket ping interval. Off by default on the client.
    pub keep_alive: Option<Duration>,
    /// HTTP client for the SSE transport; a default one is built if unset.
    pub http_client: Option<reqwest::Client>,
    /// Aborts an in-flight dial.
    pub cancel: Option<CancellationToken>,
}

impl DialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Connect to a webdial endpoint at `base_url` (`http://` or `https://`).
pub async fn dial(base_url: &str, options: DialOptions) -> Result<Connection> {
    let base = normalize_base_url(base_url)?;
    match options.cancel.clone() {
        Some(cancel) => tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WebdialError::Cancelled),
            conn = dial_any(&base, &options) => conn,
        },
        None => dial_any(&base, &options).await,
    }
}

async fn dial_any(base: &str, options: &DialOptions) -> Result<Connection> {
    match options.transport {
        Some(Transport::WebSocket) => dial_websocket(base, options.keep_alive).await,
        Some(Transport::Sse) => dial_sse_with(base, options).await,
        None => {
            let ws_err = match dial_websocket(base, options.keep_alive).await {
                Ok(conn) => return Ok(conn),
                Err(e) => e,
            };
            debug!("WebSocket dial to {} failed, trying SSE: {}", base, ws_err);
            dial_sse_with(base, options)
                .await
                .map_err(|sse_err| WebdialError::AllTransportsFailed {
                    websocket: ws_err.to_string(),
                    sse: sse_err.to_string(),
                })
        }
    }
}

async fn dial_websocket(base: &str, keep_alive: Option<Duration>) -> Result<Connection> {
    let url = websocket_url(base)?;
    let (socket, _response) = async_tungstenite::tokio::connect_async(url.as_str())
        .await
        .map_err(|e| WebdialError::handshake(Transport::WebSocket, e.to_string()))?;
    debug!("WebSocket connected to {}", url);
    let conn = WsConn::new(
        socket,
        Addr::new(Transport::WebSocket, "local"),
        Addr::new(Transport::WebSocket, url.as_str()),
        keep_alive,
    );
    Ok(Connection::ws_client(conn))
}

async fn dial_sse_with(base: &str, options: &DialOptions) -> Result<Connection> {
    let client = options.http_client.clone().unwrap_or_default();
    let conn = dial_sse(client, base).await?;
    Ok(Connection::sse_client(conn))
}

/// Trim whitespace and trailing slashes and check the scheme.
fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let invalid = |message: &str| WebdialError::InvalidUrl {
        url: raw.to_string(),
        message: message.to_string(),
    };
    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(invalid(&format!("unsupported scheme {:?}", other))),
    }
}

fn websocket_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| WebdialError::InvalidUrl {
        url: base.to_string(),
        message: e.to_string(),
    })?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| WebdialError::InvalidUrl {
            url: base.to_string(),
            message: format!("cannot use scheme {}", scheme),
        })?;
    Ok(url)
}
