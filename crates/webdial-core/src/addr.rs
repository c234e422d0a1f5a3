//! Transport kinds and connection identities.

use crate::error::WebdialError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two transports a virtual connection can run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Full-duplex binary messages over an upgraded HTTP connection.
    #[serde(rename = "ws")]
    WebSocket,
    /// Server-Sent Events downstream plus HTTP POST uploads upstream.
    #[serde(rename = "sse")]
    Sse,
}

impl Transport {
    /// Short name used on the command line and in [`Addr::network`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::WebSocket => "ws",
            Transport::Sse => "sse",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = WebdialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" | "websocket" => Ok(Transport::WebSocket),
            "sse" => Ok(Transport::Sse),
            other => Err(WebdialError::UnknownTransport(other.to_string())),
        }
    }
}

/// Identity of one end of a virtual connection.
///
/// The `url` part is opaque: a socket address, a base URL or a placeholder
/// such as `local`, depending on what the transport knows about that end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Addr {
    transport: Transport,
    url: String,
}

impl Addr {
    pub fn new(transport: Transport, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Network name, `webdial-ws` or `webdial-sse`.
    pub fn network(&self) -> String {
        format!("webdial-{}", self.transport)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_parse() {
        assert_eq!("ws".parse::<Transport>().unwrap(), Transport::WebSocket);
        assert_eq!("SSE".parse::<Transport>().unwrap(), Transport::Sse);
        assert_eq!(
            "websocket".parse::<Transport>().unwrap(),
            Transport::WebSocket
        );
        assert!(matches!(
            "quic".parse::<Transport>(),
            Err(WebdialError::UnknownTransport(_))
        ));
    }

    #[test]
    fn test_addr_network_and_display() {
        let addr = Addr::new(Transport::Sse, "http://127.0.0.1:8080/wd");
        assert_eq!(addr.network(), "webdial-sse");
        assert_eq!(addr.to_string(), "http://127.0.0.1:8080/wd");
        assert_eq!(addr.transport(), Transport::Sse);

        let addr = Addr::new(Transport::WebSocket, "local");
        assert_eq!(addr.network(), "webdial-ws");
    }
}
