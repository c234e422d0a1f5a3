//! webdial - duplex byte streams over plain HTTP.
//!
//! A client [`dial`]s a base URL and gets a [`Connection`]; a [`Server`]
//! mounted anywhere in an axum application hands the other end out through
//! [`Server::accept`]. Connections run over WebSocket when the path allows
//! upgrades and fall back to Server-Sent Events plus POST uploads when it
//! does not. Callers see the same byte stream either way.
//!
//! # Example
//!
//! ```rust,ignore
//! use webdial::{dial, DialOptions, Server};
//!
//! #[tokio::main]
//! async fn main() -> webdial::Result<()> {
//!     let server = Server::new();
//!     let app = axum::Router::new().nest_service("/wd", server.router());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(async move { axum::serve(listener, app).await });
//!
//!     let client = dial(&format!("http://{}/wd", addr), DialOptions::new()).await?;
//!     let conn = server.accept().await?;
//!
//!     client.write(b"hello").await?;
//!     let mut buf = [0u8; 5];
//!     conn.read_exact(&mut buf).await?;
//!     assert_eq!(&buf, b"hello");
//!     Ok(())
//! }
//! ```

pub mod addr;
pub mod config;
pub mod error;

mod client;
mod connection;
mod pipe;
mod server;
mod sse;
mod ws;

pub use addr::{Addr, Transport};
pub use client::{dial, DialOptions};
pub use config::{OverflowPolicy, ProtocolConfig, ServerConfig};
pub use connection::Connection;
pub use error::{Result, WebdialError};
pub use server::Server;
pub use tokio_util::sync::CancellationToken;
