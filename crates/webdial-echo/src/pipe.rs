//! Pipe mode: stdin to the connection, the connection to stdout.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use webdial::{dial, DialOptions, Transport};

const CHUNK_SIZE: usize = 16 * 1024;

/// Dial `url` and pipe until either side ends.
///
/// Stdin EOF closes the connection, which drops anything still in flight
/// from the peer.
pub async fn run(url: &str, transport: Option<Transport>) -> Result<()> {
    let mut options = DialOptions::new();
    if let Some(transport) = transport {
        options = options.with_transport(transport);
    }
    let conn = Arc::new(dial(url, options).await?);
    info!("Connected to {} via {}", conn.remote_addr(), conn.transport());

    let upstream = {
        let conn = conn.clone();
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = stdin.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                conn.write(&buf[..n]).await?;
            }
            debug!("stdin closed");
            conn.close().await?;
            Ok::<_, anyhow::Error>(())
        })
    };

    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n]).await?;
        stdout.flush().await?;
    }

    upstream.abort();
    conn.close().await?;
    info!("Connection closed");
    Ok(())
}
