//! HTTP server hosting the echo endpoint.

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use webdial::{Connection, Server, ServerConfig};

/// A running echo server.
pub struct EchoServer {
    pub addr: SocketAddr,
    /// Base URL clients dial.
    pub url: String,
    pub server: Server,
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Normalize a mount prefix to `/a/b` form; empty means the root.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Start the echo server.
///
/// Returns once the listener is bound; serving and echoing run in the
/// background.
pub async fn start_server(
    config: ServerConfig,
    host: &str,
    port: u16,
    prefix: &str,
    static_dir: Option<PathBuf>,
) -> anyhow::Result<EchoServer> {
    let server = Server::with_config(config);
    let prefix = normalize_prefix(prefix);

    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new().route("/health", get(handle_health));
    app = match (prefix.is_empty(), static_dir) {
        (true, None) => app.fallback_service(server.router()),
        (true, Some(_)) => {
            anyhow::bail!("--static-dir needs a non-root --prefix for the endpoint")
        }
        (false, static_dir) => {
            let app = app.nest_service(&prefix, server.router());
            match static_dir {
                Some(dir) => {
                    info!("Serving static files from {}", dir.display());
                    app.fallback_service(ServeDir::new(dir))
                }
                None => app,
            }
        }
    };
    let app = app.layer(TraceLayer::new_for_http()).layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            warn!("HTTP server stopped: {}", e);
        }
    });

    tokio::spawn(accept_loop(server.clone()));

    Ok(EchoServer {
        addr: actual_addr,
        url: format!("http://{}{}", actual_addr, prefix),
        server,
    })
}

async fn accept_loop(server: Server) {
    loop {
        match server.accept().await {
            Ok(conn) => {
                info!(
                    "Accepted {} connection from {}",
                    conn.transport(),
                    conn.remote_addr()
                );
                tokio::spawn(echo(conn));
            }
            Err(e) if e.is_server_closed() => {
                debug!("Accept loop stopped");
                return;
            }
            Err(e) => warn!("Accept failed: {}", e),
        }
    }
}

async fn echo(conn: Connection) {
    let mut buf = vec![0u8; 32 * 1024];
    let mut total = 0usize;
    loop {
        let n = match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Read from {} failed: {}", conn.remote_addr(), e);
                break;
            }
        };
        if let Err(e) = conn.write(&buf[..n]).await {
            debug!("Write to {} failed: {}", conn.remote_addr(), e);
            break;
        }
        total += n;
    }
    let _ = conn.close().await;
    debug!("Echoed {} bytes for {}", total, conn.remote_addr());
}
