//! HTTP request handlers.
//!
//! Everything arrives at one fallback handler and is classified by protocol
//! markers so the router works at any mount point.

use super::ServerInner;
use crate::addr::{Addr, Transport};
use crate::config::ProtocolConfig;
use crate::connection::Connection;
use crate::sse::open_session;
use crate::ws::WsConn;
use axum::{
    extract::{
        ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, OriginalUri, Query, Request, State,
    },
    http::{
        header::{ACCEPT, CONTENT_LENGTH, HOST, UPGRADE},
        request::Parts,
        HeaderMap, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) fn router(server: Arc<ServerInner>) -> Router {
    Router::new().fallback(dispatch).with_state(server)
}

/// What a request is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    WebSocket,
    OpenSession,
    Upload,
    Unsupported,
}

fn classify(method: &Method, headers: &HeaderMap) -> RequestKind {
    if headers.get(UPGRADE).is_some_and(|value| !value.is_empty()) {
        return RequestKind::WebSocket;
    }
    if method == Method::POST {
        return RequestKind::Upload;
    }
    let wants_events = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains(ProtocolConfig::EVENT_STREAM_MIME));
    if method == Method::GET && wants_events {
        return RequestKind::OpenSession;
    }
    RequestKind::Unsupported
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    s: Option<String>,
    close: Option<String>,
}

async fn dispatch(State(server): State<Arc<ServerInner>>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let kind = classify(&parts.method, &parts.headers);
    match kind {
        RequestKind::WebSocket => handle_websocket(server, &mut parts).await,
        RequestKind::OpenSession => handle_open_session(server, &parts),
        RequestKind::Upload => handle_upload(server, &parts, body).await,
        RequestKind::Unsupported => {
            (StatusCode::BAD_REQUEST, "unsupported webdial request").into_response()
        }
    }
}

fn local_addr(parts: &Parts, transport: Transport) -> Addr {
    let path = parts
        .extensions
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    match parts.headers.get(HOST).and_then(|host| host.to_str().ok()) {
        Some(host) => Addr::new(transport, format!("http://{}{}", host, path)),
        None => Addr::new(transport, path),
    }
}

fn remote_addr(parts: &Parts, transport: Transport) -> Addr {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Addr::new(transport, peer)
}

async fn handle_websocket(server: Arc<ServerInner>, parts: &mut Parts) -> Response {
    if !server.config.websocket_enabled {
        return (StatusCode::BAD_REQUEST, "websocket disabled").into_response();
    }
    if server.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server closed").into_response();
    }
    let upgrade =
        match <WebSocketUpgrade as FromRequestParts<()>>::from_request_parts(parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                debug!("Rejected WebSocket upgrade: {}", rejection);
                return rejection.into_response();
            }
        };

    let local = local_addr(parts, Transport::WebSocket);
    let remote = remote_addr(parts, Transport::WebSocket);
    let keep_alive = server.config.websocket_keep_alive;
    upgrade
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            debug!("WebSocket connection from {}", remote);
            let conn = WsConn::new(socket, local, remote, keep_alive);
            server.offer(Connection::ws_server(conn)).await;
        })
}

fn handle_open_session(server: Arc<ServerInner>, parts: &Parts) -> Response {
    if server.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server closed").into_response();
    }
    let local = local_addr(parts, Transport::Sse);
    let remote = remote_addr(parts, Transport::Sse);
    open_session(server, local, remote)
}

async fn handle_upload(
    server: Arc<ServerInner>,
    parts: &Parts,
    body: axum::body::Body,
) -> Response {
    let query = match Query::<UploadQuery>::try_from_uri(&parts.uri) {
        Ok(Query(query)) => query,
        Err(rejection) => return rejection.into_response(),
    };
    let Some(raw_id) = query.s.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing session id").into_response();
    };
    let Some(session) = raw_id
        .parse()
        .ok()
        .and_then(|id| server.sessions.get(&id))
    else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    if query.close.as_deref() == Some("1") {
        debug!("SSE session {} closed by client", session.id());
        session.shutdown().await;
        return StatusCode::NO_CONTENT.into_response();
    }

    let limit = server.config.max_upload_bytes;
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return (StatusCode::PAYLOAD_TOO_LARGE, "upload too large").into_response();
    }
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            debug!("SSE session {} upload unreadable: {}", session.id(), e);
            return (StatusCode::BAD_REQUEST, "unreadable upload body").into_response();
        }
    };

    match session.upload(body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "session closed").into_response(),
    }
}
