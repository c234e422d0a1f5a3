//! End-to-end tests over a real HTTP listener.
//!
//! Each test serves a `Server` router on `127.0.0.1:0` and dials it with the
//! public client API.

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use webdial::{
    dial, CancellationToken, Connection, DialOptions, Server, ServerConfig, Transport,
    WebdialError,
};

struct TestServer {
    server: Server,
    base_url: String,
}

async fn serve_at(server: Server, prefix: Option<&str>) -> TestServer {
    let app = match prefix {
        Some(prefix) => Router::new().nest_service(prefix, server.router()),
        None => server.router(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer {
        server,
        base_url: format!("http://{}{}", addr, prefix.unwrap_or("")),
    }
}

async fn serve(config: ServerConfig) -> TestServer {
    serve_at(Server::with_config(config), None).await
}

fn forced(transport: Transport) -> DialOptions {
    DialOptions::new().with_transport(transport)
}

async fn pair(test: &TestServer, options: DialOptions) -> (Connection, Connection) {
    let client = dial(&test.base_url, options).await.unwrap();
    let server = test.server.accept().await.unwrap();
    (client, server)
}

async fn read_to_end(conn: &Connection) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match conn.read(&mut buf).await.unwrap() {
            0 => return out,
            n => out.extend_from_slice(&buf[..n]),
        }
    }
}

async fn echo_hello(transport: Transport) {
    let test = serve(ServerConfig::default()).await;
    let (client, server) = pair(&test, forced(transport)).await;
    assert_eq!(client.transport(), transport);
    assert_eq!(server.transport(), transport);

    client.write(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    server.read_exact(&mut buf).await.unwrap();
    server.write(&buf).await.unwrap();

    let mut reply = [0u8; 5];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"hello");
}

#[tokio::test]
async fn test_echo_websocket() {
    echo_hello(Transport::WebSocket).await;
}

#[tokio::test]
async fn test_echo_sse() {
    echo_hello(Transport::Sse).await;
}

async fn payloads_round_trip(transport: Transport) {
    let test = serve(ServerConfig::default()).await;
    let (client, server) = pair(&test, forced(transport)).await;

    let all_bytes: Vec<u8> = (0..=255u8).collect();
    let large: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    let payloads: Vec<Vec<u8>> = vec![Vec::new(), vec![0x42], large, all_bytes];

    for payload in &payloads {
        assert_eq!(client.write(payload).await.unwrap(), payload.len());
        let mut got = vec![0u8; payload.len()];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, payload);

        assert_eq!(server.write(payload).await.unwrap(), payload.len());
        let mut got = vec![0u8; payload.len()];
        client.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, payload);
    }
}

#[tokio::test]
async fn test_payloads_websocket() {
    payloads_round_trip(Transport::WebSocket).await;
}

#[tokio::test]
async fn test_payloads_sse() {
    payloads_round_trip(Transport::Sse).await;
}

async fn close_is_eof_for_peer(transport: Transport) {
    let test = serve(ServerConfig::default()).await;

    // client closes
    let (client, server) = pair(&test, forced(transport)).await;
    client.write(b"bye").await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();
    assert_eq!(read_to_end(&server).await, b"bye");
    assert!(client.write(b"late").await.unwrap_err().is_closed());

    // server closes
    let (client, server) = pair(&test, forced(transport)).await;
    server.write(b"later").await.unwrap();
    server.close().await.unwrap();
    server.close().await.unwrap();
    assert_eq!(read_to_end(&client).await, b"later");
    assert!(server.write(b"late").await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_close_websocket() {
    close_is_eof_for_peer(Transport::WebSocket).await;
}

#[tokio::test]
async fn test_close_sse() {
    close_is_eof_for_peer(Transport::Sse).await;
}

async fn failed_write_keeps_reads_draining(transport: Transport) {
    let test = serve(ServerConfig::default()).await;
    let (client, server) = pair(&test, forced(transport)).await;
    server.write(b"bye").await.unwrap();
    server.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let write = client.write(b"unheard").await;
    if transport == Transport::Sse {
        assert!(write.unwrap_err().is_closed());
        assert!(client.is_closed());
    }
    assert_eq!(read_to_end(&client).await, b"bye");
}

#[tokio::test]
async fn test_failed_write_keeps_reads_draining_websocket() {
    failed_write_keeps_reads_draining(Transport::WebSocket).await;
}

#[tokio::test]
async fn test_failed_write_keeps_reads_draining_sse() {
    failed_write_keeps_reads_draining(Transport::Sse).await;
}

#[tokio::test]
async fn test_sse_close_releases_session() {
    let test = serve(ServerConfig::default()).await;
    let (client, _server) = pair(&test, forced(Transport::Sse)).await;
    assert_eq!(test.server.session_count(), 1);

    client.close().await.unwrap();
    client.close().await.unwrap();
    assert_eq!(test.server.session_count(), 0);
}

#[tokio::test]
async fn test_auto_dial_prefers_websocket() {
    let test = serve(ServerConfig::default()).await;
    let (client, server) = pair(&test, DialOptions::new()).await;
    assert_eq!(client.transport(), Transport::WebSocket);
    assert_eq!(server.transport(), Transport::WebSocket);
    assert_eq!(client.remote_addr().network(), "webdial-ws");
}

#[tokio::test]
async fn test_auto_dial_falls_back_to_sse() {
    let test = serve(ServerConfig::new().with_websocket(false)).await;
    let (client, server) = pair(&test, DialOptions::new()).await;
    assert_eq!(client.transport(), Transport::Sse);
    assert_eq!(server.transport(), Transport::Sse);
    assert_eq!(server.local_addr().network(), "webdial-sse");

    client.write(b"fallback").await.unwrap();
    let mut buf = [0u8; 8];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"fallback");
}

#[tokio::test]
async fn test_forced_websocket_fails_when_disabled() {
    let test = serve(ServerConfig::new().with_websocket(false)).await;
    let err = dial(&test.base_url, forced(Transport::WebSocket))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WebdialError::Handshake {
            transport: Transport::WebSocket,
            ..
        }
    ));
}

#[tokio::test]
async fn test_sse_messages_arrive_in_order() {
    let test = serve(ServerConfig::default()).await;
    let (client, server) = pair(&test, forced(Transport::Sse)).await;

    let mut expected = Vec::new();
    for i in 0..10 {
        let msg = format!("msg-{}", i);
        client.write(msg.as_bytes()).await.unwrap();
        expected.extend_from_slice(msg.as_bytes());
    }
    let mut got = vec![0u8; expected.len()];
    server.read_exact(&mut got).await.unwrap();
    assert_eq!(got, expected);

    for i in 0..10 {
        server.write(format!("msg-{}", i).as_bytes()).await.unwrap();
    }
    let mut got = vec![0u8; expected.len()];
    client.read_exact(&mut got).await.unwrap();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn test_concurrent_dials_are_independent() {
    const N: usize = 8;
    let test = Arc::new(serve(ServerConfig::default()).await);

    let echo = {
        let test = test.clone();
        tokio::spawn(async move {
            for _ in 0..N {
                let conn = test.server.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    loop {
                        match conn.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if conn.write(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        })
    };

    let mut clients = Vec::new();
    for i in 0..N {
        let base_url = test.base_url.clone();
        let transport = if i % 2 == 0 {
            Transport::WebSocket
        } else {
            Transport::Sse
        };
        clients.push(tokio::spawn(async move {
            let conn = dial(&base_url, forced(transport)).await.unwrap();
            let msg = format!("client-{:02}", i);
            conn.write(msg.as_bytes()).await.unwrap();
            let mut buf = vec![0u8; msg.len()];
            conn.read_exact(&mut buf).await.unwrap();
            conn.close().await.unwrap();
            (msg, String::from_utf8(buf).unwrap())
        }));
    }

    for client in clients {
        let (sent, echoed) = client.await.unwrap();
        assert_eq!(sent, echoed);
    }
    echo.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_ends_idle_sse_read() {
    let test = serve(ServerConfig::new().with_heartbeat_interval(Duration::from_secs(1))).await;
    let (client, _server) = pair(&test, forced(Transport::Sse)).await;

    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        client.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    test.server.close().await.unwrap();
    let n = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("read did not end within one heartbeat interval")
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    assert!(test.server.accept().await.unwrap_err().is_server_closed());
}

#[tokio::test]
async fn test_mounted_under_prefix() {
    let test = serve_at(Server::new(), Some("/wd")).await;
    assert!(test.base_url.ends_with("/wd"));

    for transport in [Transport::WebSocket, Transport::Sse] {
        let (client, server) = pair(&test, forced(transport)).await;
        server.write(b"prefixed").await.unwrap();
        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"prefixed");
    }

    let trailing = format!("{}/", test.base_url);
    let client = dial(&trailing, forced(Transport::Sse)).await.unwrap();
    let server = test.server.accept().await.unwrap();
    client.write(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    server.read_exact(&mut buf).await.unwrap();
}

#[tokio::test]
async fn test_routing_status_codes() {
    let test = serve(ServerConfig::default()).await;
    let http = reqwest::Client::new();

    let response = http.get(&test.base_url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = http.post(&test.base_url).body("x").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = http
        .post(format!("{}?s=deadbeef", test.base_url))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancelled_dial() {
    let test = serve(ServerConfig::default()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = dial(&test.base_url, DialOptions::new().with_cancel(cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, WebdialError::Cancelled));
}

#[tokio::test]
async fn test_dropped_sse_client_releases_session() {
    let test =
        serve(ServerConfig::new().with_heartbeat_interval(Duration::from_millis(50))).await;
    let (client, server) = pair(&test, forced(Transport::Sse)).await;
    assert_eq!(test.server.session_count(), 1);

    drop(client);
    tokio::time::timeout(Duration::from_secs(3), async {
        while test.server.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session outlived its client");

    assert_eq!(read_to_end(&server).await, b"");
    assert!(server.write(b"gone").await.unwrap_err().is_closed());
}
