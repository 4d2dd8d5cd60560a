#![cfg(feature = "net")]
//! Real transports against throwaway local servers.

use std::time::Duration;

use bascula_http::{HttpError, HttpScaleApi, WsConnector};
use bascula_traits::{BoxError, Frame, ScaleApi, StreamConnector};
use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Minimal HTTP/1.1 responder: answers every request by path and reports the
/// raw request text.
async fn http_server(routes: Vec<(&'static str, u16, &'static str)>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            let routes = routes.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut len = 0;
                loop {
                    let n = sock.read(&mut buf[len..]).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    len += n;
                    let text = String::from_utf8_lossy(&buf[..len]);
                    if let Some(head_end) = text.find("\r\n\r\n") {
                        let want = text
                            .lines()
                            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0)))
                            .unwrap_or(0);
                        if len >= head_end + 4 + want {
                            break;
                        }
                    }
                }
                let request = String::from_utf8_lossy(&buf[..len]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let _ = tx.send(request);
                let (status, body) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, s, b)| (*s, *b))
                    .unwrap_or((404, r#"{"detail":"Not Found"}"#));
                let resp = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
            });
        }
    });
    (base, rx)
}

fn http_error(e: &BoxError) -> &HttpError {
    e.downcast_ref::<HttpError>().expect("typed HttpError")
}

#[tokio::test]
async fn get_endpoints_pass_status_and_body_through() {
    let (base, _rx) = http_server(vec![
        ("/api/scale/read", 200, r#"{"ok":true,"grams":12.5}"#),
        ("/api/scale/status", 200, r#"{"ok":true}"#),
    ])
    .await;
    let api = HttpScaleApi::new(base, Duration::from_secs(2)).expect("client");

    let read = api.read().await.expect("read");
    assert_eq!(read.status, 200);
    assert_eq!(read.body, r#"{"ok":true,"grams":12.5}"#);

    let health = api.health().await.expect("health");
    assert_eq!(health.status, 404);
}

#[tokio::test]
async fn calibrate_posts_reference_weight() {
    let (base, mut rx) = http_server(vec![("/api/scale/calibrate", 200, r#"{"ok":true}"#)]).await;
    let api = HttpScaleApi::new(format!("{base}/"), Duration::from_secs(2)).expect("client");

    let reply = api.calibrate(250.0).await.expect("calibrate");
    assert_eq!(reply.status, 200);
    let request = rx.recv().await.expect("request");
    assert!(request.starts_with("POST /api/scale/calibrate "), "{request}");
    assert!(request.contains(r#"{"known_grams":250.0}"#), "{request}");
}

#[tokio::test]
async fn refused_connection_is_typed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = HttpScaleApi::new(format!("http://{addr}"), Duration::from_secs(2)).expect("client");
    let err = api.read().await.expect_err("nothing listening");
    assert!(matches!(http_error(&err), HttpError::Connect(_)));
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });

    let api = HttpScaleApi::new(format!("http://{addr}"), Duration::from_millis(200)).expect("client");
    let err = api.status().await.expect_err("no answer");
    assert!(matches!(http_error(&err), HttpError::Timeout));
}

#[tokio::test]
async fn websocket_frames_and_close_reason() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (sock, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(sock).await.expect("upgrade");
        ws.send(Message::Text(r#"{"weight":3.5,"unit":"g"}"#.into()))
            .await
            .expect("send");
        ws.send(Message::Ping(Vec::new().into())).await.expect("ping");
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .expect("close");
    });

    let mut source = WsConnector::default()
        .connect(&format!("ws://{addr}/ws/scale"))
        .await
        .expect("connect");
    match source.next_frame().await {
        Some(Ok(Frame::Text(t))) => assert_eq!(t, r#"{"weight":3.5,"unit":"g"}"#),
        other => panic!("unexpected: {other:?}"),
    }
    match source.next_frame().await {
        Some(Ok(Frame::Closed { code, reason })) => {
            assert_eq!(code, Some(1000));
            assert_eq!(reason.as_deref(), Some("bye"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn websocket_404_handshake_is_typed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 2048];
        let _ = sock.read(&mut buf).await;
        let _ = sock
            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await;
    });

    let err = match WsConnector::default()
        .connect(&format!("ws://{addr}/ws/scale"))
        .await
    {
        Ok(_) => panic!("handshake should fail"),
        Err(e) => e,
    };
    assert!(matches!(
        http_error(&err),
        HttpError::Handshake { status: 404 }
    ));
}
