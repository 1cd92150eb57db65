//! `WsConnector` against a local tokio-tungstenite server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use drawback::net::backoff::BackoffPolicy;
use drawback::net::{Connector, Credential, Endpoint, Link, LinkEvent, LinkTarget, LinkTimeouts, WsConnector};
use frames::Frame;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

const WAIT: Duration = Duration::from_secs(5);

fn target(addr: std::net::SocketAddr) -> LinkTarget {
    LinkTarget {
        endpoint: Endpoint::parse(&format!("http://{addr}")).expect("endpoint"),
        credential: Credential::parse("token-1").expect("credential"),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
            jitter: 0.0,
        },
        timeouts: LinkTimeouts {
            handshake: Duration::from_millis(200),
            ping_interval: Duration::from_millis(50),
            idle: Duration::from_secs(2),
        },
    }
}

/// Accepts TCP connections, holds them open and never answers the upgrade.
/// Each accept is reported on the returned channel.
async fn silent_server() -> (std::net::SocketAddr, mpsc::UnboundedReceiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
            if tx.send(held.len()).is_err() {
                break;
            }
        }
    });
    (addr, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Option<LinkEvent> {
    tokio::time::timeout(WAIT, rx.recv()).await.expect("link event in time")
}

#[tokio::test]
async fn unauthorized_handshake_stops_link() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let attempts = Arc::new(AtomicUsize::new(0));

    let server_attempts = Arc::clone(&attempts);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            server_attempts.fetch_add(1, Ordering::SeqCst);
            let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                Err(Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .body(Some("unauthorized".to_owned()))
                    .expect("response"))
            };
            let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = WsConnector.open(&target(addr), tx);

    assert_eq!(next(&mut rx).await, Some(LinkEvent::Unauthorized));
    assert_eq!(next(&mut rx).await, None);
    assert!(!link.is_connected());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn frames_round_trip_with_bearer_header() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<(String, String)>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let capture = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let auth = request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            let _ = auth_tx.send((request.uri().path().to_owned(), auth));
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, capture).await.expect("handshake");

        while let Some(Ok(message)) = ws.next().await {
            let Message::Binary(bytes) = message else {
                continue;
            };
            let frame = frames::decode_frame(&bytes).expect("decode");
            assert_eq!(frame.event, "room.join");
            let ack = Frame::new("room.joined", json!({"peerIds": ["u2"]}))
                .with_room_key(frame.room_key.unwrap_or_default());
            ws.send(Message::Binary(frames::encode_frame(&ack).into())).await.expect("send");
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = WsConnector.open(&target(addr), tx);

    assert_eq!(next(&mut rx).await, Some(LinkEvent::Connected));
    assert!(link.is_connected());
    let (path, auth) = auth_rx.recv().await.expect("handshake seen");
    assert_eq!(path, "/drawback");
    assert_eq!(auth, "Bearer token-1");

    let join = Frame::new("room.join", json!({"roomKey": "r1"})).with_room_key("r1");
    assert!(link.send(join));

    let Some(LinkEvent::Frame(ack)) = next(&mut rx).await else {
        panic!("expected ack frame");
    };
    assert_eq!(ack.event, "room.joined");
    assert_eq!(ack.room_key.as_deref(), Some("r1"));
    link.close();
}

#[tokio::test]
async fn dropped_socket_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        // First connection is closed right after the handshake.
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        let _ = ws.close(None).await;
        drop(ws);

        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        while ws.next().await.is_some() {}
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = WsConnector.open(&target(addr), tx);

    assert_eq!(next(&mut rx).await, Some(LinkEvent::Connected));
    assert!(matches!(next(&mut rx).await, Some(LinkEvent::Disconnected { .. })));
    assert!(!link.send(Frame::new("draw.clear", json!({}))));
    assert_eq!(next(&mut rx).await, Some(LinkEvent::Connected));
    link.close();
}

#[tokio::test]
async fn stalled_handshake_times_out_and_retries() {
    let (addr, mut accepts) = silent_server().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = WsConnector.open(&target(addr), tx);

    let Some(LinkEvent::ConnectFailed { reason }) = next(&mut rx).await else {
        panic!("expected connect failure");
    };
    assert!(reason.contains("timed out"), "{reason}");
    assert!(!link.is_connected());

    let mut seen = 0;
    while seen < 2 {
        seen = tokio::time::timeout(WAIT, accepts.recv()).await.expect("accept in time").expect("server alive");
    }
    link.close();
}

#[tokio::test]
async fn reconnect_restarts_stalled_handshake() {
    let (addr, mut accepts) = silent_server().await;
    let slow = LinkTarget {
        timeouts: LinkTimeouts { handshake: Duration::from_secs(60), ..target(addr).timeouts },
        ..target(addr)
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = WsConnector.open(&slow, tx);

    let first = tokio::time::timeout(WAIT, accepts.recv()).await.expect("first accept");
    assert_eq!(first, Some(1));

    link.reconnect();
    let second = tokio::time::timeout(WAIT, accepts.recv()).await.expect("second accept after reconnect");
    assert_eq!(second, Some(2));
    assert!(rx.try_recv().is_err());

    link.close();
    assert_eq!(next(&mut rx).await, None);
}

#[tokio::test]
async fn silent_peer_is_dropped_after_idle_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        // Completes the upgrade, then never reads again so pings go unanswered.
        let (stream, _) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        let mut held = vec![ws];
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                held.push(ws);
            }
        }
    });

    let half_open = LinkTarget {
        timeouts: LinkTimeouts { idle: Duration::from_millis(200), ..target(addr).timeouts },
        ..target(addr)
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = WsConnector.open(&half_open, tx);

    assert_eq!(next(&mut rx).await, Some(LinkEvent::Connected));
    let Some(LinkEvent::Disconnected { reason }) = next(&mut rx).await else {
        panic!("expected idle disconnect");
    };
    assert!(reason.contains("no traffic"), "{reason}");
    assert_eq!(next(&mut rx).await, Some(LinkEvent::Connected));
    link.close();
}
