//! Integration tests for the WebSocket transport against a loopback server.
//!
//! Each test runs a small server on `127.0.0.1:0` built from
//! `tokio_tungstenite::accept_async` (or a raw `TcpListener` for handshake
//! failures) and drives the client through the blocking `connect` call from
//! the test thread.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use dslink_client::application::{Dispatcher, Link, LinkStatus};
use dslink_client::domain::{FrameSink, TransportConfig, TransportFault, TransportListener};
use dslink_client::infrastructure::{
    ConnectCause, ConnectTarget, TransportError, TransportState, Workers, WsTransport,
};
use dslink_core::{decode_envelope, WireFormat};

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Connected,
    Data(Vec<u8>),
    Disconnected,
    Throwable(TransportFault),
}

/// Forwards every listener callback into a channel the test reads from.
struct Recorder {
    tx: Mutex<Sender<Event>>,
    writer: Mutex<Option<Arc<dyn FrameSink>>>,
}

impl Recorder {
    fn new() -> (Arc<Self>, Receiver<Event>) {
        let (tx, rx) = channel();
        let recorder = Arc::new(Self {
            tx: Mutex::new(tx),
            writer: Mutex::new(None),
        });
        (recorder, rx)
    }

    fn emit(&self, event: Event) {
        let _ = self.tx.lock().unwrap().send(event);
    }

    fn writer(&self) -> Arc<dyn FrameSink> {
        self.writer.lock().unwrap().clone().expect("not connected")
    }
}

impl TransportListener for Recorder {
    fn on_connected(&self, writer: Arc<dyn FrameSink>) {
        *self.writer.lock().unwrap() = Some(writer);
        self.emit(Event::Connected);
    }
    fn on_data(&self, bytes: Vec<u8>) {
        self.emit(Event::Data(bytes));
    }
    fn on_disconnected(&self) {
        self.emit(Event::Disconnected);
    }
    fn on_throwable(&self, cause: TransportFault) {
        self.emit(Event::Throwable(cause));
    }
}

fn runtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Accepts one WebSocket session and hands it to `session`.
fn serve_once<F, Fut>(rt: &Runtime, session: F) -> SocketAddr
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap();
    rt.spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        session(ws).await;
    });
    addr
}

fn target(addr: SocketAddr) -> ConnectTarget {
    ConnectTarget::parse(&format!("ws://{addr}/ws")).unwrap()
}

fn drain(rx: &Receiver<Event>, quiet: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_timeout(quiet) {
        events.push(event);
    }
    events
}

// ── Handshake ─────────────────────────────────────────────────────────────────

#[test]
fn test_connect_fires_on_connected_once_and_frames_reach_server() {
    // Arrange
    let rt = runtime();
    let (seen_tx, seen_rx) = channel();
    let addr = serve_once(&rt, move |mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_text() || msg.is_binary() {
                seen_tx.send(msg).unwrap();
            }
        }
    });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, events) = Recorder::new();

    // Act
    transport.connect(&target(addr), recorder.clone()).unwrap();
    let writer = recorder.writer();
    writer.write_frame(br#"{"ack":1}"#.to_vec(), false).unwrap();
    writer.write_frame(vec![0x81, 0xa3], true).unwrap();

    // Assert
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Event::Connected);
    assert_eq!(transport.state(), TransportState::Connected);
    assert!(writer.is_connected());
    assert_eq!(
        seen_rx.recv_timeout(WAIT).unwrap(),
        Message::Text(r#"{"ack":1}"#.to_string())
    );
    assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), Message::Binary(vec![0x81, 0xa3]));
    assert!(drain(&events, Duration::from_millis(100)).is_empty());
}

#[test]
fn test_transport_is_single_use() {
    let rt = runtime();
    let addr = serve_once(&rt, |mut ws| async move { while ws.next().await.is_some() {} });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, _events) = Recorder::new();

    transport.connect(&target(addr), recorder.clone()).unwrap();
    let second = transport.connect(&target(addr), recorder);

    assert!(matches!(second, Err(TransportError::AlreadyUsed)));
}

#[test]
fn test_rejected_upgrade_fails_connect_without_callbacks() {
    // Arrange: a plain HTTP server that refuses the upgrade
    let rt = runtime();
    let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap();
    rt.spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = tcp.read(&mut buf).await;
        let _ = tcp
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await;
    });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, events) = Recorder::new();

    // Act
    let result = transport.connect(&target(addr), recorder);

    // Assert
    assert!(matches!(
        result,
        Err(TransportError::ConnectFailed(ConnectCause::HandshakeRejected { status: 404 }))
    ));
    assert_eq!(transport.state(), TransportState::Disconnected);
    assert!(drain(&events, Duration::from_millis(100)).is_empty());
}

#[test]
fn test_refused_connection_is_a_network_failure() {
    let rt = runtime();
    let addr = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap()
    };
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, _events) = Recorder::new();

    let result = transport.connect(&target(addr), recorder);

    assert!(matches!(
        result,
        Err(TransportError::ConnectFailed(ConnectCause::Network(_)))
    ));
}

#[test]
fn test_silent_server_hits_handshake_timeout() {
    // Arrange: accept the TCP connection but never answer the upgrade
    let rt = runtime();
    let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap();
    rt.spawn(async move {
        let (_tcp, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });
    let config = TransportConfig {
        handshake_timeout: Duration::from_millis(200),
        ..TransportConfig::default()
    };
    let transport = WsTransport::new(rt.handle().clone(), config);
    let (recorder, _events) = Recorder::new();

    // Act
    let result = transport.connect(&target(addr), recorder);

    // Assert
    assert!(matches!(
        result,
        Err(TransportError::ConnectFailed(ConnectCause::Timeout(_)))
    ));
}

// ── Data phase ────────────────────────────────────────────────────────────────

#[test]
fn test_text_and_binary_frames_are_delivered_in_order() {
    let rt = runtime();
    let addr = serve_once(&rt, |mut ws| async move {
        ws.send(Message::Text(r#"{"msg":1}"#.to_string())).await.unwrap();
        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        while ws.next().await.is_some() {}
    });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, events) = Recorder::new();

    transport.connect(&target(addr), recorder).unwrap();

    assert_eq!(events.recv_timeout(WAIT).unwrap(), Event::Connected);
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        Event::Data(br#"{"msg":1}"#.to_vec())
    );
    assert_eq!(events.recv_timeout(WAIT).unwrap(), Event::Data(vec![1, 2, 3]));
}

#[test]
fn test_ping_is_answered_with_matching_pong_and_no_data() {
    // Arrange
    let rt = runtime();
    let (reply_tx, reply_rx) = channel();
    let addr = serve_once(&rt, move |mut ws| async move {
        ws.send(Message::Ping(b"ping-payload".to_vec())).await.unwrap();
        if let Some(Ok(reply)) = ws.next().await {
            reply_tx.send(reply).unwrap();
        }
        while ws.next().await.is_some() {}
    });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, events) = Recorder::new();

    // Act
    transport.connect(&target(addr), recorder).unwrap();

    // Assert
    assert_eq!(
        reply_rx.recv_timeout(WAIT).unwrap(),
        Message::Pong(b"ping-payload".to_vec())
    );
    assert_eq!(drain(&events, Duration::from_millis(200)), vec![Event::Connected]);
}

#[test]
fn test_close_frame_fires_disconnected_exactly_once() {
    // Arrange
    let rt = runtime();
    let addr = serve_once(&rt, |mut ws| async move {
        ws.send(Message::Close(None)).await.unwrap();
        // Drive the close handshake to completion.
        while ws.next().await.is_some() {}
    });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, events) = Recorder::new();

    // Act
    transport.connect(&target(addr), recorder.clone()).unwrap();

    // Assert
    assert_eq!(
        drain(&events, Duration::from_millis(300)),
        vec![Event::Connected, Event::Disconnected]
    );
    assert_eq!(transport.state(), TransportState::Disconnected);
    let writer = recorder.writer();
    assert!(!writer.is_connected());
    assert!(writer.write_frame(b"{}".to_vec(), false).is_err());
}

/// A complete HTTP response sent where a frame belongs.  Read as a frame
/// header, `HT` sets a reserved bit and announces an 84-byte payload, which
/// the rest of the response supplies.
const STRAY_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/html\r\n\
Content-Length: 52\r\n\
\r\n\
<html><body>upgrade handled elsewhere</body></html>\n";

#[test]
fn test_stray_http_response_after_handshake_is_a_protocol_fault() {
    // Arrange
    assert!(STRAY_RESPONSE.len() >= 2 + 84);
    let rt = runtime();
    let addr = serve_once(&rt, |mut ws| async move {
        let _ = ws.get_mut().write_all(STRAY_RESPONSE).await;
        // Hold the socket open so the fault cannot come from a reset.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, events) = Recorder::new();

    // Act
    transport.connect(&target(addr), recorder).unwrap();

    // Assert
    let events = drain(&events, Duration::from_millis(300));
    assert_eq!(events.first(), Some(&Event::Connected));
    assert!(
        matches!(events.get(1), Some(Event::Throwable(TransportFault::Protocol(_)))),
        "expected a protocol fault, got {events:?}"
    );
    assert_eq!(events.get(2), Some(&Event::Disconnected));
    assert_eq!(events.len(), 3);
    assert_eq!(transport.state(), TransportState::Disconnected);
}

#[test]
fn test_local_close_completes_handshake() {
    let rt = runtime();
    let (closed_tx, closed_rx) = channel();
    let addr = serve_once(&rt, move |mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                closed_tx.send(()).unwrap();
            }
        }
    });
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());
    let (recorder, events) = Recorder::new();

    transport.connect(&target(addr), recorder.clone()).unwrap();
    recorder.writer().close();

    closed_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(
        drain(&events, Duration::from_millis(300)),
        vec![Event::Connected, Event::Disconnected]
    );
}

// ── Link over a real connection ───────────────────────────────────────────────

#[test]
fn test_link_acks_inbound_msg_and_sends_requests() {
    // Arrange
    let rt = runtime();
    let (server_tx, server_rx) = channel();
    let addr = serve_once(&rt, move |mut ws| async move {
        ws.send(Message::Text(r#"{"responses":[{"rid":1}],"msg":3}"#.to_string()))
            .await
            .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                server_tx.send(text).unwrap();
            }
        }
    });

    let dispatcher = Arc::new(Dispatcher::new(WireFormat::Json, Workers::tokio(rt.handle())));
    let (batch_tx, batch_rx) = channel();
    let batch_tx = Mutex::new(batch_tx);
    dispatcher.set_response_handler(move |batch| {
        batch_tx.lock().unwrap().send(batch).unwrap();
    });
    let link = Arc::new(Link::new(dispatcher));
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());

    // Act
    transport.connect(&target(addr), link.clone()).unwrap();
    let batch = batch_rx.recv_timeout(WAIT).unwrap();
    let ack = server_rx.recv_timeout(WAIT).unwrap();
    let request = json!({"id": 5}).as_object().unwrap().clone();
    link.dispatcher().write_request(request).unwrap();
    let sent = server_rx.recv_timeout(WAIT).unwrap();

    // Assert
    assert_eq!(link.status(), LinkStatus::Connected);
    assert_eq!(batch.msg_id, Some(3));
    assert_eq!(batch.data.len(), 1);
    assert_eq!(ack, r#"{"ack":3}"#);
    assert_eq!(sent, r#"{"requests":[{"id":5}]}"#);
}

#[test]
fn test_msgpack_link_writes_binary_frames() {
    let rt = runtime();
    let (server_tx, server_rx) = channel();
    let addr = serve_once(&rt, move |mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(bytes) = msg {
                server_tx.send(bytes).unwrap();
            }
        }
    });
    let target = ConnectTarget::parse(&format!("ws://{addr}/ws?format=msgpack")).unwrap();
    let dispatcher = Arc::new(Dispatcher::new(target.format, Workers::tokio(rt.handle())));
    let link = Arc::new(Link::new(dispatcher));
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());

    transport.connect(&target, link.clone()).unwrap();
    let response = json!({"rid": 9, "updates": [[1, 2]]}).as_object().unwrap().clone();
    let msg = link.dispatcher().write_response(response).unwrap();

    let bytes = server_rx.recv_timeout(WAIT).unwrap();
    let envelope = decode_envelope(WireFormat::MessagePack, &bytes).unwrap();
    assert_eq!(msg, 0);
    assert_eq!(envelope.msg, Some(0));
    assert_eq!(envelope.responses.unwrap().len(), 1);
}

#[test]
fn test_link_reports_disconnect_when_server_closes() {
    let rt = runtime();
    let addr = serve_once(&rt, |mut ws| async move {
        ws.send(Message::Close(None)).await.unwrap();
        while ws.next().await.is_some() {}
    });
    let dispatcher = Arc::new(Dispatcher::new(WireFormat::Json, Workers::tokio(rt.handle())));
    let (closed_tx, closed_rx) = channel();
    let closed_tx = Mutex::new(closed_tx);
    dispatcher.set_close_handler(move || {
        closed_tx.lock().unwrap().send(()).unwrap();
    });
    let link = Arc::new(Link::new(dispatcher));
    let transport = WsTransport::new(rt.handle().clone(), TransportConfig::default());

    transport.connect(&target(addr), link.clone()).unwrap();
    closed_rx.recv_timeout(WAIT).unwrap();

    rt.block_on(async {
        tokio::time::timeout(WAIT, link.wait_disconnected())
            .await
            .unwrap();
    });
    assert_eq!(link.status(), LinkStatus::Disconnected);
    assert!(link.dispatcher().is_closed());
}
