//! WebSocket transport adapter (tokio-tungstenite).
//!
//! One [`WsTransport`] owns at most one physical connection over its whole
//! life:
//!
//! ```text
//! Idle ──connect──▶ Handshaking ──ok──▶ Connected ──close/fault──▶ Disconnected
//!                        │                                            ▲
//!                        └────────────── failure ─────────────────────┘
//! ```
//!
//! `Disconnected` is terminal; reconnecting means building a new transport.
//!
//! # Tasks
//!
//! After the handshake the stream is split and two tasks are spawned on the
//! I/O runtime:
//!
//! - **Reader** – delivers text and binary frames to
//!   [`TransportListener::on_data`] in arrival order, logs pings and pongs,
//!   and fires [`TransportListener::on_disconnected`] exactly once when the
//!   connection ends for any reason.
//! - **Writer** – drains an unbounded channel fed by [`WsWriter`].  This is
//!   the single point through which frames reach the socket.
//!
//! Pings are answered by tungstenite itself: the pong is queued when the ping
//! is read and flushed on the reader's next poll.  No listener is involved.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dslink_core::WireFormat;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::domain::config::TransportConfig;
use crate::domain::ports::{FrameSink, SinkError, TransportFault, TransportListener};
use crate::infrastructure::target::ConnectTarget;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a connect attempt never reached `Connected`.
#[derive(Debug, Error)]
pub enum ConnectCause {
    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(#[source] std::io::Error),

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    #[error("server refused the WebSocket upgrade with HTTP {status}")]
    HandshakeRejected { status: u16 },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("handshake protocol error: {0}")]
    Protocol(String),

    /// The I/O runtime dropped the connect task before it reported back.
    #[error("connect was aborted before completing")]
    Aborted,
}

/// Errors returned by [`WsTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] ConnectCause),

    #[error("transport already used; build a new one to reconnect")]
    AlreadyUsed,

    /// [`WsTransport::connect`] blocks, so it cannot run on a runtime thread.
    #[error("blocking connect called from inside an async runtime; use connect_async")]
    BlockingContext,

    #[error("transport is not connected")]
    NotConnected,
}

/// Lifecycle of one [`WsTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Handshaking,
    Connected,
    Disconnected,
}

// ── Shared connection state ───────────────────────────────────────────────────

/// State shared by the reader task, the writer task, and every [`WsWriter`].
struct Connection {
    /// Cleared as soon as either task stops.
    open: AtomicBool,
    /// Bytes handed to the writer task and not yet sent.
    queued: AtomicUsize,
    /// Wakes the reader when the writer hits a fault.
    writer_failed: Notify,
    /// Set by whichever task reports a fault first.
    faulted: AtomicBool,
}

impl Connection {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            queued: AtomicUsize::new(0),
            writer_failed: Notify::new(),
            faulted: AtomicBool::new(false),
        }
    }

    /// Forwards `fault` to the listener unless the other task already
    /// reported one for this connection.
    fn report_fault(&self, listener: &dyn TransportListener, fault: TransportFault) {
        if self.faulted.swap(true, Ordering::SeqCst) {
            debug!("suppressing second fault: {fault}");
            return;
        }
        listener.on_throwable(fault);
    }
}

enum Outbound {
    Frame { message: WsMessage, len: usize },
    Close,
}

// ── Writer handle ─────────────────────────────────────────────────────────────

/// The writable side of a live connection.
///
/// Cheap to clone; every clone feeds the same writer task.
#[derive(Clone)]
pub struct WsWriter {
    tx: mpsc::UnboundedSender<Outbound>,
    conn: Arc<Connection>,
    format: WireFormat,
    high_water_mark: usize,
}

impl WsWriter {
    /// Queues one frame: binary when `is_binary`, text otherwise.
    ///
    /// # Errors
    ///
    /// [`SinkError::Closed`] once the connection is gone, and
    /// [`SinkError::InvalidUtf8`] for a text frame that is not UTF-8.
    pub fn write(&self, bytes: Vec<u8>, is_binary: bool) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::Closed);
        }
        let len = bytes.len();
        let message = if is_binary {
            WsMessage::Binary(bytes)
        } else {
            WsMessage::Text(String::from_utf8(bytes).map_err(|_| SinkError::InvalidUtf8)?)
        };

        self.conn.queued.fetch_add(len, Ordering::SeqCst);
        self.tx
            .send(Outbound::Frame { message, len })
            .map_err(|_| {
                self.conn.queued.fetch_sub(len, Ordering::SeqCst);
                SinkError::Closed
            })
    }

    /// Starts the WebSocket close handshake.  Frames queued earlier are sent
    /// first.
    pub fn close(&self) {
        if self.tx.send(Outbound::Close).is_ok() {
            debug!("local close requested");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.open.load(Ordering::SeqCst)
    }

    /// `false` once more than the high-water mark is queued.  Writes are
    /// still accepted.
    pub fn writable(&self) -> bool {
        self.is_connected() && self.queued_bytes() < self.high_water_mark
    }

    pub fn queued_bytes(&self) -> usize {
        self.conn.queued.load(Ordering::SeqCst)
    }
}

impl FrameSink for WsWriter {
    fn format(&self) -> WireFormat {
        self.format
    }

    fn write_frame(&self, bytes: Vec<u8>, binary: bool) -> Result<(), SinkError> {
        self.write(bytes, binary)
    }

    fn writable(&self) -> bool {
        WsWriter::writable(self)
    }

    fn is_connected(&self) -> bool {
        WsWriter::is_connected(self)
    }

    fn close(&self) {
        WsWriter::close(self)
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Single-use WebSocket client connection.
///
/// Connection tasks always run on the runtime behind `io`, whichever thread
/// calls `connect`.
#[derive(Clone)]
pub struct WsTransport {
    io: Handle,
    config: TransportConfig,
    state: Arc<Mutex<TransportState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
}

impl WsTransport {
    pub fn new(io: Handle, config: TransportConfig) -> Self {
        // wss:// needs a process-wide rustls provider.  Installing fails
        // harmlessly when one is already in place.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self {
            io,
            config,
            state: Arc::new(Mutex::new(TransportState::Idle)),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The writer handed to `on_connected`, while connected.
    pub fn writer(&self) -> Result<WsWriter, TransportError> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(WsWriter::is_connected)
            .ok_or(TransportError::NotConnected)
    }

    /// Connects and blocks the calling thread until the handshake succeeds or
    /// fails.
    ///
    /// On success `listener.on_connected` has already fired when this
    /// returns.  On failure no listener method fires.
    ///
    /// # Errors
    ///
    /// - [`TransportError::BlockingContext`] when called on a runtime thread.
    /// - [`TransportError::AlreadyUsed`] on a second call.
    /// - [`TransportError::ConnectFailed`] for any handshake failure.
    pub fn connect(
        &self,
        target: &ConnectTarget,
        listener: Arc<dyn TransportListener>,
    ) -> Result<(), TransportError> {
        if Handle::try_current().is_ok() {
            return Err(TransportError::BlockingContext);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let transport = self.clone();
        let target = target.clone();
        self.io.spawn(async move {
            let result = transport.connect_async(&target, listener).await;
            let _ = done_tx.send(result);
        });

        done_rx
            .blocking_recv()
            .unwrap_or(Err(TransportError::ConnectFailed(ConnectCause::Aborted)))
    }

    /// Async form of [`connect`](Self::connect).
    pub async fn connect_async(
        &self,
        target: &ConnectTarget,
        listener: Arc<dyn TransportListener>,
    ) -> Result<(), TransportError> {
        self.begin()?;

        let url = target.url();
        info!(%url, format = %target.format, "connecting");

        let stream = match self.handshake(&url).await {
            Ok(stream) => stream,
            Err(cause) => {
                self.set_state(TransportState::Disconnected);
                warn!(%url, "connect failed: {cause}");
                return Err(TransportError::ConnectFailed(cause));
            }
        };

        let conn = Arc::new(Connection::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = WsWriter {
            tx,
            conn: Arc::clone(&conn),
            format: target.format,
            high_water_mark: self.config.write_high_water_mark,
        };
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer.clone());

        let (sink, source) = stream.split();
        self.io
            .spawn(write_loop(sink, rx, Arc::clone(&conn), Arc::clone(&listener)));

        self.set_state(TransportState::Connected);
        info!(%url, "connected");
        listener.on_connected(Arc::new(writer.clone()));

        // The reader starts only after on_connected has returned, so on_data
        // never races ahead of it.
        self.io.spawn(read_loop(
            source,
            writer,
            conn,
            listener,
            Arc::clone(&self.state),
        ));
        Ok(())
    }

    /// TCP connect, optional TLS, and the HTTP upgrade, bounded by the
    /// handshake timeout.
    async fn handshake(&self, url: &str) -> Result<WsStream, ConnectCause> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);

        let attempt = connect_async_with_config(url, Some(ws_config), self.config.disable_nagle);
        match timeout(self.config.handshake_timeout, attempt).await {
            Err(_) => Err(ConnectCause::Timeout(self.config.handshake_timeout)),
            Ok(Err(e)) => Err(classify_handshake_error(e)),
            Ok(Ok((stream, response))) => {
                debug!(status = %response.status(), "upgrade accepted");
                Ok(stream)
            }
        }
    }

    fn begin(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != TransportState::Idle {
            return Err(TransportError::AlreadyUsed);
        }
        *state = TransportState::Handshaking;
        Ok(())
    }

    fn set_state(&self, next: TransportState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

// ── I/O tasks ─────────────────────────────────────────────────────────────────

async fn read_loop(
    mut source: SplitStream<WsStream>,
    writer: WsWriter,
    conn: Arc<Connection>,
    listener: Arc<dyn TransportListener>,
    state: Arc<Mutex<TransportState>>,
) {
    loop {
        let item = tokio::select! {
            item = source.next() => item,
            _ = conn.writer_failed.notified() => {
                debug!("reader stopping after writer fault");
                break;
            }
        };

        match item {
            Some(Ok(WsMessage::Text(text))) => listener.on_data(text.into_bytes()),
            Some(Ok(WsMessage::Binary(data))) => listener.on_data(data),
            Some(Ok(WsMessage::Ping(payload))) => {
                debug!(len = payload.len(), "ping received");
            }
            Some(Ok(WsMessage::Pong(_))) => debug!("pong received"),
            Some(Ok(WsMessage::Close(frame))) => {
                info!(?frame, "peer closed the connection");
                break;
            }
            Some(Ok(WsMessage::Frame(_))) => {
                conn.report_fault(
                    listener.as_ref(),
                    TransportFault::UnexpectedMessage("raw frame outside a message".to_string()),
                );
                break;
            }
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                debug!("stream ended");
                break;
            }
            Some(Err(e)) => {
                warn!("transport fault: {e}");
                conn.report_fault(listener.as_ref(), classify_fault(e));
                break;
            }
        }
    }

    conn.open.store(false, Ordering::SeqCst);
    *state.lock().unwrap_or_else(PoisonError::into_inner) = TransportState::Disconnected;
    info!("disconnected");
    listener.on_disconnected();
    // Completes the close handshake if the peer started it, or closes the
    // socket after a fault.
    writer.close();
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    conn: Arc<Connection>,
    listener: Arc<dyn TransportListener>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame { message, len } => {
                let result = sink.send(message).await;
                conn.queued.fetch_sub(len, Ordering::SeqCst);
                match result {
                    Ok(()) => {}
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                    Err(e) => {
                        warn!("write failed: {e}");
                        conn.open.store(false, Ordering::SeqCst);
                        conn.report_fault(listener.as_ref(), classify_fault(e));
                        conn.writer_failed.notify_one();
                        break;
                    }
                }
            }
            Outbound::Close => {
                if let Err(e) = sink.close().await {
                    debug!("close: {e}");
                }
                break;
            }
        }
    }
    conn.open.store(false, Ordering::SeqCst);
    debug!("writer stopped");
}

// ── Error classification ──────────────────────────────────────────────────────

fn classify_handshake_error(e: WsError) -> ConnectCause {
    match e {
        WsError::Io(io) => ConnectCause::Network(io),
        WsError::Tls(tls) => ConnectCause::Tls(tls.to_string()),
        WsError::Http(response) => ConnectCause::HandshakeRejected {
            status: response.status().as_u16(),
        },
        WsError::Url(url) => ConnectCause::InvalidTarget(url.to_string()),
        other => ConnectCause::Protocol(other.to_string()),
    }
}

fn classify_fault(e: WsError) -> TransportFault {
    match e {
        WsError::Io(io) => TransportFault::Io(io.to_string()),
        other => TransportFault::Protocol(other.to_string()),
    }
}
