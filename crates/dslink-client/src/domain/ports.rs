//! The seams between the dispatcher, the transport, and whoever owns the
//! connection.
//!
//! ```text
//!   Link (lifecycle owner)
//!     ▲  TransportListener: on_connected / on_data / on_disconnected / on_throwable
//!     │
//!   transport adapter ──── FrameSink ────▶ dispatcher writes
//! ```

use std::sync::Arc;

use dslink_core::{Payload, WireFormat};
use thiserror::Error;

/// One inbound batch handed to a request or response handler.
#[derive(Debug, Clone, PartialEq)]
pub struct DataReceived {
    /// The `msg` of the envelope the batch arrived in, if any.
    pub msg_id: Option<u64>,
    /// The batch, in arrival order.
    pub data: Vec<Payload>,
}

/// A write to a [`FrameSink`] that could not be queued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("connection is closed")]
    Closed,

    /// Text frames must carry UTF-8.
    #[error("text frame payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Post-handshake transport failure reported through
/// [`TransportListener::on_throwable`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// The socket failed while reading or writing.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The peer broke the WebSocket protocol.
    #[error("WebSocket protocol violation: {0}")]
    Protocol(String),

    /// Something other than a data, ping, pong, or close frame arrived.
    #[error("unexpected message during data phase: {0}")]
    UnexpectedMessage(String),
}

/// The writable side of one live connection.
///
/// Each `write_frame` call becomes exactly one WebSocket frame.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + Sync {
    /// The wire format negotiated for this connection.
    fn format(&self) -> WireFormat;

    /// Queues one frame; `binary` selects a binary rather than a text frame.
    fn write_frame(&self, bytes: Vec<u8>, binary: bool) -> Result<(), SinkError>;

    /// `false` while outgoing data is backed up.  Advisory only.
    fn writable(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Starts a graceful WebSocket close.
    fn close(&self);
}

/// The four connectivity events a transport reports upward.
pub trait TransportListener: Send + Sync {
    /// Handshake succeeded; fires at most once per connection.
    fn on_connected(&self, writer: Arc<dyn FrameSink>);

    /// Payload of one text or binary frame.
    fn on_data(&self, bytes: Vec<u8>);

    /// The connection ended; fires at most once per connection.
    fn on_disconnected(&self);

    /// A post-handshake fault; the connection is being torn down.
    fn on_throwable(&self, cause: TransportFault);
}
