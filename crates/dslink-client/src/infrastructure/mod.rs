//! Infrastructure layer for dslink-client.
//!
//! All I/O lives here: the WebSocket client connection and the worker lanes
//! that run handlers off the I/O tasks.
//!
//! # What does NOT belong here?
//!
//! - Envelope routing or message-ID assignment (application layer)
//! - Configuration parsing (domain layer and `main.rs`)

pub mod executor;
pub mod target;
pub mod ws_transport;

pub use executor::{Executor, InlineExecutor, SerialExecutor, Workers};
pub use target::{ConnectTarget, Scheme, TargetError};
pub use ws_transport::{ConnectCause, TransportError, TransportState, WsTransport, WsWriter};
