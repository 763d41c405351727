//! Domain layer for dslink-client.
//!
//! Plain types with no I/O: configuration structures and the traits that
//! connect the dispatcher, the transport adapter, and the lifecycle owner.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - Envelope routing logic (that is the application layer)

pub mod config;
pub mod ports;

pub use config::{ConfigError, LinkConfig, TransportConfig};
pub use ports::{DataReceived, FrameSink, SinkError, TransportFault, TransportListener};
