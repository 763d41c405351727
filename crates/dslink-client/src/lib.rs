//! dslink-client library crate.
//!
//! The connection side of a DSLink: a WebSocket transport, the dispatcher
//! that turns frames into handler calls and writes into ordered envelopes,
//! and the [`Link`](application::Link) glue that pairs the two.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! broker (envelopes over WebSocket)
//!         ↕
//! [dslink-client]
//!   ├── domain/           Config, FrameSink / TransportListener ports
//!   ├── application/      Dispatcher, Link (stream table + lifecycle)
//!   └── infrastructure/
//!         ├── ws_transport/  tokio-tungstenite client connection
//!         ├── target/        URL parsing and format negotiation
//!         └── executor/      worker lanes for handler calls
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `dslink-core`; it reaches workers
//!   only through the injected `Workers` value.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: configuration and ports (no I/O).
pub mod domain;

/// Application layer: envelope dispatch and link lifecycle.
pub mod application;

/// Infrastructure layer: WebSocket transport and worker lanes.
pub mod infrastructure;
