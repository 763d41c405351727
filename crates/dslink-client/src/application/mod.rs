//! Application layer for dslink-client.
//!
//! Knows *what* happens to an envelope: which handler sees it, which `msg`
//! it carries, which stream a fragment belongs to.  Sockets and runtimes are
//! reached only through the [`crate::domain::ports`] traits.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or driving the WebSocket handshake (infrastructure)
//! - Byte-level encoding (that is `dslink-core`)

pub mod dispatcher;
pub mod link;

pub use dispatcher::{DispatchError, Dispatcher};
pub use link::{Link, LinkError, LinkStatus};
