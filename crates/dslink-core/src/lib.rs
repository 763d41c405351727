//! # dslink-core
//!
//! Shared, I/O-free building blocks of the DSLink transport-and-messaging
//! core: the wire envelope, its two encodings, and the per-stream response
//! state machine.
//!
//! Nothing in this crate touches sockets, threads, or async runtimes.  The
//! `dslink-client` crate wires these pieces to a WebSocket connection.
//!
//! # Architecture overview (for beginners)
//!
//! A DSLink talks to a broker by exchanging *envelopes*: small JSON (or
//! MessagePack) objects that carry batches of requests and responses plus two
//! bookkeeping integers, `msg` and `ack`.
//!
//! - **`protocol`** – The [`Envelope`] type, the [`EnvelopeCodec`] that turns
//!   envelopes into bytes and back for a negotiated [`WireFormat`], and the
//!   [`MessageIdCounter`] that stamps outgoing response envelopes.
//!
//! - **`stream`** – Long-lived requests (subscriptions, lists, invokes) form a
//!   *stream* identified by a request id (`rid`).  A [`Response`] tracks whether
//!   its stream is still open and produces the terminal `{"stream":"closed"}`
//!   fragment when it ends.  [`StreamTable`] keeps the open ones for a
//!   connection so they can all be closed on shutdown.

pub mod protocol;
pub mod stream;

// Re-export the most-used types at the crate root so callers can write
// `dslink_core::Envelope` instead of `dslink_core::protocol::envelope::Envelope`.
pub use protocol::codec::{decode_envelope, encode_envelope, CodecError, EnvelopeCodec, WireFormat};
pub use protocol::envelope::{Envelope, Payload};
pub use protocol::sequence::MessageIdCounter;
pub use stream::response::{closed_fragment, PayloadProducer, Response, ResponseError};
pub use stream::state::StreamState;
pub use stream::table::StreamTable;
