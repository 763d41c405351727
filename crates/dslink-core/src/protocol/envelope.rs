//! The envelope: the unit exchanged on the wire.
//!
//! ```json
//! {"requests":[{"rid":5,"method":"list","path":"/"}]}
//! {"responses":[{"rid":5,"updates":[]}],"msg":0,"ack":3}
//! {"ack":3}
//! ```
//!
//! Request and response objects are opaque to this crate; they are carried
//! as JSON object maps ([`Payload`]) and only routed, never interpreted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One opaque request or response object.
pub type Payload = Map<String, Value>;

/// One top-level object exchanged over the transport.
///
/// Field declaration order is the order fields appear on the wire:
/// `requests`, `responses`, `msg`, `ack`.  Absent fields are omitted
/// entirely rather than written as `null`.
///
/// # Invariants
///
/// - A well-formed outgoing envelope carries at least one of `requests`,
///   `responses`, or `ack`.  Use the constructors below, which cannot build
///   an empty envelope.
/// - `msg` is only stamped on envelopes carrying `responses`.
///
/// Inbound envelopes may legitimately be empty (`{}`); brokers send them as
/// keepalives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Batch of request objects, in send order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<Vec<Payload>>,

    /// Batch of response objects, in send order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<Payload>>,

    /// Sender-assigned message id; present only alongside `responses`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<u64>,

    /// A previously received `msg` value being acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl Envelope {
    /// Wraps a single request into `{"requests":[request]}`.
    ///
    /// Requests never consume message-id space, so `msg` stays unset.
    pub fn request(request: Payload) -> Self {
        Self {
            requests: Some(vec![request]),
            ..Self::default()
        }
    }

    /// Builds a response batch stamped with `msg` and an optional `ack`.
    pub fn responses(msg: u64, ack: Option<u64>, responses: Vec<Payload>) -> Self {
        Self {
            responses: Some(responses),
            msg: Some(msg),
            ack,
            ..Self::default()
        }
    }

    /// Builds the minimal `{"ack":id}` envelope.
    pub fn ack(ack: u64) -> Self {
        Self {
            ack: Some(ack),
            ..Self::default()
        }
    }

    /// Returns `true` if the envelope carries no requests, responses, or ack.
    ///
    /// A bare `msg` does not count: it is metadata for a response batch and
    /// means nothing on its own.
    pub fn is_empty(&self) -> bool {
        self.requests.is_none() && self.responses.is_none() && self.ack.is_none()
    }
}
