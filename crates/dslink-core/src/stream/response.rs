//! The response state machine for one stream.
//!
//! A [`Response`] is bound to exactly one `rid` for its whole life and moves
//! one way, from `Open` to `Closed`.  It comes in two shapes:
//!
//! - **open** – wraps a [`PayloadProducer`], the protocol-method-specific
//!   logic (list, subscribe, invoke, ...) that fills in and produces payload
//!   fragments.
//! - **close** – a pure close marker for a rid, optionally wrapping the real
//!   response of the stream being closed.  When it wraps one, the close
//!   fragment comes from the wrapped response, so a method that has
//!   something to say on its way out (final columns, an error) still gets to
//!   say it.
//!
//! ```text
//! Response::close(5, None)                 → {"rid":5,"stream":"closed"}
//! Response::close(5, Some(list_response))  → list_response.close_response()
//! ```

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::envelope::Payload;
use crate::stream::state::StreamState;

/// Errors raised by the response state machine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResponseError {
    /// The operation makes no sense for this kind of response.
    #[error("unsupported operation `{operation}` on rid {rid}")]
    UnsupportedOperation { rid: u32, operation: &'static str },

    /// The stream already produced its terminal fragment.
    #[error("stream {rid} is closed")]
    StreamClosed { rid: u32 },

    /// A stream with this rid is already registered.
    #[error("rid {rid} is already in use")]
    RidInUse { rid: u32 },

    /// No open stream has this rid.
    #[error("no open stream with rid {rid}")]
    UnknownStream { rid: u32 },

    /// The method-specific payload was rejected.
    #[error("invalid payload for rid {rid}: {reason}")]
    InvalidPayload { rid: u32, reason: String },
}

/// Builds the bare terminal fragment `{"rid":rid,"stream":"closed"}`.
pub fn closed_fragment(rid: u32) -> Payload {
    let mut fragment = Payload::new();
    fragment.insert("rid".to_string(), Value::from(rid));
    fragment.insert(
        "stream".to_string(),
        Value::from(StreamState::Closed.json_name()),
    );
    fragment
}

/// Method-specific payload logic plugged into an open [`Response`].
///
/// Implementations only see the rid; lifecycle checks (calling after close,
/// closing twice) are enforced by [`Response`] before these are reached.
pub trait PayloadProducer: Send {
    /// Feeds the protocol-specific fields of an inbound fragment.
    fn populate(&mut self, rid: u32, fragment: &Payload) -> Result<(), ResponseError>;

    /// Produces the outgoing fragment for an in-progress response.
    fn json_response(&mut self, rid: u32, context: &Payload) -> Result<Payload, ResponseError>;

    /// Produces the terminal fragment for this stream.
    fn close_response(&mut self, rid: u32) -> Payload {
        closed_fragment(rid)
    }
}

enum ResponseKind {
    Open(Box<dyn PayloadProducer>),
    Close(Option<Box<Response>>),
}

/// One stream's response, from creation until its terminal fragment.
pub struct Response {
    rid: u32,
    state: StreamState,
    kind: ResponseKind,
}

impl Response {
    /// Creates an open response driven by `producer`.
    pub fn open(rid: u32, producer: impl PayloadProducer + 'static) -> Self {
        Self {
            rid,
            state: StreamState::Open,
            kind: ResponseKind::Open(Box::new(producer)),
        }
    }

    /// Creates a close response for `rid`, optionally wrapping the stream's
    /// real response.
    pub fn close(rid: u32, inner: Option<Response>) -> Self {
        Self {
            rid,
            state: StreamState::Open,
            kind: ResponseKind::Close(inner.map(Box::new)),
        }
    }

    /// The stream identifier; never changes, including after close.
    pub fn rid(&self) -> u32 {
        self.rid
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Whether this is a close marker rather than a method response.
    pub fn is_close(&self) -> bool {
        matches!(self.kind, ResponseKind::Close(_))
    }

    /// Feeds an inbound fragment to the method logic.
    ///
    /// # Errors
    ///
    /// [`ResponseError::UnsupportedOperation`] on a close response, which
    /// carries no payload; [`ResponseError::StreamClosed`] after close.
    pub fn populate(&mut self, fragment: &Payload) -> Result<(), ResponseError> {
        let rid = self.rid;
        match &mut self.kind {
            ResponseKind::Close(_) => Err(ResponseError::UnsupportedOperation {
                rid,
                operation: "populate",
            }),
            ResponseKind::Open(_) if self.state.is_closed() => {
                Err(ResponseError::StreamClosed { rid })
            }
            ResponseKind::Open(producer) => producer.populate(rid, fragment),
        }
    }

    /// Produces the outgoing fragment for this response.
    ///
    /// For a close response this *is* the terminal fragment, so the call
    /// closes it.
    ///
    /// # Errors
    ///
    /// [`ResponseError::StreamClosed`] once the terminal fragment has been
    /// produced.
    pub fn json_response(&mut self, context: &Payload) -> Result<Payload, ResponseError> {
        if self.state.is_closed() {
            return Err(ResponseError::StreamClosed { rid: self.rid });
        }
        let rid = self.rid;
        if let ResponseKind::Open(producer) = &mut self.kind {
            return producer.json_response(rid, context);
        }
        self.close_response()
    }

    /// Produces the terminal fragment and moves the response to `Closed`.
    ///
    /// A close response wrapping another response delegates to it; a bare
    /// one yields `{"rid":rid,"stream":"closed"}`.
    ///
    /// # Errors
    ///
    /// Not idempotent: a second call fails with
    /// [`ResponseError::UnsupportedOperation`].  Errors from a wrapped
    /// response propagate and leave this one open.
    pub fn close_response(&mut self) -> Result<Payload, ResponseError> {
        if self.state.is_closed() {
            return Err(ResponseError::UnsupportedOperation {
                rid: self.rid,
                operation: "close_response",
            });
        }
        let rid = self.rid;
        let fragment = match &mut self.kind {
            ResponseKind::Open(producer) => producer.close_response(rid),
            ResponseKind::Close(None) => closed_fragment(rid),
            ResponseKind::Close(Some(inner)) => inner.close_response()?,
        };
        self.state = StreamState::Closed;
        Ok(fragment)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Response");
        s.field("rid", &self.rid).field("state", &self.state);
        match &self.kind {
            ResponseKind::Open(_) => s.field("kind", &"open"),
            ResponseKind::Close(inner) => s.field("wraps", inner),
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal method: echoes the last populated `value` back out and adds an
    /// `"error"` field to its terminal fragment.
    struct Echo {
        value: Value,
    }

    impl PayloadProducer for Echo {
        fn populate(&mut self, rid: u32, fragment: &Payload) -> Result<(), ResponseError> {
            match fragment.get("value") {
                Some(value) => {
                    self.value = value.clone();
                    Ok(())
                }
                None => Err(ResponseError::InvalidPayload {
                    rid,
                    reason: "missing `value`".to_string(),
                }),
            }
        }

        fn json_response(&mut self, rid: u32, _context: &Payload) -> Result<Payload, ResponseError> {
            let mut out = Payload::new();
            out.insert("rid".into(), Value::from(rid));
            out.insert("updates".into(), json!([self.value.clone()]));
            Ok(out)
        }

        fn close_response(&mut self, rid: u32) -> Payload {
            let mut out = closed_fragment(rid);
            out.insert("error".into(), Value::from("shutdown"));
            out
        }
    }

    fn echo() -> Echo {
        Echo { value: Value::Null }
    }

    fn obj(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        }
    }

    // ── Bare close ────────────────────────────────────────────────────────────

    #[test]
    fn test_bare_close_yields_exact_closed_fragment() {
        // Arrange
        let mut close = Response::close(7, None);

        // Act
        let fragment = close.close_response().unwrap();

        // Assert
        assert_eq!(fragment, obj(json!({"rid": 7, "stream": "closed"})));
        assert!(close.is_closed());
    }

    #[test]
    fn test_bare_close_twice_is_unsupported() {
        let mut close = Response::close(7, None);
        close.close_response().unwrap();

        assert_eq!(
            close.close_response(),
            Err(ResponseError::UnsupportedOperation {
                rid: 7,
                operation: "close_response"
            })
        );
    }

    #[test]
    fn test_close_populate_is_unsupported() {
        let mut close = Response::close(3, None);

        let result = close.populate(&Payload::new());

        assert!(matches!(
            result,
            Err(ResponseError::UnsupportedOperation {
                operation: "populate",
                ..
            })
        ));
    }

    #[test]
    fn test_close_json_response_is_the_terminal_fragment() {
        let mut close = Response::close(4, None);

        let fragment = close.json_response(&Payload::new()).unwrap();

        assert_eq!(fragment, closed_fragment(4));
        assert!(close.is_closed());
    }

    // ── Wrapping close ────────────────────────────────────────────────────────

    #[test]
    fn test_wrapping_close_delegates_to_inner_close_fragment() {
        // Arrange
        let inner = Response::open(9, echo());
        let mut close = Response::close(9, Some(inner));

        // Act
        let fragment = close.close_response().unwrap();

        // Assert – the inner method's terminal payload, not a bare marker
        assert_eq!(
            fragment,
            obj(json!({"rid": 9, "stream": "closed", "error": "shutdown"}))
        );
    }

    #[test]
    fn test_wrapping_close_of_already_closed_inner_propagates_error() {
        let mut inner = Response::open(2, echo());
        inner.close_response().unwrap();
        let mut close = Response::close(2, Some(inner));

        let result = close.close_response();

        assert!(matches!(
            result,
            Err(ResponseError::UnsupportedOperation { rid: 2, .. })
        ));
        assert!(!close.is_closed(), "a failed delegation must not close the wrapper");
    }

    // ── Open response ─────────────────────────────────────────────────────────

    #[test]
    fn test_open_response_produces_payload() {
        let mut resp = Response::open(5, echo());
        resp.populate(&obj(json!({"value": 42}))).unwrap();

        let fragment = resp.json_response(&Payload::new()).unwrap();

        assert_eq!(fragment, obj(json!({"rid": 5, "updates": [42]})));
        assert_eq!(resp.state(), StreamState::Open);
    }

    #[test]
    fn test_rid_is_unchanged_across_close() {
        let mut resp = Response::open(11, echo());
        let before = resp.rid();

        resp.close_response().unwrap();

        assert_eq!(resp.rid(), before);
    }

    #[test]
    fn test_rejected_payload_leaves_response_open() {
        // Arrange
        let mut resp = Response::open(6, echo());

        // Act
        let result = resp.populate(&obj(json!({"other": 1})));

        // Assert
        assert_eq!(
            result,
            Err(ResponseError::InvalidPayload {
                rid: 6,
                reason: "missing `value`".to_string(),
            })
        );
        assert_eq!(resp.state(), StreamState::Open);
        assert!(resp.json_response(&Payload::new()).is_ok());
    }

    #[test]
    fn test_is_close_distinguishes_markers_from_method_responses() {
        assert!(Response::close(1, None).is_close());
        assert!(Response::close(1, Some(Response::open(1, echo()))).is_close());
        assert!(!Response::open(1, echo()).is_close());
    }

    #[test]
    fn test_payload_methods_fail_after_close() {
        let mut resp = Response::open(5, echo());
        resp.close_response().unwrap();

        assert_eq!(
            resp.json_response(&Payload::new()),
            Err(ResponseError::StreamClosed { rid: 5 })
        );
        assert_eq!(
            resp.populate(&Payload::new()),
            Err(ResponseError::StreamClosed { rid: 5 })
        );
    }

    #[test]
    fn test_default_producer_close_is_bare_fragment() {
        struct Silent;
        impl PayloadProducer for Silent {
            fn populate(&mut self, _: u32, _: &Payload) -> Result<(), ResponseError> {
                Ok(())
            }
            fn json_response(&mut self, rid: u32, _: &Payload) -> Result<Payload, ResponseError> {
                Ok(closed_fragment(rid))
            }
        }

        let mut resp = Response::open(1, Silent);

        assert_eq!(resp.close_response().unwrap(), closed_fragment(1));
    }

    #[test]
    fn test_debug_output_names_rid_and_kind() {
        let resp = Response::close(8, Some(Response::open(8, echo())));
        let text = format!("{resp:?}");
        assert!(text.contains("rid: 8"));
        assert!(text.contains("open"));
    }
}
