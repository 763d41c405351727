//! Dispatcher: routes decoded envelopes to handlers and serializes writes.
//!
//! # Inbound path
//!
//! ```text
//! transport on_data(bytes)
//!        │
//!        ▼
//!   decode (EnvelopeCodec) ── error ──▶ warn! + error handler, batch dropped
//!        │
//!        ├── requests  ──▶ request lane  ──▶ request handler(DataReceived)
//!        ├── responses ──▶ response lane ──▶ response handler(DataReceived)
//!        └── msg       ──▶ write {ack: msg} immediately
//! ```
//!
//! Handlers never run on the calling (I/O) thread unless the injected
//! [`Workers`] are inline.
//!
//! # Outbound path
//!
//! Every write goes through one mutex that guards both the attached sink and
//! the message-ID counter.  Assigning a `msg` and handing the frame to the
//! sink happen under that lock, so the order of `msg` values on the wire is
//! the order in which they were assigned.  The counter only advances after a
//! successful hand-off, which keeps the sequence free of gaps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dslink_core::{CodecError, Envelope, EnvelopeCodec, MessageIdCounter, Payload, WireFormat};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::ports::{DataReceived, FrameSink, SinkError};
use crate::infrastructure::executor::Workers;

/// Errors returned by [`Dispatcher`] operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// The caller passed an empty payload or batch.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No connection is attached.
    #[error("dispatcher is not attached to a connection")]
    NotConnected,

    /// `attach` was called while another connection is still attached.
    #[error("dispatcher is already attached; detach the previous connection first")]
    AlreadyAttached,

    /// `close` has already run; the dispatcher cannot be reused.
    #[error("dispatcher has been closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("write failed: {0}")]
    Sink(#[from] SinkError),
}

/// Handler for one inbound request or response batch.
pub type BatchHandler = Arc<dyn Fn(DataReceived) + Send + Sync>;
/// Handler fired once when the dispatcher closes.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;
/// Handler for inbound errors that never reach the caller of a write.
pub type ErrorHandler = Arc<dyn Fn(DispatchError) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    request: Option<BatchHandler>,
    response: Option<BatchHandler>,
    close: Option<CloseHandler>,
    error: Option<ErrorHandler>,
}

struct WriteState {
    sink: Option<Arc<dyn FrameSink>>,
    msg_ids: MessageIdCounter,
}

/// Envelope router for one logical connection.
///
/// A `Dispatcher` is created per connection attempt; its message-ID counter
/// starts at zero and is never reset.
pub struct Dispatcher {
    codec: EnvelopeCodec,
    workers: Workers,
    handlers: RwLock<Handlers>,
    write: Mutex<WriteState>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(format: WireFormat, workers: Workers) -> Self {
        Self {
            codec: EnvelopeCodec::new(format),
            workers,
            handlers: RwLock::new(Handlers::default()),
            write: Mutex::new(WriteState {
                sink: None,
                msg_ids: MessageIdCounter::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.codec.format()
    }

    // ── Connection binding ────────────────────────────────────────────────────

    /// Binds a live connection.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Closed`] after [`close`](Self::close).
    /// - [`DispatchError::Codec`] with `FormatMismatch` if the sink negotiated
    ///   a different wire format than this dispatcher encodes.
    /// - [`DispatchError::AlreadyAttached`] if a sink is still bound.
    pub fn attach(&self, sink: Arc<dyn FrameSink>) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        self.codec.ensure_format(sink.format())?;

        let mut state = self.lock_write();
        if state.sink.is_some() {
            return Err(DispatchError::AlreadyAttached);
        }
        state.sink = Some(sink);
        info!(format = %self.codec.format(), "dispatcher attached");
        Ok(())
    }

    /// Releases the bound connection, if any, and returns it.
    pub fn detach(&self) -> Option<Arc<dyn FrameSink>> {
        let sink = self.lock_write().sink.take();
        if sink.is_some() {
            debug!("dispatcher detached");
        }
        sink
    }

    pub fn is_attached(&self) -> bool {
        self.lock_write().sink.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Backpressure hint from the bound connection; `false` when detached.
    pub fn writable(&self) -> bool {
        self.lock_write()
            .sink
            .as_ref()
            .is_some_and(|sink| sink.writable())
    }

    /// The `msg` the next response envelope will carry.
    pub fn next_msg_id(&self) -> u64 {
        self.lock_write().msg_ids.peek()
    }

    // ── Handler registration ──────────────────────────────────────────────────
    //
    // Replacing a handler takes the write side of the handler lock.  Dispatch
    // clones the current `Arc` under the read side, so a batch already handed
    // to a lane still runs with the handler it was dispatched with.

    pub fn set_request_handler<F>(&self, handler: F)
    where
        F: Fn(DataReceived) + Send + Sync + 'static,
    {
        self.lock_handlers_mut().request = Some(Arc::new(handler));
    }

    pub fn set_response_handler<F>(&self, handler: F)
    where
        F: Fn(DataReceived) + Send + Sync + 'static,
    {
        self.lock_handlers_mut().response = Some(Arc::new(handler));
    }

    pub fn set_close_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock_handlers_mut().close = Some(Arc::new(handler));
    }

    /// Receives malformed-input reports and failed automatic acks.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(DispatchError) + Send + Sync + 'static,
    {
        self.lock_handlers_mut().error = Some(Arc::new(handler));
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Decodes one frame and dispatches its batches.
    ///
    /// Never fails: a malformed frame is logged, reported to the error
    /// handler, and dropped without invoking either batch handler.
    pub fn on_bytes_received(&self, bytes: &[u8]) {
        let envelope = match self.codec.decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(len = bytes.len(), "dropping inbound frame: {e}");
                self.report(e.into());
                return;
            }
        };

        if envelope.is_empty() && envelope.msg.is_none() {
            debug!("keepalive envelope received");
            return;
        }

        let Envelope {
            requests,
            responses,
            msg,
            ack,
        } = envelope;

        debug!(
            msg = ?msg,
            ack = ?ack,
            requests = requests.as_ref().map_or(0, Vec::len),
            responses = responses.as_ref().map_or(0, Vec::len),
            "envelope received"
        );

        let (request_handler, response_handler) = {
            let handlers = self.lock_handlers();
            (handlers.request.clone(), handlers.response.clone())
        };

        if let Some(batch) = requests {
            self.dispatch(batch, msg, request_handler, Lane::Requests);
        }
        if let Some(batch) = responses {
            self.dispatch(batch, msg, response_handler, Lane::Responses);
        }

        if let Some(msg) = msg {
            if let Err(e) = self.write_ack(msg) {
                warn!(msg, "failed to acknowledge: {e}");
                self.report(e);
            }
        }
    }

    fn dispatch(
        &self,
        batch: Vec<Payload>,
        msg_id: Option<u64>,
        handler: Option<BatchHandler>,
        lane: Lane,
    ) {
        if batch.is_empty() {
            debug!(lane = lane.name(), "empty batch skipped");
            return;
        }
        let Some(handler) = handler else {
            debug!(lane = lane.name(), count = batch.len(), "no handler registered; batch dropped");
            return;
        };

        let executor = match lane {
            Lane::Requests => self.workers.requests(),
            Lane::Responses => self.workers.responses(),
        };
        executor.execute(Box::new(move || handler(DataReceived { msg_id, data: batch })));
    }

    fn report(&self, error: DispatchError) {
        let handler = self.lock_handlers().error.clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Writes `{requests: [request]}` immediately.  Requests carry no `msg`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidArgument`] for an empty object,
    /// [`DispatchError::NotConnected`] when detached, or a codec / sink error.
    pub fn write_request(&self, request: Payload) -> Result<(), DispatchError> {
        if request.is_empty() {
            return Err(DispatchError::InvalidArgument("request must not be empty"));
        }
        let mut state = self.lock_write();
        self.send(&mut state, &Envelope::request(request))?;
        debug!("request sent");
        Ok(())
    }

    /// Writes a standalone `{ack: ack}` envelope.
    pub fn write_ack(&self, ack: u64) -> Result<(), DispatchError> {
        let mut state = self.lock_write();
        self.send(&mut state, &Envelope::ack(ack))?;
        debug!(ack, "ack sent");
        Ok(())
    }

    /// Writes one response object in its own envelope.  Returns the assigned
    /// `msg`.
    pub fn write_response(&self, response: Payload) -> Result<u64, DispatchError> {
        if response.is_empty() {
            return Err(DispatchError::InvalidArgument("response must not be empty"));
        }
        self.write_responses(None, vec![response])
    }

    /// Writes `{responses: [...], msg: <next>, ack?}` and returns the `msg`
    /// it carried.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidArgument`] for an empty batch or an empty
    /// object inside it, [`DispatchError::NotConnected`] when detached, or a
    /// codec / sink error.  On error the counter does not advance.
    pub fn write_responses(
        &self,
        ack: Option<u64>,
        responses: Vec<Payload>,
    ) -> Result<u64, DispatchError> {
        if responses.is_empty() {
            return Err(DispatchError::InvalidArgument("responses must not be empty"));
        }
        if responses.iter().any(Payload::is_empty) {
            return Err(DispatchError::InvalidArgument("response must not be empty"));
        }
        let count = responses.len();

        let mut state = self.lock_write();
        let msg = state.msg_ids.peek();
        self.send(&mut state, &Envelope::responses(msg, ack, responses))?;
        state.msg_ids.next_id();

        debug!(msg, ack = ?ack, count, "responses sent");
        Ok(msg)
    }

    /// Encodes and hands one envelope to the sink.  Must be called with the
    /// write lock held.
    fn send(&self, state: &mut WriteState, envelope: &Envelope) -> Result<(), DispatchError> {
        let sink = state.sink.as_ref().ok_or(DispatchError::NotConnected)?;
        let bytes = self.codec.encode(envelope)?;
        sink.write_frame(bytes, self.codec.format().is_binary())?;
        Ok(())
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Fires the close handler once, then detaches.  Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handler = self.lock_handlers().close.clone();
        if let Some(handler) = handler {
            handler();
        }
        self.detach();
        info!("dispatcher closed");
    }

    // ── Lock helpers ──────────────────────────────────────────────────────────

    fn lock_write(&self) -> MutexGuard<'_, WriteState> {
        self.write.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
enum Lane {
    Requests,
    Responses,
}

impl Lane {
    fn name(self) -> &'static str {
        match self {
            Lane::Requests => "requests",
            Lane::Responses => "responses",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
