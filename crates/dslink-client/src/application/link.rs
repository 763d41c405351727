//! Link: pairs one [`Dispatcher`] with one transport connection.
//!
//! `Link` is the [`TransportListener`] a transport reports to.  It forwards
//! raw frames to the dispatcher, binds and releases the writer as the
//! connection comes and goes, and owns the table of streams this side is
//! answering so they can all be terminated when the link shuts down.
//!
//! A `Link` is built per connection attempt, together with its dispatcher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dslink_core::{Payload, PayloadProducer, Response, ResponseError, StreamTable};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::application::dispatcher::{DispatchError, Dispatcher};
use crate::domain::ports::{FrameSink, TransportFault, TransportListener};

/// Connectivity as seen by a [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Errors from stream operations on a [`Link`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error(transparent)]
    Stream(#[from] ResponseError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub struct Link {
    dispatcher: Arc<Dispatcher>,
    streams: Mutex<StreamTable>,
    status: watch::Sender<LinkStatus>,
    last_fault: Mutex<Option<TransportFault>>,
}

impl Link {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let (status, _) = watch::channel(LinkStatus::Connecting);
        Self {
            dispatcher,
            streams: Mutex::new(StreamTable::new()),
            status,
            last_fault: Mutex::new(None),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// The most recent fault reported by the transport.
    pub fn last_fault(&self) -> Option<TransportFault> {
        self.last_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves once the connection is gone.
    pub async fn wait_disconnected(&self) {
        let mut rx = self.status.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|s| *s == LinkStatus::Disconnected).await;
    }

    // ── Streams ───────────────────────────────────────────────────────────────

    /// Opens a stream under a freshly allocated rid and returns the rid.
    pub fn open_stream(&self, producer: impl PayloadProducer + 'static) -> Result<u32, LinkError> {
        let mut streams = self.lock_streams();
        let rid = streams.allocate_rid();
        streams.insert(Response::open(rid, producer))?;
        debug!(rid, "stream opened");
        Ok(rid)
    }

    /// Registers a stream whose rid was chosen by the peer.
    pub fn register_stream(&self, response: Response) -> Result<(), LinkError> {
        let rid = response.rid();
        self.lock_streams().insert(response)?;
        debug!(rid, "stream registered");
        Ok(())
    }

    pub fn open_streams(&self) -> usize {
        self.lock_streams().len()
    }

    /// Builds the next fragment for `rid` and sends it.  Returns the `msg`
    /// of the envelope that carried it.
    ///
    /// The stream table stays locked until the fragment is on the sink, so
    /// no update can follow the stream's terminal fragment.
    pub fn respond(&self, rid: u32, context: &Payload) -> Result<u64, LinkError> {
        let mut streams = self.lock_streams();
        let response = streams
            .get_mut(rid)
            .ok_or(ResponseError::UnknownStream { rid })?;
        let fragment = response.json_response(context)?;
        Ok(self.dispatcher.write_response(fragment)?)
    }

    /// Ends one stream and sends its terminal fragment.
    pub fn close_stream(&self, rid: u32) -> Result<u64, LinkError> {
        let mut streams = self.lock_streams();
        let fragment = streams.close(rid)?;
        Ok(self.dispatcher.write_response(fragment)?)
    }

    /// Ends every open stream in one response batch.  Returns the batch's
    /// `msg`, or `None` when nothing was open.
    pub fn close_all_streams(&self) -> Result<Option<u64>, LinkError> {
        let mut streams = self.lock_streams();
        let fragments = streams.close_all();
        if fragments.is_empty() {
            return Ok(None);
        }
        let count = fragments.len();
        let msg = self.dispatcher.write_responses(None, fragments)?;
        drop(streams);
        info!(count, msg, "closed all streams");
        Ok(Some(msg))
    }

    /// Closes every stream, then starts a graceful close of the connection.
    ///
    /// The close handler fires when the transport reports the disconnect.
    pub fn shutdown(&self) -> Result<(), LinkError> {
        let closed = self.close_all_streams();
        if let Some(sink) = self.dispatcher.detach() {
            sink.close();
        }
        closed.map(|_| ())
    }

    fn lock_streams(&self) -> MutexGuard<'_, StreamTable> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransportListener for Link {
    fn on_connected(&self, writer: Arc<dyn FrameSink>) {
        match self.dispatcher.attach(Arc::clone(&writer)) {
            Ok(()) => {
                self.status.send_replace(LinkStatus::Connected);
                info!("link connected");
            }
            Err(e) => {
                error!("cannot bind connection: {e}");
                writer.close();
            }
        }
    }

    fn on_data(&self, bytes: Vec<u8>) {
        self.dispatcher.on_bytes_received(&bytes);
    }

    fn on_disconnected(&self) {
        // Nothing can be sent any more; drop the streams without writing
        // their terminal fragments.
        let dropped = self.lock_streams().close_all().len();
        if dropped > 0 {
            debug!(dropped, "streams dropped with the connection");
        }
        self.dispatcher.close();
        self.status.send_replace(LinkStatus::Disconnected);
        info!("link disconnected");
    }

    fn on_throwable(&self, cause: TransportFault) {
        warn!("transport fault: {cause}");
        *self
            .last_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cause);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
