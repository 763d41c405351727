//! Table of open streams on one connection.
//!
//! The table owns every [`Response`] whose stream is still open.  Closing a
//! stream removes it and runs it through a close response, so the terminal
//! fragment is always the one the stream's own method produces.  On
//! connection shutdown [`StreamTable::close_all`] does this for every stream
//! at once.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::protocol::envelope::Payload;
use crate::stream::response::{Response, ResponseError};

/// Open streams keyed by rid, plus the rid allocator for new requests.
#[derive(Debug)]
pub struct StreamTable {
    next_rid: u32,
    streams: BTreeMap<u32, Response>,
}

impl StreamTable {
    /// Creates an empty table.  The first allocated rid is 1; rid 0 is
    /// reserved by the protocol for subscription updates.
    pub fn new() -> Self {
        Self {
            next_rid: 1,
            streams: BTreeMap::new(),
        }
    }

    /// Returns a rid that has never been handed out by this table.
    pub fn allocate_rid(&mut self) -> u32 {
        let rid = self.next_rid;
        self.next_rid = self.next_rid.wrapping_add(1).max(1);
        rid
    }

    /// Registers an open response.
    ///
    /// # Errors
    ///
    /// [`ResponseError::RidInUse`] if a stream with the same rid is open, and
    /// [`ResponseError::StreamClosed`] if the response has already closed.
    pub fn insert(&mut self, response: Response) -> Result<(), ResponseError> {
        let rid = response.rid();
        if response.is_closed() {
            return Err(ResponseError::StreamClosed { rid });
        }
        if self.streams.contains_key(&rid) {
            return Err(ResponseError::RidInUse { rid });
        }
        self.streams.insert(rid, response);
        Ok(())
    }

    pub fn get_mut(&mut self, rid: u32) -> Option<&mut Response> {
        self.streams.get_mut(&rid)
    }

    pub fn contains(&self, rid: u32) -> bool {
        self.streams.contains_key(&rid)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Closes one stream and returns its terminal fragment.
    ///
    /// The stream is removed whether or not producing the fragment succeeds.
    ///
    /// # Errors
    ///
    /// [`ResponseError::UnknownStream`] if no stream with `rid` is open, or
    /// any error from the stream's own close logic.
    pub fn close(&mut self, rid: u32) -> Result<Payload, ResponseError> {
        let response = self
            .streams
            .remove(&rid)
            .ok_or(ResponseError::UnknownStream { rid })?;
        debug!(rid, "closing stream");
        Response::close(rid, Some(response)).close_response()
    }

    /// Closes every open stream, in rid order, and returns the terminal
    /// fragments ready to be written as one response batch.
    ///
    /// Streams whose close logic fails are dropped with a warning.
    pub fn close_all(&mut self) -> Vec<Payload> {
        let streams = std::mem::take(&mut self.streams);
        let mut fragments = Vec::with_capacity(streams.len());
        for (rid, response) in streams {
            match Response::close(rid, Some(response)).close_response() {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => warn!(rid, "dropping stream that failed to close: {e}"),
            }
        }
        fragments
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}
