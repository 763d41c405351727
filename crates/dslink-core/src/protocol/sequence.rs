//! Per-connection message-id counter.
//!
//! # What is a message id? (for beginners)
//!
//! Every envelope that carries responses is stamped with a `msg` value: 0 for
//! the first, 1 for the second, and so on.  The remote peer echoes the value
//! back as `ack` once it has processed that envelope, so each side can tell how
//! far the other has caught up.
//!
//! # Why is this not atomic?
//!
//! Assigning an id and writing the envelope must happen as one step, or two
//! writers could put their envelopes on the wire in the opposite order from
//! their ids.  The dispatcher therefore keeps the counter *inside* the same
//! lock that guards the write path, and a plain `&mut self` counter is all that
//! is needed.  A fresh counter is created for every new connection.

/// Monotonic message-id source starting at 0.
///
/// # Examples
///
/// ```rust
/// use dslink_core::MessageIdCounter;
///
/// let mut counter = MessageIdCounter::new();
/// assert_eq!(counter.next_id(), 0);
/// assert_eq!(counter.next_id(), 1);
/// assert_eq!(counter.peek(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MessageIdCounter {
    next: u64,
}

impl MessageIdCounter {
    /// Creates a counter whose first id is 0.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns the next id and advances the counter.
    ///
    /// Wraps from `u64::MAX` back to 0 without panicking.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    /// Returns the id the next call to [`next_id`](Self::next_id) will hand out.
    pub fn peek(&self) -> u64 {
        self.next
    }
}
