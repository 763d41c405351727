//! Stream states and their wire names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of one logical stream, as written in a response's `"stream"` field.
///
/// The lifecycle is one-way: `Initialize` → `Open` → `Closed`.  A closed
/// stream never reopens; a new request needs a new `rid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// The responder has accepted the request but not produced data yet.
    Initialize,
    /// The responder may still emit responses for this rid.
    Open,
    /// Terminal.
    Closed,
}

impl StreamState {
    /// The value used in the `"stream"` field of a response.
    pub fn json_name(self) -> &'static str {
        match self {
            StreamState::Initialize => "initialize",
            StreamState::Open => "open",
            StreamState::Closed => "closed",
        }
    }

    /// Parses a `"stream"` field value.
    pub fn from_json_name(name: &str) -> Option<Self> {
        match name {
            "initialize" => Some(StreamState::Initialize),
            "open" => Some(StreamState::Open),
            "closed" => Some(StreamState::Closed),
            _ => None,
        }
    }

    pub fn is_closed(self) -> bool {
        self == StreamState::Closed
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_name())
    }
}
