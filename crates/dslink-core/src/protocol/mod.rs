//! Protocol module containing the envelope type, the wire codecs, and the
//! message-id counter.

pub mod codec;
pub mod envelope;
pub mod sequence;

pub use codec::{decode_envelope, encode_envelope, CodecError, EnvelopeCodec, WireFormat};
pub use envelope::{Envelope, Payload};
pub use sequence::MessageIdCounter;
