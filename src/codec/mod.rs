//! Codec module - serialization/deserialization for payload bodies.
//!
//! The envelope (see [`crate::protocol`]) carries payloads as opaque byte
//! slices; this module is what turns typed messages into those bytes.
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! which keeps codec selection a compile-time decision.

mod msgpack;

pub use msgpack::MsgPackCodec;
