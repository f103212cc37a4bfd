//! Protocol module - the binary envelope shared by all hub traffic.
//!
//! Every message on the duplex channel is one envelope: a small msgpack
//! array whose element count discriminates the shape, followed by an opaque
//! payload produced by the body codec. This module encodes the two
//! client-side shapes and decodes the three server-side shapes.

mod envelope;

pub use envelope::{decode_frame, encode_call, encode_notification, ServerFrame};
