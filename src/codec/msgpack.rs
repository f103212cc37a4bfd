//! MsgPack codec using `rmp-serde`.
//!
//! Hub message bodies are positional MessagePack: structs serialize as
//! arrays, matching the compact convention hub servers expect. This is
//! `rmp_serde::to_vec`, not `to_vec_named` - switching to the map format
//! changes the wire contract for every method.
//!
//! # Example
//!
//! ```
//! use hubwire_client::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Join {
//!     room: String,
//!     user: String,
//! }
//!
//! let msg = Join { room: "lobby".to_string(), user: "ada".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Join = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::Result;

/// MessagePack codec for hub payload bodies.
///
/// Serializes structs positionally (as arrays). The connection's typed
/// operations use this codec; the `*_raw` operations bypass it for callers
/// that bring their own bytes.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
