//! Envelope encoding and decoding.
//!
//! Wire shapes, discriminated by the leading array header:
//!
//! ```text
//! call          [invocation_id: int, method_id: int, payload]   array(3), client -> server
//! notification  [method_id: int, payload]                       array(2), client -> server
//! response ok   [invocation_id: int, method_id: int, payload]   array(3), server -> client
//! response err  [invocation_id: int, nil, message: str]         array(3), server -> client
//! broadcast     [method_id: int, payload]                       array(2), server -> client
//! ```
//!
//! Integers use the minimal msgpack representation; the payload is appended
//! as raw bytes (it is already a complete msgpack value produced by the
//! body codec). Decoded payloads borrow from the input buffer, so they must
//! be consumed before the buffer is reused.

use crate::error::{HubError, Result};

/// A decoded server-to-client envelope.
///
/// Payload slices borrow from the buffer handed to [`decode_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFrame<'a> {
    /// Successful completion of the invocation identified by `invocation_id`.
    Response {
        invocation_id: i32,
        method_id: i32,
        payload: &'a [u8],
    },
    /// Failed completion; the second array slot carries the nil sentinel.
    ResponseError {
        invocation_id: i32,
        message: &'a str,
    },
    /// Server-initiated message not tied to any invocation.
    Broadcast { method_id: i32, payload: &'a [u8] },
}

/// Encode a request/response invocation: `[invocation_id, method_id, payload]`.
///
/// Appends to `buf` and returns the number of bytes written.
pub fn encode_call(buf: &mut Vec<u8>, invocation_id: i32, method_id: i32, payload: &[u8]) -> usize {
    let start = buf.len();
    rmp::encode::write_array_len(buf, 3).expect("writing to a Vec cannot fail");
    rmp::encode::write_sint(buf, i64::from(invocation_id)).expect("writing to a Vec cannot fail");
    rmp::encode::write_sint(buf, i64::from(method_id)).expect("writing to a Vec cannot fail");
    buf.extend_from_slice(payload);
    buf.len() - start
}

/// Encode a fire-and-forget invocation: `[method_id, payload]`.
///
/// Appends to `buf` and returns the number of bytes written.
pub fn encode_notification(buf: &mut Vec<u8>, method_id: i32, payload: &[u8]) -> usize {
    let start = buf.len();
    rmp::encode::write_array_len(buf, 2).expect("writing to a Vec cannot fail");
    rmp::encode::write_sint(buf, i64::from(method_id)).expect("writing to a Vec cannot fail");
    buf.extend_from_slice(payload);
    buf.len() - start
}

/// Decode one server-to-client envelope.
///
/// # Errors
///
/// Returns [`HubError::Protocol`] for anything that is not one of the three
/// server shapes: wrong element count, non-integer id slots, a truncated
/// buffer, or a non-utf8 error message.
pub fn decode_frame(bytes: &[u8]) -> Result<ServerFrame<'_>> {
    let mut rd = bytes;

    let len = rmp::decode::read_array_len(&mut rd)
        .map_err(|e| HubError::Protocol(format!("invalid envelope header: {e}")))?;

    match len {
        3 => {
            let invocation_id = read_i32(&mut rd, "invocation id")?;

            // nil in the method slot selects the error-response shape
            let is_nil = rd
                .first()
                .is_some_and(|&b| matches!(rmp::Marker::from_u8(b), rmp::Marker::Null));
            if is_nil {
                rmp::decode::read_nil(&mut rd)
                    .map_err(|e| HubError::Protocol(format!("invalid nil sentinel: {e}")))?;
                let message = read_str(&mut rd)?;
                Ok(ServerFrame::ResponseError {
                    invocation_id,
                    message,
                })
            } else {
                let method_id = read_i32(&mut rd, "method id")?;
                Ok(ServerFrame::Response {
                    invocation_id,
                    method_id,
                    payload: rd,
                })
            }
        }
        2 => {
            let method_id = read_i32(&mut rd, "method id")?;
            Ok(ServerFrame::Broadcast {
                method_id,
                payload: rd,
            })
        }
        other => Err(HubError::Protocol(format!(
            "unsupported envelope element count {other}"
        ))),
    }
}

fn read_i32(rd: &mut &[u8], field: &str) -> Result<i32> {
    rmp::decode::read_int(rd).map_err(|e| HubError::Protocol(format!("invalid {field}: {e}")))
}

/// Read a msgpack string, borrowing its bytes from the input.
fn read_str<'a>(rd: &mut &'a [u8]) -> Result<&'a str> {
    let len = rmp::decode::read_str_len(rd)
        .map_err(|e| HubError::Protocol(format!("invalid error message header: {e}")))? as usize;
    if rd.len() < len {
        return Err(HubError::Protocol(format!(
            "truncated error message: need {len} bytes, have {}",
            rd.len()
        )));
    }
    let (raw, rest) = rd.split_at(len);
    *rd = rest;
    std::str::from_utf8(raw)
        .map_err(|e| HubError::Protocol(format!("error message is not utf-8: {e}")))
}
