//! Transport module - the duplex byte-stream carrier under a hub connection.
//!
//! The connection core never touches sockets directly; it drives a
//! [`DuplexTransport`], which models one logical channel with an ordered
//! send half and an ordered receive half (an HTTP/2 stream, a socket, an
//! in-memory pipe). [`StreamTransport`] is the stock implementation over
//! any `AsyncRead`/`AsyncWrite` pair.

use std::future::Future;
use std::io;

use bytes::Bytes;

mod stream;

pub use stream::{StreamTransport, DEFAULT_MAX_MESSAGE_SIZE};

/// One logical duplex channel carrying whole messages in each direction.
///
/// All methods take `&self`; implementations provide their own interior
/// mutability. The connection guarantees single-reader discipline on
/// `recv` (only the reader task calls it) and serializes `send` calls
/// behind its write gate.
pub trait DuplexTransport: Send + Sync + 'static {
    /// Write one complete message to the send half.
    ///
    /// Resolves once the transport has accepted the message.
    fn send(&self, frame: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Receive the next complete message from the receive half.
    ///
    /// `Ok(None)` means the peer closed its send side cleanly.
    fn recv(&self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;

    /// Half-close the send half; the receive half stays usable.
    fn complete(&self) -> impl Future<Output = io::Result<()>> + Send;
}
