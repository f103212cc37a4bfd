//! Length-prefixed message transport over a byte-stream pair.
//!
//! Each message is a 4-byte big-endian length followed by that many bytes.
//! Works over anything that splits into `AsyncRead`/`AsyncWrite` halves:
//! TCP or Unix sockets, `tokio::io::duplex` in tests.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use super::DuplexTransport;

/// Default maximum inbound message size (1 GiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1_073_741_824;

/// Duplex transport framing whole messages with a u32 length prefix.
///
/// Halves sit behind `tokio::sync::Mutex` so the [`DuplexTransport`]
/// methods can take `&self`; the connection serializes access anyway.
pub struct StreamTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    max_message_size: u32,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a read half and a write half with the default size limit.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_max_message_size(reader, writer, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Wrap halves with a custom inbound message size limit.
    pub fn with_max_message_size(reader: R, writer: W, max_message_size: u32) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            max_message_size,
        }
    }
}

impl<T> StreamTransport<ReadHalf<T>, WriteHalf<T>>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split a bidirectional stream and wrap both halves.
    pub fn from_io(io: T) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self::new(reader, writer)
    }
}

impl<R, W> DuplexTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: Bytes) -> io::Result<()> {
        if frame.len() > self.max_message_size as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "outbound message of {} bytes exceeds limit {}",
                    frame.len(),
                    self.max_message_size
                ),
            ));
        }

        let mut writer = self.writer.lock().await;
        writer.write_u32(frame.len() as u32).await?;
        writer.write_all(&frame).await?;
        writer.flush().await
    }

    async fn recv(&self) -> io::Result<Option<Bytes>> {
        let mut reader = self.reader.lock().await;

        // Read the first prefix byte separately so a clean close between
        // messages surfaces as end-of-stream, not as an error.
        let mut prefix = [0u8; 4];
        loop {
            let n = reader.read(&mut prefix[..1]).await?;
            if n == 0 {
                return Ok(None);
            }
            if n == 1 {
                break;
            }
        }
        reader.read_exact(&mut prefix[1..]).await?;

        let len = u32::from_be_bytes(prefix);
        if len > self.max_message_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "inbound message of {len} bytes exceeds limit {}",
                    self.max_message_size
                ),
            ));
        }

        let mut payload = BytesMut::zeroed(len as usize);
        reader.read_exact(&mut payload).await?;
        Ok(Some(payload.freeze()))
    }

    async fn complete(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (
        StreamTransport<ReadHalf<tokio::io::DuplexStream>, WriteHalf<tokio::io::DuplexStream>>,
        StreamTransport<ReadHalf<tokio::io::DuplexStream>, WriteHalf<tokio::io::DuplexStream>>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (StreamTransport::from_io(a), StreamTransport::from_io(b))
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let (a, b) = pair();

        a.send(Bytes::from_static(b"hello hub")).await.unwrap();

        let got = b.recv().await.unwrap().unwrap();
        assert_eq!(&got[..], b"hello hub");
    }

    #[tokio::test]
    async fn test_message_boundaries_preserved() {
        let (a, b) = pair();

        for i in 0u8..5 {
            a.send(Bytes::from(vec![i; (i as usize + 1) * 3])).await.unwrap();
        }

        for i in 0u8..5 {
            let got = b.recv().await.unwrap().unwrap();
            assert_eq!(&got[..], &vec![i; (i as usize + 1) * 3][..]);
        }
    }

    #[tokio::test]
    async fn test_empty_message_roundtrip() {
        let (a, b) = pair();

        a.send(Bytes::new()).await.unwrap();

        let got = b.recv().await.unwrap().unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_peer_drop_is_clean_end_of_stream() {
        let (a, b) = pair();
        drop(b);
        assert!(a.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_half_closes() {
        let (a, b) = pair();

        a.send(Bytes::from_static(b"last")).await.unwrap();
        a.complete().await.unwrap();

        // peer drains the message, then sees end of stream
        assert_eq!(&b.recv().await.unwrap().unwrap()[..], b"last");
        assert!(b.recv().await.unwrap().is_none());

        // receive half of `a` is still usable
        b.send(Bytes::from_static(b"back")).await.unwrap();
        assert_eq!(&a.recv().await.unwrap().unwrap()[..], b"back");
    }

    #[tokio::test]
    async fn test_oversized_inbound_rejected() {
        let (a, b) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(a);
        let transport = StreamTransport::with_max_message_size(reader, writer, 16);

        // peer claims a 1000-byte message
        let (_peer_read, mut peer_write) = tokio::io::split(b);
        peer_write.write_u32(1000).await.unwrap();

        let err = transport.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_oversized_outbound_rejected() {
        let (a, _b) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(a);
        let transport = StreamTransport::with_max_message_size(reader, writer, 16);

        let err = transport.send(Bytes::from(vec![0u8; 64])).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_an_error() {
        let (a, b) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(a);
        let transport = StreamTransport::new(reader, writer);

        // two prefix bytes, then close
        let (_peer_read, mut peer_write) = tokio::io::split(b);
        peer_write.write_all(&[0, 0]).await.unwrap();
        peer_write.shutdown().await.unwrap();

        let err = transport.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
