//! # hubwire-client
//!
//! Client for bidirectional streaming RPC hubs.
//!
//! A hub connection is one long-lived duplex channel multiplexing two kinds
//! of traffic in each direction: client invocations going up (fire-and-forget
//! notifications and correlated calls) and server traffic coming down (call
//! responses and broadcasts pushed to a receiver).
//!
//! ## Architecture
//!
//! - **Envelope** ([`protocol`]): a compact msgpack array shared by all
//!   message shapes, discriminated by its element count.
//! - **Connection** ([`HubConnection`]): allocates invocation ids, keeps a
//!   registry of pending waiters, serializes writes, and runs a single
//!   background reader task that demultiplexes the receive half.
//! - **Receiver** ([`ReceiverRegistry`]): table from broadcast method id to
//!   typed async handler, invoked from the reader task.
//! - **Transport** ([`DuplexTransport`]): the byte-stream seam;
//!   [`StreamTransport`] covers anything that splits into
//!   `AsyncRead`/`AsyncWrite` halves.
//!
//! ## Example
//!
//! ```ignore
//! use hubwire_client::{HubConnection, ReceiverRegistry, StreamTransport};
//!
//! #[tokio::main]
//! async fn main() -> hubwire_client::Result<()> {
//!     let socket = tokio::net::TcpStream::connect("127.0.0.1:5000").await?;
//!
//!     let receiver = ReceiverRegistry::new()
//!         .on(10, |msg: String| async move {
//!             println!("broadcast: {msg}");
//!             Ok(())
//!         });
//!
//!     let hub = HubConnection::start(StreamTransport::from_io(socket), receiver);
//!
//!     let sum: i64 = hub.call(1, &(2i64, 3i64)).await?;
//!     assert_eq!(sum, 5);
//!
//!     hub.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod transport;

mod connection;
mod waiters;

pub use connection::HubConnection;
pub use error::{HubError, Result};
pub use receiver::{BroadcastReceiver, ReceiverRegistry};
pub use transport::{DuplexTransport, StreamTransport};
