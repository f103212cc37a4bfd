//! Hub connection - the client-side multiplexer.
//!
//! One [`HubConnection`] owns one duplex channel to the hub and multiplexes
//! everything over it:
//!
//! - callers issue notifications (fire-and-forget) and calls
//!   (request/response, correlated by invocation id) from any task;
//! - a single background reader task consumes the receive half, completing
//!   the waiter registered for each response and handing broadcasts to the
//!   [`BroadcastReceiver`];
//! - teardown fails every outstanding waiter exactly once and publishes the
//!   disconnect signal, whichever side closes the channel first.
//!
//! # Example
//!
//! ```ignore
//! use hubwire_client::{HubConnection, ReceiverRegistry, StreamTransport};
//!
//! let socket = tokio::net::TcpStream::connect(addr).await?;
//! let receiver = ReceiverRegistry::new()
//!     .on(10, |msg: ChatMessage| async move { /* ... */ Ok(()) });
//!
//! let hub = HubConnection::start(StreamTransport::from_io(socket), receiver);
//!
//! let roster: Vec<String> = hub.call(1, &("lobby", "ada")).await?;
//! hub.notify(2, &"typing...").await?;
//!
//! hub.dispose().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::codec::MsgPackCodec;
use crate::error::{HubError, Result};
use crate::protocol::{self, ServerFrame};
use crate::receiver::BroadcastReceiver;
use crate::transport::DuplexTransport;
use crate::waiters::{TypedWaiter, WaiterRegistry};

/// A connection to a streaming RPC hub.
///
/// Created in two phases so callers can hold the connection before traffic
/// starts flowing: [`HubConnection::new`] builds it, [`connect`] binds the
/// receiver and launches the reader task. [`start`] does both in one step.
///
/// All operations take `&self`; the connection is designed to live in an
/// [`Arc`] shared across caller tasks. Once disposed it stays disposed -
/// every subsequent operation fails with [`HubError::Disposed`].
///
/// [`connect`]: HubConnection::connect
/// [`start`]: HubConnection::start
pub struct HubConnection<T> {
    transport: T,
    waiters: WaiterRegistry,
    next_invocation_id: AtomicI32,
    disposed: AtomicBool,
    connected: AtomicBool,
    /// Tells the reader task to stop consuming the receive half.
    cancel: watch::Sender<bool>,
    /// Published exactly once, after teardown has drained all waiters.
    disconnected: watch::Sender<bool>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Serializes writes to the transport's send half.
    write_gate: Mutex<()>,
}

impl<T: DuplexTransport> HubConnection<T> {
    /// Create a connection over an already-open duplex channel.
    ///
    /// No traffic flows until [`connect`](HubConnection::connect) is called.
    pub fn new(transport: T) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        let (disconnected, _) = watch::channel(false);
        Arc::new(Self {
            transport,
            waiters: WaiterRegistry::new(),
            next_invocation_id: AtomicI32::new(0),
            disposed: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            cancel,
            disconnected,
            reader: parking_lot::Mutex::new(None),
            write_gate: Mutex::new(()),
        })
    }

    /// Create a connection and immediately start it.
    pub fn start<R: BroadcastReceiver + Sync>(transport: T, receiver: R) -> Arc<Self> {
        let conn = Self::new(transport);
        conn.connect(receiver)
            .expect("a freshly created connection cannot be already started");
        conn
    }

    /// Bind the broadcast receiver and launch the reader task.
    ///
    /// Not reentrant: a second call fails with
    /// [`HubError::AlreadyConnected`].
    pub fn connect<R: BroadcastReceiver + Sync>(self: &Arc<Self>, receiver: R) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(HubError::Disposed);
        }
        if self.connected.swap(true, Ordering::AcqRel) {
            return Err(HubError::AlreadyConnected);
        }

        let handle = tokio::spawn(self.clone().run(receiver));
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    /// Send a fire-and-forget invocation.
    ///
    /// Resolves once the transport has accepted the frame; the hub sends no
    /// response.
    pub async fn notify<Req>(&self, method_id: i32, message: &Req) -> Result<()>
    where
        Req: Serialize,
    {
        let payload = MsgPackCodec::encode(message)?;
        self.notify_raw(method_id, &payload).await
    }

    /// Send a fire-and-forget invocation with a pre-encoded payload.
    pub async fn notify_raw(&self, method_id: i32, payload: &[u8]) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(HubError::Disposed);
        }

        let mut frame = Vec::with_capacity(payload.len() + 8);
        protocol::encode_notification(&mut frame, method_id, payload);

        let _gate = self.write_gate.lock().await;
        self.transport.send(Bytes::from(frame)).await?;
        Ok(())
    }

    /// Send a request/response invocation and await its typed result.
    ///
    /// Responses to concurrent calls may complete in any order. Dropping
    /// the returned future before completion discards the invocation (the
    /// hub may still process it; any late response is dropped).
    pub async fn call<Req, Resp>(&self, method_id: i32, message: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
    {
        let payload = MsgPackCodec::encode(message)?;
        self.call_raw(method_id, &payload, |bytes| MsgPackCodec::decode(bytes))
            .await
    }

    /// Send a request/response invocation with a pre-encoded payload and a
    /// caller-supplied result decoder.
    ///
    /// This is the seam generated service stubs build on: the decoder runs
    /// on the reader task when the response arrives, and a decoder error
    /// fails this call with that error.
    pub async fn call_raw<Resp, D>(&self, method_id: i32, payload: &[u8], decode: D) -> Result<Resp>
    where
        Resp: Send + 'static,
        D: FnOnce(&[u8]) -> Result<Resp> + Send + 'static,
    {
        if self.disposed.load(Ordering::Acquire) {
            return Err(HubError::Disposed);
        }

        let invocation_id = self.alloc_invocation_id()?;
        let (tx, rx) = oneshot::channel();

        // The waiter must be registered before the frame can reach the
        // wire: the response may race the write's completion.
        let waiter = Box::new(TypedWaiter::new(tx, decode));
        if self.waiters.insert(invocation_id, waiter).is_err() {
            // teardown drained the registry between the disposed check and here
            return Err(HubError::Disposed);
        }
        let mut guard = PendingGuard {
            waiters: &self.waiters,
            invocation_id,
            active: true,
        };

        let mut frame = Vec::with_capacity(payload.len() + 16);
        protocol::encode_call(&mut frame, invocation_id, method_id, payload);

        {
            let _gate = self.write_gate.lock().await;
            // a failed write returns the error here and the guard removes
            // the waiter on the way out
            self.transport.send(Bytes::from(frame)).await?;
        }

        let result = match rx.await {
            Ok(result) => result,
            // waiter dropped without a terminal transition
            Err(_) => Err(HubError::Cancelled),
        };
        guard.disarm();
        result
    }

    /// Resolves once teardown has completed and the channel is dead.
    ///
    /// Any number of observers may wait; late observers resolve
    /// immediately.
    pub async fn wait_for_disconnect(&self) {
        let mut rx = self.disconnected.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Tear the connection down and wait until it is fully dead.
    ///
    /// Idempotent: every concurrent and repeated call resolves after the
    /// reader task has exited and all outstanding invocations have been
    /// cancelled. Must not be awaited from inside a broadcast handler (the
    /// handler runs on the reader task this waits for); spawn it instead.
    pub async fn dispose(&self) {
        self.teardown(true).await;
        self.wait_for_disconnect().await;
    }

    /// Number of invocations currently awaiting a response.
    pub fn pending_invocations(&self) -> usize {
        self.waiters.len()
    }

    fn alloc_invocation_id(&self) -> Result<i32> {
        // pre-increment: first id handed out is 1
        let id = self
            .next_invocation_id
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        if id <= 0 {
            return Err(HubError::IdsExhausted);
        }
        Ok(id)
    }

    /// Reader task: sole consumer of the transport's receive half.
    async fn run<R: BroadcastReceiver + Sync>(self: Arc<Self>, receiver: R) {
        let mut cancel = self.cancel.subscribe();
        loop {
            let next = tokio::select! {
                _ = cancel.wait_for(|stop| *stop) => break,
                next = self.transport.recv() => next,
            };
            match next {
                Ok(Some(frame)) => self.dispatch(&frame, &receiver).await,
                Ok(None) => {
                    tracing::debug!("hub closed the channel");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "transport read failed");
                    break;
                }
            }
        }
        // the reader must not await itself
        self.teardown(false).await;
    }

    /// Route one inbound frame. A malformed or unroutable frame never kills
    /// the channel.
    async fn dispatch<R: BroadcastReceiver + Sync>(&self, bytes: &[u8], receiver: &R) {
        match protocol::decode_frame(bytes) {
            Ok(ServerFrame::Response {
                invocation_id,
                method_id,
                payload,
            }) => match self.waiters.take(invocation_id) {
                Some(waiter) => waiter.resolve(payload),
                None => tracing::debug!(
                    invocation_id,
                    method_id,
                    "dropping response for unknown invocation"
                ),
            },
            Ok(ServerFrame::ResponseError {
                invocation_id,
                message,
            }) => match self.waiters.take(invocation_id) {
                Some(waiter) => waiter.fail(HubError::Server(message.to_owned())),
                None => tracing::debug!(
                    invocation_id,
                    "dropping error response for unknown invocation"
                ),
            },
            Ok(ServerFrame::Broadcast { method_id, payload }) => {
                if let Err(e) = receiver.invoke(method_id, payload).await {
                    tracing::warn!(method_id, error = %e, "broadcast receiver failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "skipping malformed frame"),
        }
    }

    /// Idempotent teardown. `wait_for_reader` is false on the reader's own
    /// exit path and true from `dispose`.
    async fn teardown(&self, wait_for_reader: bool) {
        // the flag flips before the half-close completes, so racing callers
        // fail fast with Disposed
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(wait_for_reader, "tearing down hub connection");

        if let Err(e) = self.transport.complete().await {
            tracing::debug!(error = %e, "request stream half-close failed");
        }

        let _ = self.cancel.send(true);

        if wait_for_reader {
            let handle = self.reader.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }

        let drained = self.waiters.drain();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "cancelling outstanding invocations");
        }
        for waiter in drained {
            waiter.cancel();
        }

        self.disconnected.send_replace(true);
    }
}

/// Removes a registered waiter when a call leaves without a terminal
/// outcome: a failed write, or the caller dropping the call future.
struct PendingGuard<'a> {
    waiters: &'a WaiterRegistry,
    invocation_id: i32,
    active: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.active = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if self.waiters.take(self.invocation_id).is_some() {
            tracing::debug!(
                invocation_id = self.invocation_id,
                "call abandoned: removed pending waiter"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use tokio::io::{ReadHalf, WriteHalf};

    type TestTransport =
        StreamTransport<ReadHalf<tokio::io::DuplexStream>, WriteHalf<tokio::io::DuplexStream>>;

    fn transport_pair() -> (TestTransport, TestTransport) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (StreamTransport::from_io(a), StreamTransport::from_io(b))
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (transport, _peer) = transport_pair();
        let conn = HubConnection::new(transport);

        conn.connect(()).unwrap();
        assert!(matches!(conn.connect(()), Err(HubError::AlreadyConnected)));

        conn.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_without_connect() {
        let (transport, _peer) = transport_pair();
        let conn = HubConnection::new(transport);

        conn.dispose().await;
        conn.wait_for_disconnect().await;

        assert!(matches!(
            conn.call::<_, i32>(1, &()).await,
            Err(HubError::Disposed)
        ));
        assert!(matches!(conn.notify(1, &()).await, Err(HubError::Disposed)));
        assert!(matches!(conn.connect(()), Err(HubError::Disposed)));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (transport, _peer) = transport_pair();
        let conn = HubConnection::start(transport, ());

        conn.dispose().await;
        conn.dispose().await;
        conn.wait_for_disconnect().await;
    }

    #[tokio::test]
    async fn test_invocation_ids_start_at_one_and_increase() {
        let (transport, _peer) = transport_pair();
        let conn = HubConnection::new(transport);

        let ids: Vec<i32> = (0..5).map(|_| conn.alloc_invocation_id().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_id_space_exhaustion_is_terminal() {
        let (transport, _peer) = transport_pair();
        let conn = HubConnection::new(transport);

        conn.next_invocation_id.store(i32::MAX, Ordering::Relaxed);
        assert!(matches!(
            conn.alloc_invocation_id(),
            Err(HubError::IdsExhausted)
        ));
    }

    #[tokio::test]
    async fn test_pending_invocations_counts_outstanding() {
        let (transport, peer) = transport_pair();
        let conn = HubConnection::start(transport, ());
        assert_eq!(conn.pending_invocations(), 0);

        let call_conn = conn.clone();
        let call = tokio::spawn(async move { call_conn.call::<_, i32>(7, &1i32).await });

        // the request reaching the peer means the waiter is registered
        let _ = peer.recv().await.unwrap();
        assert_eq!(conn.pending_invocations(), 1);

        drop(peer);
        let result = call.await.unwrap();
        assert!(matches!(result, Err(HubError::Cancelled)));
        assert_eq!(conn.pending_invocations(), 0);
    }

    #[tokio::test]
    async fn test_dropped_call_future_removes_waiter() {
        let (transport, _peer) = transport_pair();
        let conn = HubConnection::start(transport, ());

        let call_conn = conn.clone();
        let call = tokio::spawn(async move {
            let _: Result<i32> = call_conn.call(7, &1i32).await;
        });

        while conn.pending_invocations() == 0 {
            tokio::task::yield_now().await;
        }

        call.abort();
        let _ = call.await;

        assert_eq!(conn.pending_invocations(), 0);
        conn.dispose().await;
    }
}
