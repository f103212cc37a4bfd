//! Broadcast dispatch - routing server-initiated messages to typed handlers.
//!
//! The hub pushes broadcasts (messages not tied to any invocation) down the
//! same channel as call responses. The reader task hands each one to a
//! [`BroadcastReceiver`]; [`ReceiverRegistry`] is the standard
//! implementation, a table from method id to a typed async handler. Service
//! stubs populate the table the same way application code does.
//!
//! # Example
//!
//! ```ignore
//! use hubwire_client::receiver::ReceiverRegistry;
//!
//! let receiver = ReceiverRegistry::new()
//!     .on(10, |msg: ChatMessage| async move {
//!         println!("{}: {}", msg.user, msg.body);
//!         Ok(())
//!     })
//!     .on(11, |_: UserLeft| async move { Ok(()) });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;

use crate::codec::MsgPackCodec;
use crate::error::{HubError, Result};

/// Boxed future for broadcast handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receiver of server-initiated broadcasts.
///
/// Invoked from the reader task, which awaits the returned future before
/// reading the next frame; a handler that blocks indefinitely starves the
/// whole channel. Errors are logged by the reader and do not terminate the
/// channel.
pub trait BroadcastReceiver: Send + 'static {
    /// Handle one broadcast with raw payload bytes.
    fn invoke<'a>(&'a self, method_id: i32, payload: &'a [u8]) -> BoxFuture<'a, Result<()>>;
}

/// Receiver that ignores all broadcasts, for call-only clients.
impl BroadcastReceiver for () {
    fn invoke<'a>(&'a self, method_id: i32, _payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        tracing::trace!(method_id, "broadcast ignored by unit receiver");
        Box::pin(async { Ok(()) })
    }
}

/// Type-erased broadcast handler.
trait BroadcastHandler: Send + Sync {
    fn call<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<()>>;
}

/// Wrapper that deserializes the payload before calling the handler.
struct TypedBroadcastHandler<F, T, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> BroadcastHandler for TypedBroadcastHandler<F, T, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        let parsed: T = match MsgPackCodec::decode(payload) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed))
    }
}

/// Table from method id to typed broadcast handler.
pub struct ReceiverRegistry {
    handlers: HashMap<i32, Box<dyn BroadcastHandler>>,
}

impl ReceiverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a broadcast method id.
    ///
    /// The handler receives the deserialized payload.
    ///
    /// # Panics
    ///
    /// Panics if a handler is already registered for `method_id`.
    pub fn on<F, T, Fut>(mut self, method_id: i32, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let prev = self.handlers.insert(
            method_id,
            Box::new(TypedBroadcastHandler {
                handler,
                _phantom: PhantomData,
            }),
        );
        assert!(
            prev.is_none(),
            "broadcast handler already registered for method id {method_id}"
        );
        self
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for ReceiverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastReceiver for ReceiverRegistry {
    fn invoke<'a>(&'a self, method_id: i32, payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        match self.handlers.get(&method_id) {
            Some(handler) => handler.call(payload),
            None => Box::pin(async move { Err(HubError::UnknownBroadcast(method_id)) }),
        }
    }
}
