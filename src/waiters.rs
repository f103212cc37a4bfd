//! One-shot completion handles for in-flight invocations.
//!
//! Every request/response invocation registers a [`Completable`] under its
//! invocation id before the request bytes hit the wire, so a response
//! racing the registration can never miss its waiter. The registry is the
//! single point of correlation: the reader takes a waiter out exactly once
//! (response, error response), or teardown drains whatever is left.
//!
//! Waiters are stored type-erased; the concrete [`TypedWaiter`] embeds the
//! decoder closure for the call's result type, so completing a waiter never
//! requires knowing its type.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{HubError, Result};

/// A type-erased one-shot completion handle.
///
/// Terminal transitions consume the waiter, so each one can fire at most
/// once; the registry's remove-on-lookup discipline guarantees at most one
/// party holds it.
pub(crate) trait Completable: Send {
    /// Decode `payload` and complete the waiter with the result.
    ///
    /// A decode failure completes the waiter with that error; it is never
    /// re-surfaced to the caller of `resolve`.
    fn resolve(self: Box<Self>, payload: &[u8]);

    /// Complete the waiter with an error.
    fn fail(self: Box<Self>, err: HubError);

    /// Complete the waiter as cancelled (channel shutting down).
    fn cancel(self: Box<Self>);
}

/// Concrete waiter for a call expecting a `U`-typed result.
pub(crate) struct TypedWaiter<U, D> {
    tx: oneshot::Sender<Result<U>>,
    decode: D,
}

impl<U, D> TypedWaiter<U, D>
where
    U: Send + 'static,
    D: FnOnce(&[u8]) -> Result<U> + Send + 'static,
{
    pub(crate) fn new(tx: oneshot::Sender<Result<U>>, decode: D) -> Self {
        Self { tx, decode }
    }
}

impl<U, D> Completable for TypedWaiter<U, D>
where
    U: Send + 'static,
    D: FnOnce(&[u8]) -> Result<U> + Send + 'static,
{
    fn resolve(self: Box<Self>, payload: &[u8]) {
        let Self { tx, decode } = *self;
        // send failure means the caller dropped the call future; nothing to do
        let _ = tx.send(decode(payload));
    }

    fn fail(self: Box<Self>, err: HubError) {
        let _ = self.tx.send(Err(err));
    }

    fn cancel(self: Box<Self>) {
        let _ = self.tx.send(Err(HubError::Cancelled));
    }
}

enum State {
    Open(HashMap<i32, Box<dyn Completable>>),
    Drained,
}

/// Concurrent map from invocation id to its pending waiter.
///
/// `take` and `drain` are atomic with respect to `insert`; once drained the
/// registry rejects further inserts, which closes the race between a late
/// caller and teardown.
pub(crate) struct WaiterRegistry {
    state: Mutex<State>,
}

impl WaiterRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Open(HashMap::new())),
        }
    }

    /// Register a waiter under a freshly allocated id.
    ///
    /// Returns the waiter back if the registry has already been drained, so
    /// the caller can fail it as disposed.
    pub(crate) fn insert(
        &self,
        id: i32,
        waiter: Box<dyn Completable>,
    ) -> std::result::Result<(), Box<dyn Completable>> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Open(map) => {
                let prev = map.insert(id, waiter);
                assert!(prev.is_none(), "waiter already registered for invocation {id}");
                Ok(())
            }
            State::Drained => Err(waiter),
        }
    }

    /// Atomically remove and return the waiter for `id`, if present.
    pub(crate) fn take(&self, id: i32) -> Option<Box<dyn Completable>> {
        match &mut *self.state.lock() {
            State::Open(map) => map.remove(&id),
            State::Drained => None,
        }
    }

    /// Empty the registry and close it to further inserts.
    ///
    /// Only teardown calls this; the returned waiters are cancelled there.
    pub(crate) fn drain(&self) -> Vec<Box<dyn Completable>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Drained) {
            State::Open(map) => map.into_values().collect(),
            State::Drained => Vec::new(),
        }
    }

    /// Number of outstanding waiters.
    pub(crate) fn len(&self) -> usize {
        match &*self.state.lock() {
            State::Open(map) => map.len(),
            State::Drained => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    fn typed_waiter<U>() -> (Box<dyn Completable>, oneshot::Receiver<Result<U>>)
    where
        U: serde::de::DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let waiter = TypedWaiter::new(tx, |bytes: &[u8]| MsgPackCodec::decode(bytes));
        (Box::new(waiter), rx)
    }

    #[tokio::test]
    async fn test_resolve_decodes_payload() {
        let (waiter, rx) = typed_waiter::<i32>();
        let payload = MsgPackCodec::encode(&5i32).unwrap();

        waiter.resolve(&payload);

        assert_eq!(rx.await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_resolve_decode_failure_completes_waiter() {
        let (waiter, rx) = typed_waiter::<String>();

        // an i32 payload cannot decode as String
        let payload = MsgPackCodec::encode(&5i32).unwrap();
        waiter.resolve(&payload);

        assert!(matches!(rx.await.unwrap(), Err(HubError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fail_and_cancel_are_terminal() {
        let (waiter, rx) = typed_waiter::<i32>();
        waiter.fail(HubError::Server("boom".into()));
        assert!(matches!(rx.await.unwrap(), Err(HubError::Server(m)) if m == "boom"));

        let (waiter, rx) = typed_waiter::<i32>();
        waiter.cancel();
        assert!(matches!(rx.await.unwrap(), Err(HubError::Cancelled)));
    }

    #[tokio::test]
    async fn test_take_returns_waiter_exactly_once() {
        let registry = WaiterRegistry::new();
        let (waiter, _rx) = typed_waiter::<i32>();

        registry.insert(1, waiter).ok().unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.take(1).is_some());
        assert!(registry.take(1).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_take_unknown_id_is_none() {
        let registry = WaiterRegistry::new();
        assert!(registry.take(99).is_none());
    }

    #[tokio::test]
    async fn test_drain_empties_and_closes() {
        let registry = WaiterRegistry::new();
        let (w1, rx1) = typed_waiter::<i32>();
        let (w2, rx2) = typed_waiter::<i32>();
        registry.insert(1, w1).ok().unwrap();
        registry.insert(2, w2).ok().unwrap();

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.len(), 0);

        for waiter in drained {
            waiter.cancel();
        }
        assert!(matches!(rx1.await.unwrap(), Err(HubError::Cancelled)));
        assert!(matches!(rx2.await.unwrap(), Err(HubError::Cancelled)));

        // a second drain is a no-op
        assert!(registry.drain().is_empty());
    }

    #[tokio::test]
    async fn test_insert_after_drain_rejected() {
        let registry = WaiterRegistry::new();
        let _ = registry.drain();

        let (waiter, rx) = typed_waiter::<i32>();
        let rejected = registry.insert(3, waiter).err().expect("insert must fail");
        rejected.fail(HubError::Disposed);

        assert!(matches!(rx.await.unwrap(), Err(HubError::Disposed)));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_dropping_waiter_closes_channel() {
        let (waiter, rx) = typed_waiter::<i32>();
        drop(waiter);
        assert!(rx.await.is_err());
    }
}
