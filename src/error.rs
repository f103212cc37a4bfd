//! Error types for hubwire-client.

use thiserror::Error;

/// Main error type for all hub channel operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// Operation attempted after `dispose()` began (or teardown completed).
    #[error("hub connection disposed")]
    Disposed,

    /// I/O error surfaced by the underlying duplex transport.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed envelope (bad array header, truncated frame, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// MsgPack serialization error for an outbound payload.
    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error for an inbound payload.
    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Error message carried in a response-error frame from the hub.
    #[error("server error: {0}")]
    Server(String),

    /// Invocation terminated because the channel is shutting down.
    #[error("invocation cancelled")]
    Cancelled,

    /// Broadcast arrived for a method id with no registered handler.
    #[error("no broadcast handler for method id {0}")]
    UnknownBroadcast(i32),

    /// `connect` called more than once on the same connection.
    #[error("connection already started")]
    AlreadyConnected,

    /// The per-channel invocation id counter wrapped around.
    ///
    /// The channel is effectively terminal at this point; callers should
    /// dispose it.
    #[error("invocation id space exhausted")]
    IdsExhausted,
}

/// Result type alias using HubError.
pub type Result<T> = std::result::Result<T, HubError>;
