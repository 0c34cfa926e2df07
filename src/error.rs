//! # Error Taxonomy
//!
//! This module defines the typed error surface for the RPC bridge. Unlike the
//! top-level demo binary, which stays on `anyhow` for convenience, library
//! code here uses a `thiserror`-derived enum so embedders can match on
//! specific failure modes (a remote procedure error is recoverable in a way
//! a codec error is not).

use thiserror::Error;

/// Errors surfaced by the RPC bridge's dispatcher, pool, and transport layers.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A worker-side procedure raised an error. The payload is the stringified
    /// exception, matching the wire protocol's `Error` variant, which never
    /// preserves structured error objects across the message boundary.
    #[error("remote procedure error: {0}")]
    Remote(String),

    /// A callback invoked via a proxy failed on the remote side. Only produced
    /// when the pool was constructed with `WorkerPool::with_callback_errors`;
    /// by default a callback failure is logged and the invocation never settles.
    #[error("callback error: {0}")]
    CallbackFailed(String),

    /// The pool's endpoint for this call was torn down by `close()` or
    /// `set_limit()` while the call was in flight.
    #[error("worker pool was reset while this call was in flight")]
    PoolReset,

    /// A transport or worker endpoint could not be constructed or failed its
    /// startup handshake.
    #[error("startup failure: {0}")]
    Startup(String),

    /// A transport-level I/O failure (framed stream read/write, connect, bind).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Marshaling or unmarshaling failed to encode/decode an envelope.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// A configuration value (pool size, procedure name, builder) was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The dispatcher's background read loop ended (peer closed, channel
    /// dropped) while a caller was still awaiting a response.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}
