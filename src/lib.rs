//! # worker-bridge
//!
//! A typed RPC bridge over a bidirectional message channel: main-side call
//! sites invoke named procedures on pooled workers, procedures and call
//! sites alike can pass callables as arguments and have them invoked back
//! across the same channel, and a [`pool::WorkerPool`] schedules calls across
//! a bounded set of worker slots.
//!
//! Transport is pluggable (see [`transport`]); worker process instantiation,
//! procedure bodies, and packaging are left to the embedder, matching the
//! bridge's own scope: it owns marshaling, scheduling, and the per-call state
//! machine, nothing else.

pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod procedure;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod value;
pub mod worker;

pub mod cli;

pub use dispatcher::{CallbackProxy, Dispatcher};
pub use error::BridgeError;
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use procedure::{Procedure, ProcedureMap, ProcedureMapBuilder};
pub use protocol::{Envelope, RequestId};
pub use registry::CallbackRegistry;
pub use transport::{EndpointHalves, EndpointReceiver, EndpointSender};
pub use value::{Arg, Callback, Value};
pub use worker::{init_worker, WorkerHandle};

/// Convenience entry point for building a pool without naming
/// [`WorkerPoolBuilder`] directly.
pub fn create_pool<F, Fut>(limit: usize, launcher: F) -> std::sync::Arc<WorkerPool>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<EndpointHalves, BridgeError>> + Send + 'static,
{
    WorkerPool::new(limit, launcher)
}

/// The current version of the bridge.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values for the `bridge-demo` binary.
pub mod defaults {
    /// Default worker pool size.
    pub const POOL_SIZE: usize = 4;

    /// Default directory for the daily rolling diagnostic log file.
    pub const LOG_DIR: &str = "logs";
}
