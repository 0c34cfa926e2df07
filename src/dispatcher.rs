//! # Call Dispatcher
//!
//! One [`Dispatcher`] owns one transport endpoint (whichever side of the
//! bridge it sits on) and runs a single background read loop that routes
//! every incoming [`Envelope`] to whoever is waiting on it: a pending
//! top-level call, a pending callback invocation, or, on the side that
//! exposes procedures, a freshly spawned task running that procedure's body.
//!
//! The dispatcher is deliberately symmetric: the same type handles both the
//! main side (which originates `Function` calls and answers `CallbackCall`)
//! and the worker side (which answers `Function` and originates
//! `CallbackCall`), since the wire protocol itself is symmetric about which
//! side calls which.

use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::procedure::ProcedureMap;
use crate::protocol::{Envelope, RequestId};
use crate::registry::CallbackRegistry;
use crate::transport::{EndpointReceiver, EndpointSender};
use crate::value::{marshal, unmarshal, Arg, Callback, Value};

type Settlement = Result<Value, BridgeError>;

/// Correlates a settling envelope (`Result`/`Error` by request id,
/// `CallbackResult`/`CallbackError` by call id) to the oneshot sender the
/// matching call site is awaiting on. Generic over the key type since the
/// two tables a [`Dispatcher`] keeps are keyed differently: `pending_calls`
/// by the monotonic [`RequestId`] counter, `pending_callback_calls` by a
/// minted call-id token.
struct PendingTable<K> {
    waiters: Mutex<HashMap<K, oneshot::Sender<Settlement>>>,
}

impl<K: Eq + Hash> PendingTable<K> {
    fn new() -> Self {
        PendingTable {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: K, tx: oneshot::Sender<Settlement>) {
        self.waiters.lock().expect("pending table poisoned").insert(id, tx);
    }

    fn settle(&self, id: K, outcome: Settlement) {
        if let Some(tx) = self.waiters.lock().expect("pending table poisoned").remove(&id) {
            let _ = tx.send(outcome);
        }
    }

    fn abandon_all(&self, make_err: impl Fn() -> BridgeError) {
        let mut waiters = self.waiters.lock().expect("pending table poisoned");
        for (_, tx) in waiters.drain() {
            let _ = tx.send(Err(make_err()));
        }
    }
}

/// Mint a fresh call-id token for a `CallbackCall`, consistent with
/// `registry.rs`'s own token minting.
fn mint_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Routes envelopes for one endpoint of the bridge. Shared via `Arc` between
/// the background read loop, call sites awaiting responses, and any
/// [`CallbackProxy`] created for callables this side received.
pub struct Dispatcher {
    sender: Box<dyn EndpointSender>,
    registry: CallbackRegistry,
    procedures: Option<ProcedureMap>,
    pending_calls: PendingTable<RequestId>,
    pending_callback_calls: PendingTable<String>,
    next_id: AtomicU64,
    callback_errors: bool,
    ready: Notify,
    ready_flag: AtomicBool,
    closed: AtomicBool,
    shutdown: Notify,
}

impl Dispatcher {
    /// Construct a dispatcher over an already-connected endpoint and spawn
    /// its background read loop. `procedures` is `None` on a side that only
    /// originates calls; `callback_errors` mirrors
    /// [`crate::pool::WorkerPool::with_callback_errors`].
    pub fn spawn(
        sender: Box<dyn EndpointSender>,
        receiver: Box<dyn EndpointReceiver>,
        procedures: Option<ProcedureMap>,
        callback_errors: bool,
    ) -> Arc<Dispatcher> {
        let dispatcher = Arc::new(Dispatcher {
            sender,
            registry: CallbackRegistry::new(),
            procedures,
            pending_calls: PendingTable::new(),
            pending_callback_calls: PendingTable::new(),
            next_id: AtomicU64::new(1),
            callback_errors,
            ready: Notify::new(),
            ready_flag: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        });
        let loop_dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            loop_dispatcher.run(receiver).await;
        });
        dispatcher
    }

    fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Emit the startup `Ready` envelope. Called once, immediately after a
    /// worker has installed its procedure map and is able to answer calls.
    pub async fn announce_ready(&self) -> Result<(), BridgeError> {
        self.sender.send(Envelope::Ready).await
    }

    /// Whether a `Ready` envelope has already arrived from the peer.
    pub fn is_ready(&self) -> bool {
        self.ready_flag.load(Ordering::Acquire)
    }

    /// Block until the peer's `Ready` envelope arrives. Intentionally has no
    /// timeout; a worker that never starts leaves its caller waiting forever,
    /// matching the bridge's position that timeouts are a caller concern.
    pub async fn wait_ready(&self) {
        if self.is_ready() {
            return;
        }
        loop {
            let notified = self.ready.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
            if self.is_ready() {
                return;
            }
        }
    }

    /// Invoke a named procedure on the peer and await its result.
    pub fn call(self: &Arc<Self>, procedure: &str, args: Vec<Arg>) -> CallFuture {
        let id = self.next_id();
        let mut transferables = Vec::new();
        let values: Vec<Value> = args
            .into_iter()
            .map(|arg| marshal(arg, id, &self.registry, &mut transferables))
            .collect();
        if !transferables.is_empty() {
            trace!(request_id = id, bytes = ?transferables, "marshaled raw buffers");
        }

        let (tx, rx) = oneshot::channel();
        self.pending_calls.insert(id, tx);

        let dispatcher = self.clone();
        let envelope = Envelope::Function {
            id,
            procedure: procedure.to_string(),
            args: values,
        };
        CallFuture {
            dispatcher,
            id,
            send: Some(envelope),
            rx,
        }
    }

    fn make_proxy_fn(self: &Arc<Self>) -> impl Fn(RequestId, String) -> Arc<dyn Callback> {
        let dispatcher = self.clone();
        move |request_id, token| -> Arc<dyn Callback> {
            Arc::new(CallbackProxy {
                dispatcher: dispatcher.clone(),
                request_id,
                token,
            })
        }
    }

    /// Tear down this dispatcher: stop its read loop and abandon every call
    /// still in flight with [`BridgeError::PoolReset`]. Called by the pool
    /// when a slot is torn down via `close()` or a shrinking `set_limit()`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    async fn run(self: Arc<Self>, mut receiver: Box<dyn EndpointReceiver>) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                self.pending_calls.abandon_all(|| BridgeError::PoolReset);
                self.pending_callback_calls.abandon_all(|| BridgeError::PoolReset);
                return;
            }

            let envelope = tokio::select! {
                _ = self.shutdown.notified() => {
                    self.pending_calls.abandon_all(|| BridgeError::PoolReset);
                    self.pending_callback_calls.abandon_all(|| BridgeError::PoolReset);
                    return;
                }
                result = receiver.recv() => result,
            };

            let envelope = match envelope {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    debug!("bridge endpoint closed, abandoning pending calls");
                    self.pending_calls.abandon_all(|| BridgeError::ConnectionClosed);
                    self.pending_callback_calls.abandon_all(|| BridgeError::ConnectionClosed);
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "bridge read loop failed, abandoning pending calls");
                    self.pending_calls.abandon_all(|| BridgeError::ConnectionClosed);
                    self.pending_callback_calls.abandon_all(|| BridgeError::ConnectionClosed);
                    return;
                }
            };

            match envelope {
                Envelope::Ready => {
                    self.ready_flag.store(true, Ordering::Release);
                    self.ready.notify_waiters();
                }
                Envelope::Function { id, procedure, args } => {
                    self.clone().handle_function(id, procedure, args);
                }
                Envelope::Result { id, value } => {
                    self.registry.clear(id);
                    self.pending_calls.settle(id, Ok(value));
                }
                Envelope::Error { id, message } => {
                    self.registry.clear(id);
                    self.pending_calls.settle(id, Err(BridgeError::Remote(message)));
                }
                Envelope::CallbackCall { id, call_id, token, args } => {
                    self.clone().handle_callback_call(id, call_id, token, args);
                }
                Envelope::CallbackResult { call_id, value } => {
                    self.pending_callback_calls.settle(call_id, Ok(value));
                }
                Envelope::CallbackError { call_id, message } => {
                    self.pending_callback_calls
                        .settle(call_id, Err(BridgeError::CallbackFailed(message)));
                }
            }
        }
    }

    fn handle_function(self: Arc<Self>, id: RequestId, procedure: String, args: Vec<Value>) {
        let Some(procedures) = self.procedures.clone() else {
            debug!(procedure, "function call received on an endpoint with no procedures; ignoring");
            return;
        };
        let Some(body) = procedures.get(&procedure) else {
            debug!(procedure, "unknown procedure; ignoring call per the wire protocol's silent-drop rule");
            return;
        };

        tokio::spawn(async move {
            let make_proxy = self.make_proxy_fn();
            let live_args: Vec<Arg> = args
                .into_iter()
                .map(|value| unmarshal(value, id, &self.registry, &make_proxy))
                .collect();

            let outcome = body.call(live_args).await;
            let envelope = match outcome {
                Ok(result) => {
                    let mut transferables = Vec::new();
                    let value = marshal(result, id, &self.registry, &mut transferables);
                    Envelope::Result { id, value }
                }
                Err(err) => Envelope::Error {
                    id,
                    message: err.to_string(),
                },
            };
            if let Err(err) = self.sender.send(envelope).await {
                warn!(error = %err, request_id = id, "failed to send procedure result");
            }
            self.registry.clear(id);
        });
    }

    fn handle_callback_call(
        self: Arc<Self>,
        id: RequestId,
        call_id: String,
        token: String,
        args: Vec<Value>,
    ) {
        let Some(callback) = self.registry.lookup_callback(id, &token) else {
            debug!(token, "callback call referenced an unknown token; ignoring");
            return;
        };

        tokio::spawn(async move {
            let make_proxy = self.make_proxy_fn();
            let live_args: Vec<Arg> = args
                .into_iter()
                .map(|value| unmarshal(value, id, &self.registry, &make_proxy))
                .collect();
            let arg = if live_args.len() == 1 {
                live_args.into_iter().next().unwrap()
            } else {
                Arg::Sequence(live_args)
            };

            let outcome = callback.call(arg).await;
            match outcome {
                Ok(result) => {
                    let mut transferables = Vec::new();
                    let value = marshal(result, id, &self.registry, &mut transferables);
                    if let Err(err) = self
                        .sender
                        .send(Envelope::CallbackResult {
                            call_id: call_id.clone(),
                            value,
                        })
                        .await
                    {
                        warn!(error = %err, call_id, "failed to send callback result");
                    }
                }
                Err(err) => {
                    if self.callback_errors {
                        let _ = self
                            .sender
                            .send(Envelope::CallbackError {
                                call_id: call_id.clone(),
                                message: err.to_string(),
                            })
                            .await;
                    } else {
                        warn!(error = %err, call_id, "callback failed; leaking per default policy");
                    }
                }
            }
        });
    }
}

/// The in-flight state of a top-level [`Dispatcher::call`] invocation. Sends
/// its `Function` envelope lazily the first time it is polled/awaited so
/// constructing one cannot fail independently of awaiting it.
pub struct CallFuture {
    dispatcher: Arc<Dispatcher>,
    id: RequestId,
    send: Option<Envelope>,
    rx: oneshot::Receiver<Settlement>,
}

impl CallFuture {
    pub async fn await_result(mut self) -> Result<Arg, BridgeError> {
        if let Some(envelope) = self.send.take() {
            self.dispatcher.sender.send(envelope).await?;
        }
        let outcome = self.rx.await.map_err(|_| BridgeError::ConnectionClosed)?;
        match outcome {
            Ok(value) => {
                let make_proxy = self.dispatcher.make_proxy_fn();
                Ok(unmarshal(value, self.id, &self.dispatcher.registry, &make_proxy))
            }
            Err(err) => Err(err),
        }
    }
}

/// Stands in for a callable that was unmarshaled from a
/// [`Value::Placeholder`]. Invoking it posts a `CallbackCall` back to
/// whichever side minted the token and awaits the matching
/// `CallbackResult`/`CallbackError`.
pub struct CallbackProxy {
    dispatcher: Arc<Dispatcher>,
    request_id: RequestId,
    token: String,
}

#[async_trait]
impl Callback for CallbackProxy {
    async fn call(&self, args: Arg) -> Result<Arg, BridgeError> {
        let call_id = mint_call_id();
        let mut transferables = Vec::new();
        let value = marshal(args, self.request_id, &self.dispatcher.registry, &mut transferables);

        let (tx, rx) = oneshot::channel();
        self.dispatcher
            .pending_callback_calls
            .insert(call_id.clone(), tx);

        self.dispatcher
            .sender
            .send(Envelope::CallbackCall {
                id: self.request_id,
                call_id,
                token: self.token.clone(),
                args: vec![value],
            })
            .await?;

        let outcome = rx.await.map_err(|_| BridgeError::ConnectionClosed)?;
        match outcome {
            Ok(result) => {
                let make_proxy = self.dispatcher.make_proxy_fn();
                Ok(unmarshal(
                    result,
                    self.request_id,
                    &self.dispatcher.registry,
                    &make_proxy,
                ))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::ProcedureMap;
    use crate::transport::channel;

    #[tokio::test]
    async fn function_call_round_trips_a_simple_result() {
        let (main_halves, worker_halves) = channel::pair();
        let procedures = ProcedureMap::builder()
            .on("add", |args: Vec<Arg>| async move {
                let sum: f64 = args.iter().filter_map(Arg::as_f64).sum();
                Ok(Arg::from(sum))
            })
            .build();

        let worker = Dispatcher::spawn(
            worker_halves.sender,
            worker_halves.receiver,
            Some(procedures),
            false,
        );
        worker.announce_ready().await.unwrap();

        let main = Dispatcher::spawn(main_halves.sender, main_halves.receiver, None, false);
        main.wait_ready().await;

        let result = main
            .call("add", vec![Arg::from(2.0), Arg::from(3.0)])
            .await_result()
            .await
            .unwrap();
        assert_eq!(result.as_f64(), Some(5.0));
    }

    #[tokio::test]
    async fn procedure_error_surfaces_as_a_remote_error() {
        let (main_halves, worker_halves) = channel::pair();
        let procedures = ProcedureMap::builder()
            .on("boom", |_args: Vec<Arg>| async move {
                Err(BridgeError::Remote("kaboom".to_string()))
            })
            .build();
        let worker = Dispatcher::spawn(worker_halves.sender, worker_halves.receiver, Some(procedures), false);
        worker.announce_ready().await.unwrap();
        let main = Dispatcher::spawn(main_halves.sender, main_halves.receiver, None, false);
        main.wait_ready().await;

        let err = main.call("boom", vec![]).await_result().await.unwrap_err();
        assert!(matches!(err, BridgeError::Remote(ref m) if m == "kaboom"));
    }

    #[tokio::test]
    async fn unknown_procedure_never_settles_and_is_silently_ignored() {
        let (main_halves, worker_halves) = channel::pair();
        let worker = Dispatcher::spawn(worker_halves.sender, worker_halves.receiver, Some(ProcedureMap::builder().build()), false);
        worker.announce_ready().await.unwrap();
        let main = Dispatcher::spawn(main_halves.sender, main_halves.receiver, None, false);
        main.wait_ready().await;

        let call = main.call("does-not-exist", vec![]);
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), call.await_result()).await;
        assert!(outcome.is_err(), "call should never settle for an unknown procedure");
    }

    #[tokio::test]
    async fn callback_passed_as_an_argument_is_invoked_from_the_worker_side() {
        let (main_halves, worker_halves) = channel::pair();
        let procedures = ProcedureMap::builder()
            .on("invoke_callback", |mut args: Vec<Arg>| async move {
                let callback = args.remove(0);
                let cb = callback.as_callback().unwrap().clone();
                cb.call(Arg::from(41.0)).await
            })
            .build();
        let worker = Dispatcher::spawn(worker_halves.sender, worker_halves.receiver, Some(procedures), false);
        worker.announce_ready().await.unwrap();
        let main = Dispatcher::spawn(main_halves.sender, main_halves.receiver, None, false);
        main.wait_ready().await;

        let callback = Arg::callback(|args: Arg| async move {
            let n = args.as_f64().unwrap_or(0.0);
            Ok(Arg::from(n + 1.0))
        });
        let result = main
            .call("invoke_callback", vec![callback])
            .await_result()
            .await
            .unwrap();
        assert_eq!(result.as_f64(), Some(42.0));
    }
}
