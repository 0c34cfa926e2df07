//! # Worker Pool Scheduler
//!
//! [`WorkerPool`] owns a fixed-capacity array of slots and hands calls to
//! whichever slot is free, launching a worker lazily into an empty slot
//! rather than pre-spawning the whole pool up front. Slot acquisition is
//! first-free-wins: there is no fairness queue, so a caller that has been
//! waiting longest is not guaranteed the next free slot. All slots are
//! functionally identical, so this is an explicit design choice rather than
//! a fairness bug: a cooperative, non-preemptive scheduler has no reason to
//! pay for a queue none of its callers can tell apart.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::transport::EndpointHalves;
use crate::value::Arg;

type LaunchFuture = Pin<Box<dyn Future<Output = Result<EndpointHalves, BridgeError>> + Send>>;
type Launcher = Arc<dyn Fn() -> LaunchFuture + Send + Sync>;

struct Slot {
    dispatcher: Option<Arc<Dispatcher>>,
    busy: bool,
}

/// Bounds how many concurrent workers a pool will keep alive and schedules
/// [`WorkerPool::execute`] calls across them. Worker instantiation itself is
/// supplied by the caller via the `launcher` closure passed to
/// [`WorkerPool::new`]; the pool never knows whether that closure spawns a
/// process, a thread, or (as in the demo binary and the test suite) an
/// in-process task connected over [`crate::transport::channel`].
pub struct WorkerPool {
    launcher: Launcher,
    slots: Mutex<Vec<Slot>>,
    limit: AtomicUsize,
    callback_errors: bool,
    freed: Notify,
}

/// Builder for [`WorkerPool`], a plain struct assembled field by field
/// before the pool it configures is constructed.
pub struct WorkerPoolBuilder {
    limit: usize,
    launcher: Launcher,
    callback_errors: bool,
}

impl WorkerPoolBuilder {
    fn new<F, Fut>(limit: usize, launcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<EndpointHalves, BridgeError>> + Send + 'static,
    {
        WorkerPoolBuilder {
            limit,
            launcher: Arc::new(move || Box::pin(launcher()) as LaunchFuture),
            callback_errors: false,
        }
    }

    /// Opt into the `CallbackError` wire extension: a callback failure on
    /// either side of this pool's connections produces a `CallbackError`
    /// envelope instead of being logged and left to never settle.
    pub fn with_callback_errors(mut self) -> Self {
        self.callback_errors = true;
        self
    }

    /// Conditionally opt into the `CallbackError` extension, for call sites
    /// that decide the flag at runtime (e.g. from a CLI argument) rather than
    /// at the call site's own source location.
    pub fn with_callback_errors_if(mut self, enabled: bool) -> Self {
        self.callback_errors = enabled;
        self
    }

    pub fn build(self) -> Arc<WorkerPool> {
        Arc::new(WorkerPool {
            launcher: self.launcher,
            slots: Mutex::new(Vec::new()),
            limit: AtomicUsize::new(self.limit),
            callback_errors: self.callback_errors,
            freed: Notify::new(),
        })
    }
}

impl WorkerPool {
    /// Build a pool capped at `limit` concurrent workers. Use
    /// [`WorkerPool::builder`] to also opt into `with_callback_errors`.
    pub fn new<F, Fut>(limit: usize, launcher: F) -> Arc<WorkerPool>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<EndpointHalves, BridgeError>> + Send + 'static,
    {
        WorkerPoolBuilder::new(limit, launcher).build()
    }

    pub fn builder<F, Fut>(limit: usize, launcher: F) -> WorkerPoolBuilder
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<EndpointHalves, BridgeError>> + Send + 'static,
    {
        WorkerPoolBuilder::new(limit, launcher)
    }

    /// Current slot capacity, as last set by [`WorkerPool::set_limit`] or the
    /// constructor.
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Number of slots currently holding an in-flight call.
    pub fn busy_count(&self) -> usize {
        self.slots
            .lock()
            .expect("pool poisoned")
            .iter()
            .filter(|s| s.busy)
            .count()
    }

    /// Eagerly bring every slot up to the pool's limit instead of waiting
    /// for the first `execute` call to launch one lazily. Builds missing
    /// endpoints in parallel rather than one at a time; a no-op for any slot
    /// that already has one.
    pub async fn launch_workers(self: &Arc<Self>) -> Result<(), BridgeError> {
        let missing = {
            let mut slots = self.slots.lock().expect("pool poisoned");
            let limit = self.limit();
            while slots.len() < limit {
                slots.push(Slot {
                    dispatcher: None,
                    busy: false,
                });
            }
            slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.dispatcher.is_none())
                .map(|(index, _)| index)
                .collect::<Vec<_>>()
        };

        let tasks: Vec<_> = missing
            .into_iter()
            .map(|index| {
                let pool = self.clone();
                (index, tokio::spawn(async move { pool.spawn_worker().await }))
            })
            .collect();

        for (index, task) in tasks {
            let dispatcher = task
                .await
                .map_err(|_| BridgeError::Startup("worker launch task panicked".to_string()))??;
            self.slots.lock().expect("pool poisoned")[index].dispatcher = Some(dispatcher);
        }
        Ok(())
    }

    /// Run `procedure` on whichever worker slot is free, launching a new
    /// worker first if no slot is currently idle and the pool has not yet
    /// reached its limit.
    pub async fn execute(
        self: &Arc<Self>,
        procedure: &str,
        args: Vec<Arg>,
    ) -> Result<Arg, BridgeError> {
        let (index, dispatcher) = self.acquire_slot().await?;
        let outcome = dispatcher.call(procedure, args).await_result().await;
        self.release_slot(index);
        outcome
    }

    /// Block until no slot is currently handling a call. Polls rather than
    /// maintaining a dedicated waiter list, since quiescence is inherently a
    /// point-in-time snapshot that can flip the instant another caller starts
    /// a new call.
    pub async fn wait_all(&self) {
        loop {
            if self.busy_count() == 0 {
                return;
            }
            let notified = self.freed.notified();
            if self.busy_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Block until the pool has at least one free slot: either an idle slot
    /// that already holds an endpoint, or room to grow a new one under the
    /// current limit. Does not launch anything itself; it only waits for
    /// availability, so a caller that actually wants to use the slot still
    /// goes through `execute`/`acquire_slot`.
    pub async fn wait_ready(&self) {
        loop {
            if self.has_free_slot() {
                return;
            }
            let notified = self.freed.notified();
            if self.has_free_slot() {
                return;
            }
            notified.await;
        }
    }

    fn has_free_slot(&self) -> bool {
        let slots = self.slots.lock().expect("pool poisoned");
        if slots.len() < self.limit() {
            return true;
        }
        slots.iter().any(|slot| !slot.busy)
    }

    /// Resize the pool's capacity. Terminates every current endpoint
    /// regardless of whether the new limit is larger, smaller, or equal to
    /// the old one, and replaces the slot array with `new_limit` fresh empty
    /// slots. Any call in flight on a terminated endpoint is rejected with
    /// [`BridgeError::PoolReset`] rather than letting it leak silently.
    pub fn set_limit(&self, new_limit: usize) {
        let mut slots = self.slots.lock().expect("pool poisoned");
        for slot in slots.drain(..) {
            if let Some(dispatcher) = slot.dispatcher {
                dispatcher.close();
            }
        }
        slots.extend((0..new_limit).map(|_| Slot {
            dispatcher: None,
            busy: false,
        }));
        self.limit.store(new_limit, Ordering::Relaxed);
        drop(slots);
        self.freed.notify_waiters();
    }

    /// Close every worker slot. The pool's limit is left unchanged so a
    /// subsequent `execute` call can relaunch workers on demand.
    pub fn close(&self) {
        let mut slots = self.slots.lock().expect("pool poisoned");
        for slot in slots.drain(..) {
            if let Some(dispatcher) = slot.dispatcher {
                dispatcher.close();
            }
        }
        drop(slots);
        self.freed.notify_waiters();
    }

    fn release_slot(&self, index: usize) {
        {
            let mut slots = self.slots.lock().expect("pool poisoned");
            if let Some(slot) = slots.get_mut(index) {
                slot.busy = false;
            }
        }
        self.freed.notify_waiters();
    }

    async fn spawn_worker(&self) -> Result<Arc<Dispatcher>, BridgeError> {
        let endpoint = (self.launcher)().await?;
        let dispatcher = Dispatcher::spawn(endpoint.sender, endpoint.receiver, None, self.callback_errors);
        dispatcher.wait_ready().await;
        debug!("worker pool slot launched and ready");
        Ok(dispatcher)
    }

    /// Find an idle, already-launched slot or launch a new one into an empty
    /// one, looping (and waiting on `freed`) when the pool is both full and
    /// fully busy. First idle slot found wins; there is no oldest-waiter
    /// fairness.
    async fn acquire_slot(self: &Arc<Self>) -> Result<(usize, Arc<Dispatcher>), BridgeError> {
        loop {
            let launch_index = {
                let mut slots = self.slots.lock().expect("pool poisoned");
                let mut found = None;
                for (index, slot) in slots.iter_mut().enumerate() {
                    if !slot.busy {
                        if let Some(dispatcher) = &slot.dispatcher {
                            slot.busy = true;
                            found = Some((index, dispatcher.clone()));
                            break;
                        }
                    }
                }
                if let Some(found) = found {
                    return Ok(found);
                }
                if slots.len() < self.limit() {
                    slots.push(Slot {
                        dispatcher: None,
                        busy: true,
                    });
                    Some(slots.len() - 1)
                } else {
                    None
                }
            };

            if let Some(index) = launch_index {
                let dispatcher = self.spawn_worker().await?;
                let mut slots = self.slots.lock().expect("pool poisoned");
                slots[index].dispatcher = Some(dispatcher.clone());
                return Ok((index, dispatcher));
            }

            self.freed.notified().await;
        }
    }
}
