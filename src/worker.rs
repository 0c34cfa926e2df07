//! # Worker-Side Startup
//!
//! `init_worker` is what a worker-side entry point calls once its transport
//! endpoint is connected: it installs the procedure map, spawns the
//! dispatcher's read loop, and emits the startup `Ready` envelope the pool's
//! slot-acquisition path waits on before handing the slot out for calls.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::procedure::ProcedureMap;
use crate::transport::EndpointHalves;

/// A running worker's dispatcher handle. Kept alive for as long as the
/// worker should keep answering calls; dropping it does not stop the
/// background read loop (that ends only when the transport closes or
/// [`WorkerHandle::close`] is called).
pub struct WorkerHandle {
    dispatcher: Arc<Dispatcher>,
}

impl WorkerHandle {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn close(&self) {
        self.dispatcher.close();
    }
}

/// Install `procedures` on `endpoint`, start its dispatcher, and announce
/// readiness. `callback_errors` must match the value the owning
/// [`crate::pool::WorkerPool`] was built with, since it governs whether a
/// callback failure on this side produces a `CallbackError` envelope or is
/// logged and leaked.
pub async fn init_worker(
    endpoint: EndpointHalves,
    procedures: ProcedureMap,
    callback_errors: bool,
) -> Result<WorkerHandle, BridgeError> {
    let dispatcher = Dispatcher::spawn(
        endpoint.sender,
        endpoint.receiver,
        Some(procedures),
        callback_errors,
    );
    dispatcher.announce_ready().await?;
    Ok(WorkerHandle { dispatcher })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel;
    use crate::value::Arg;

    #[tokio::test]
    async fn init_worker_announces_ready_to_its_peer() {
        let (main_halves, worker_halves) = channel::pair();
        let procedures = ProcedureMap::builder()
            .on("identity", |mut args: Vec<Arg>| async move {
                Ok(args.pop().unwrap_or(Arg::Null))
            })
            .build();

        let worker = init_worker(worker_halves, procedures, false).await.unwrap();
        let main = Dispatcher::spawn(main_halves.sender, main_halves.receiver, None, false);
        main.wait_ready().await;
        assert!(main.is_ready());

        worker.close();
    }
}
