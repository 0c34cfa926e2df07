//! Exercises callback marshaling: a callback passed as an argument is
//! invoked from the worker side, an unknown callback token is silently
//! ignored, and a callback failure either leaks silently or surfaces as a
//! `CallbackError` depending on the pool's `with_callback_errors` setting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use worker_bridge::procedure::ProcedureMap;
use worker_bridge::transport::channel;
use worker_bridge::value::Arg;
use worker_bridge::worker::init_worker;
use worker_bridge::{BridgeError, EndpointHalves, WorkerPool};

async fn spawn_worker_with(callback_errors: bool) -> Result<EndpointHalves, BridgeError> {
    let (main_halves, worker_halves) = channel::pair();
    let procedures = ProcedureMap::builder()
        .on("apply_twice", |mut args: Vec<Arg>| async move {
            let value = args.remove(0);
            let callback = args.remove(0);
            let cb = callback.as_callback().unwrap().clone();
            let once = cb.call(value).await?;
            cb.call(once).await
        })
        .build();
    tokio::spawn(async move {
        let _worker = init_worker(worker_halves, procedures, callback_errors).await.unwrap();
        std::future::pending::<()>().await;
    });
    Ok(main_halves)
}

#[tokio::test]
async fn callback_is_invoked_twice_from_the_worker_side() {
    let pool = WorkerPool::new(1, || spawn_worker_with(false));
    let call_count = Arc::new(AtomicUsize::new(0));
    let counter = call_count.clone();
    let callback = Arg::callback(move |args: Arg| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arg::from(args.as_f64().unwrap_or(0.0) + 10.0))
        }
    });

    let result = pool
        .execute("apply_twice", vec![Arg::from(1.0), callback])
        .await
        .unwrap();
    assert_eq!(result.as_f64(), Some(21.0));
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_callback_leaks_silently_by_default() {
    let pool = WorkerPool::new(1, || spawn_worker_with(false));
    let callback = Arg::callback(|_args: Arg| async move {
        Err(BridgeError::Remote("callback exploded".to_string()))
    });

    let call = pool.execute("apply_twice", vec![Arg::from(1.0), callback]);
    let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), call).await;
    assert!(outcome.is_err(), "a leaked callback failure should never settle the call");
}

#[tokio::test]
async fn failing_callback_surfaces_as_callback_error_when_opted_in() {
    let pool = WorkerPool::builder(1, || spawn_worker_with(true))
        .with_callback_errors()
        .build();
    let callback = Arg::callback(|_args: Arg| async move {
        Err(BridgeError::Remote("callback exploded".to_string()))
    });

    let outcome = pool.execute("apply_twice", vec![Arg::from(1.0), callback]).await;
    assert!(matches!(outcome, Err(BridgeError::CallbackFailed(_))));
}
