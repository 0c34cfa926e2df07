//! Exercises the worker pool scheduler end to end: lazy worker launch, slot
//! reuse, concurrent execution across slots, and the `set_limit`/`close`
//! lifecycle operations.

use std::sync::Arc;
use std::time::Duration;

use worker_bridge::procedure::ProcedureMap;
use worker_bridge::transport::channel;
use worker_bridge::value::Arg;
use worker_bridge::worker::init_worker;
use worker_bridge::{BridgeError, EndpointHalves, WorkerPool};

async fn spawn_worker_pair() -> Result<EndpointHalves, BridgeError> {
    let (main_halves, worker_halves) = channel::pair();
    let procedures = ProcedureMap::builder()
        .on("square", |mut args: Vec<Arg>| async move {
            let n = args.pop().and_then(|a| a.as_f64()).unwrap_or(0.0);
            Ok(Arg::from(n * n))
        })
        .on("slow_echo", |mut args: Vec<Arg>| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(args.pop().unwrap_or(Arg::Null))
        })
        .build();
    tokio::spawn(async move {
        let _worker = init_worker(worker_halves, procedures, false).await.unwrap();
        std::future::pending::<()>().await;
    });
    Ok(main_halves)
}

#[tokio::test]
async fn sequential_calls_reuse_a_single_slot() {
    let pool = WorkerPool::new(1, spawn_worker_pair);

    for n in 0..5 {
        let result = pool.execute("square", vec![Arg::from(n as f64)]).await.unwrap();
        assert_eq!(result.as_f64(), Some((n * n) as f64));
    }
    assert_eq!(pool.busy_count(), 0);
}

#[tokio::test]
async fn concurrent_calls_spread_across_multiple_slots() {
    let pool = WorkerPool::new(4, spawn_worker_pair);

    let mut handles = Vec::new();
    for i in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.execute("slow_echo", vec![Arg::from(i as f64)]).await
        }));
    }

    let mut results: Vec<f64> = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap().as_f64().unwrap());
    }
    results.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(results, vec![0.0, 1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn a_second_call_on_a_single_slot_pool_waits_for_the_slot_to_free() {
    let pool = WorkerPool::new(1, spawn_worker_pair);

    let pool_a = pool.clone();
    let first = tokio::spawn(async move { pool_a.execute("slow_echo", vec![Arg::from(1.0)]).await });

    // Give the first call a moment to claim the only slot.
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(pool.busy_count(), 1);

    let second = pool.execute("slow_echo", vec![Arg::from(2.0)]).await.unwrap();
    assert_eq!(second.as_f64(), Some(2.0));
    assert_eq!(first.await.unwrap().unwrap().as_f64(), Some(1.0));
}

#[tokio::test]
async fn set_limit_shrink_abandons_in_flight_calls_with_pool_reset() {
    let pool: Arc<WorkerPool> = WorkerPool::new(2, spawn_worker_pair);
    pool.launch_workers().await.unwrap();

    let pool_clone = pool.clone();
    let call = tokio::spawn(async move { pool_clone.execute("slow_echo", vec![Arg::from(1.0)]).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    pool.set_limit(0);

    let outcome = call.await.unwrap();
    assert!(matches!(outcome, Err(BridgeError::PoolReset)));
}

#[tokio::test]
async fn close_tears_down_all_slots_and_a_later_execute_relaunches() {
    let pool = WorkerPool::new(2, spawn_worker_pair);
    pool.launch_workers().await.unwrap();
    pool.close();

    let result = pool.execute("square", vec![Arg::from(3.0)]).await.unwrap();
    assert_eq!(result.as_f64(), Some(9.0));
}
