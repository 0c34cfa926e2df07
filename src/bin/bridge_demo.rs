//! Demo binary exercising `worker-bridge`'s pool, marshaling, and callback
//! machinery end to end. Workers here are spawned as in-process tokio tasks
//! connected over `worker_bridge::transport::channel`, standing in for the
//! external worker processes a real embedder would launch.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::*;
use tracing::{error, info, Level};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, Layer};

use worker_bridge::cli::{Args, Scenario};
use worker_bridge::procedure::ProcedureMap;
use worker_bridge::transport::channel;
use worker_bridge::value::Arg;
use worker_bridge::worker::init_worker;
use worker_bridge::{BridgeError, WorkerPool};

fn install_logging(args: &Args) -> tracing_appender::non_blocking::WorkerGuard {
    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "bridge-demo.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(LevelFilter::from_level(level));

    let mut layers = vec![file_layer.boxed()];

    if !args.quiet {
        let stdout_layer = fmt::layer()
            .without_time()
            .with_target(false)
            .with_filter(LevelFilter::from_level(Level::INFO));
        layers.push(stdout_layer.boxed());
    }

    tracing_subscriber::registry().with(layers).init();
    guard
}

fn demo_procedures() -> ProcedureMap {
    ProcedureMap::builder()
        .on("add", |args: Vec<Arg>| async move {
            let sum: f64 = args.iter().filter_map(Arg::as_f64).sum();
            Ok(Arg::from(sum))
        })
        .on("invoke_callback", |mut args: Vec<Arg>| async move {
            let callback = args
                .pop()
                .and_then(|a| a.as_callback().cloned())
                .ok_or_else(|| BridgeError::Config("expected a callback argument".to_string()))?;
            callback.call(Arg::from(41.0)).await
        })
        .on("throw_error", |_args: Vec<Arg>| async move {
            Err(BridgeError::Remote("the worker deliberately failed".to_string()))
        })
        .on("sum_buffer", |args: Vec<Arg>| async move {
            let bytes = args
                .first()
                .and_then(Arg::as_bytes)
                .ok_or_else(|| BridgeError::Config("expected a byte buffer argument".to_string()))?;
            let sum: u64 = bytes.iter().map(|b| *b as u64).sum();
            Ok(Arg::from(sum as f64))
        })
        .on("describe_record", |args: Vec<Arg>| async move {
            let record = args
                .first()
                .and_then(Arg::as_record)
                .ok_or_else(|| BridgeError::Config("expected a record argument".to_string()))?;
            Ok(Arg::from(record.len() as f64))
        })
        .build()
}

async fn launch_worker() -> Result<worker_bridge::EndpointHalves, BridgeError> {
    let (main_halves, worker_halves) = channel::pair();
    tokio::spawn(async move {
        if let Err(err) = init_worker(worker_halves, demo_procedures(), false).await {
            error!(%err, "demo worker failed to start");
            return;
        }
        std::future::pending::<()>().await;
    });
    Ok(main_halves)
}

async fn run_scenario(pool: &Arc<WorkerPool>, scenario: Scenario) -> Result<(), BridgeError> {
    match scenario {
        Scenario::Add => {
            let result = pool.execute("add", vec![Arg::from(2.0), Arg::from(3.0)]).await?;
            info!(result = ?result.as_f64(), "add scenario complete");
        }
        Scenario::Callback => {
            let callback = Arg::callback(|args: Arg| async move {
                let n = args.as_f64().unwrap_or(0.0);
                Ok(Arg::from(n + 1.0))
            });
            let result = pool.execute("invoke_callback", vec![callback]).await?;
            info!(result = ?result.as_f64(), "callback scenario complete");
        }
        Scenario::Error => match pool.execute("throw_error", vec![]).await {
            Ok(_) => error!("expected the error scenario to fail, but it succeeded"),
            Err(err) => info!(%err, "error scenario produced the expected remote error"),
        },
        Scenario::Transfer => {
            let buffer: Vec<u8> = (0..16).collect();
            let result = pool.execute("sum_buffer", vec![Arg::from(buffer)]).await?;
            info!(result = ?result.as_f64(), "transfer scenario complete");
        }
        Scenario::Nested => {
            let mut record = HashMap::new();
            record.insert("a".to_string(), Arg::from(1.0));
            record.insert("b".to_string(), Arg::Sequence(vec![Arg::from(2.0), Arg::from(3.0)]));
            let result = pool.execute("describe_record", vec![Arg::Record(record)]).await?;
            info!(result = ?result.as_f64(), "nested scenario complete");
        }
        Scenario::All => unreachable!("Scenario::expand_all removes the All variant"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = install_logging(&args);

    if !args.quiet {
        println!("{}", "worker-bridge demo".bold());
    }

    let pool = WorkerPool::builder(args.pool_size, launch_worker)
        .with_callback_errors_if(args.callback_errors)
        .build();
    pool.launch_workers().await?;

    for scenario in Scenario::expand_all(args.scenarios) {
        if let Err(err) = run_scenario(&pool, scenario).await {
            error!(%err, scenario = %scenario, "scenario failed");
        }
    }

    pool.wait_all().await;
    pool.close();
    Ok(())
}
