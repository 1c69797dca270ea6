//! Urgent work example: a single-worker pool serving mixed priorities

use std::convert::Infallible;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use triage::prelude::*;

fn main() -> triage::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Urgent Work Example ===\n");

    // Two cores leaves exactly one worker, so the dispatch order is visible.
    let pool: Executor = Executor::builder()
        .hardware_parallelism(2)
        .before_dispatch(|worker: WorkerId, task: &TaskInfo<Priority>| {
            tracing::info!(
                worker,
                task = %task.id,
                priority = %task.classification,
                waited_ms = task.queued_for.as_millis() as u64,
                "dispatching"
            );
        })
        .build()?;

    println!(
        "Workers: min {}, max {}",
        pool.min_workers(),
        pool.max_workers()
    );

    let start = Instant::now();
    let mut handles = Vec::new();

    // Occupy the worker so everything below queues up behind it.
    handles.push(pool.submit_with(
        || {
            thread::sleep(Duration::from_millis(50));
            Ok::<_, Infallible>("warmup")
        },
        Priority::Normal,
    )?);

    for (i, level) in [
        Priority::Background,
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Realtime,
    ]
    .into_iter()
    .enumerate()
    {
        handles.push(pool.submit_with(
            move || {
                thread::sleep(Duration::from_millis(10));
                Ok::<_, Infallible>(level.as_str())
            },
            level,
        )?);
        println!("Submitted #{} at {}", i, level);
    }

    println!("Most urgent seen: {}\n", pool.current_most_urgent());

    for handle in handles {
        let id = handle.id();
        match handle.wait() {
            Ok(name) => println!("{} finished: {}", id, name),
            Err(e) => println!("{} failed: {}", id, e),
        }
    }

    pool.drain_and_stop();
    pool.await_termination(Duration::from_secs(5));

    let metrics = pool.metrics();
    println!("\nCompleted: {}", metrics.tasks_completed);
    println!("Avg wait: {:.2} ms", metrics.avg_wait_ns as f64 / 1e6);
    println!("Elapsed: {:?}", start.elapsed());
    println!("\n=== Example Complete ===");
    Ok(())
}
