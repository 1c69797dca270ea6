//! Stress tests for the executor

use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use triage::prelude::*;

const WAIT: Duration = Duration::from_secs(30);

#[test]
fn stress_test_concurrent_submitters() {
    let pool: Arc<Executor> = Arc::new(Executor::new(8).unwrap());
    let counter = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                let handles: Vec<_> = (0..250)
                    .map(|i| {
                        let counter = counter.clone();
                        let level = Priority::ALL[(t + i) % Priority::ALL.len()];
                        pool.submit_with(
                            move || {
                                counter.fetch_add(1, Ordering::Relaxed);
                                Ok::<_, Infallible>(i)
                            },
                            level,
                        )
                        .unwrap()
                    })
                    .collect();
                handles
                    .into_iter()
                    .enumerate()
                    .all(|(i, h)| h.wait().unwrap() == i)
            })
        })
        .collect();

    for s in submitters {
        assert!(s.join().unwrap());
    }
    assert_eq!(counter.load(Ordering::Relaxed), 2000);
    assert_eq!(pool.current_most_urgent(), Priority::Realtime.weight());
    assert!(pool.live_workers() <= pool.max_workers());
}

#[test]
fn stress_test_drain_while_submitting() {
    let pool: Arc<Executor> = Arc::new(Executor::new(4).unwrap());
    let executed = Arc::new(AtomicUsize::new(0));

    let submitter = {
        let pool = pool.clone();
        let executed = executed.clone();
        thread::spawn(move || {
            let mut accepted = Vec::new();
            let mut rejected = 0usize;
            for _ in 0..5_000 {
                let executed = executed.clone();
                match pool.execute(move || {
                    executed.fetch_add(1, Ordering::Relaxed);
                }) {
                    Ok(handle) => accepted.push(handle),
                    Err(Error::Rejected) => rejected += 1,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            (accepted, rejected)
        })
    };

    thread::sleep(Duration::from_millis(2));
    pool.drain_and_stop();

    let (accepted, rejected) = submitter.join().unwrap();
    let accepted_count = accepted.len();
    for handle in accepted {
        handle.wait().unwrap();
    }

    assert_eq!(accepted_count + rejected, 5_000);
    assert_eq!(executed.load(Ordering::Relaxed), accepted_count);
    assert!(pool.await_termination(WAIT));
}

#[test]
fn stress_test_cancel_storm() {
    let pool: Executor = Executor::new(3).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2_000)
        .map(|_| {
            let ran = ran.clone();
            pool.execute(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap()
        })
        .collect();

    let cancelled = handles.iter().step_by(2).filter(|h| h.cancel()).count();

    let mut finished = 0;
    let mut was_cancelled = 0;
    for handle in handles {
        match handle.wait() {
            Ok(()) => finished += 1,
            Err(e) if e.is_cancelled() => was_cancelled += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(was_cancelled, cancelled);
    assert_eq!(finished + was_cancelled, 2_000);

    pool.drain_and_stop();
    assert!(pool.await_termination(WAIT));
    assert_eq!(ran.load(Ordering::Relaxed), finished);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn stress_test_panic_recovery() {
    let pool: Executor = Executor::builder()
        .hardware_parallelism(4)
        .panic_strategy(triage::PanicStrategy::Isolate)
        .build()
        .unwrap();

    let handles: Vec<_> = (0..500)
        .map(|i| {
            pool.submit(move || {
                if i % 10 == 0 {
                    panic!("intentional panic");
                }
                Ok::<_, Infallible>(i)
            })
            .unwrap()
        })
        .collect();

    let panicked = handles
        .into_iter()
        .map(|h| h.wait())
        .filter(|r| matches!(r, Err(e) if e.is_panic()))
        .count();
    assert_eq!(panicked, 50);

    // pool still works after panics
    assert_eq!(pool.execute(|| 7).unwrap().wait().unwrap(), 7);
}

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_priority_order_under_load() {
    // single worker so dispatch order is fully determined by the queue
    let pool: Executor = Executor::new(2).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);

    let blocker = pool
        .execute(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv();
        })
        .unwrap();
    started_rx.recv_timeout(WAIT).unwrap();

    let handles: Vec<_> = (0..10_000)
        .map(|i| {
            let order = order.clone();
            let level = Priority::ALL[(i * 7) % Priority::ALL.len()];
            pool.submit_with(
                move || {
                    order.lock().push(level.weight());
                    Ok::<_, Infallible>(())
                },
                level,
            )
            .unwrap()
        })
        .collect();

    drop(gate_tx);
    blocker.wait().unwrap();
    for handle in handles {
        handle.wait().unwrap();
    }

    let order = order.lock();
    assert_eq!(order.len(), 10_000);
    assert!(order.windows(2).all(|w| w[0] <= w[1]));
}
